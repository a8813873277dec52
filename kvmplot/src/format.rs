// Generic formatting code for a set of rows extracted from a data structure to be presented
// columnar or as csv, with or without a header.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::io;

pub type Formatter<DataT> = fn(&DataT) -> String;

/// Return the fields in `spec`, checked against the formatters.  Unknown fields are an error.

pub fn parse_fields<'a, DataT>(
    spec: &'a str,
    formatters: &HashMap<&'static str, Formatter<DataT>>,
) -> Result<Vec<&'a str>> {
    let mut fields = vec![];
    for x in spec.split(',').map(|x| x.trim()).filter(|x| !x.is_empty()) {
        if formatters.contains_key(x) {
            fields.push(x);
        } else {
            bail!("Unknown field '{x}'");
        }
    }
    if fields.is_empty() {
        bail!("No output fields were selected");
    }
    Ok(fields)
}

/// The `fields` are the names of formatting functions to get from the `formatters`, these are
/// applied to the `data`.  Set `header` to true to print a first row with field names as a header
/// (independent of csv).  Set `csv` to true to get CSV output instead of fixed-format.

pub fn format_data<DataT>(
    output: &mut dyn io::Write,
    fields: &[&str],
    formatters: &HashMap<&'static str, Formatter<DataT>>,
    header: bool,
    csv: bool,
    data: &[DataT],
) -> Result<()> {
    let mut fmts = vec![];
    for kwd in fields {
        match formatters.get(*kwd) {
            Some(f) => fmts.push(*f),
            None => bail!("Unknown field '{kwd}'"),
        }
    }
    let rows = data
        .iter()
        .map(|x| fmts.iter().map(|f| f(x)).collect::<Vec<String>>())
        .collect::<Vec<_>>();

    if csv {
        let mut writer = ::csv::WriterBuilder::new().from_writer(output);
        if header {
            writer.write_record(fields)?;
        }
        for row in &rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        return Ok(());
    }

    // The column width is the max across all the entries in the column (including header, if
    // present)
    let mut widths = vec![0; fields.len()];
    if header {
        for (i, kwd) in fields.iter().enumerate() {
            widths[i] = usize::max(widths[i], kwd.len());
        }
    }
    for row in &rows {
        for (i, v) in row.iter().enumerate() {
            widths[i] = usize::max(widths[i], v.len());
        }
    }

    if header {
        for (i, kwd) in fields.iter().enumerate() {
            let w = widths[i];
            write!(output, "{:w$}  ", kwd)?;
        }
        writeln!(output)?;
    }
    for row in &rows {
        for (i, v) in row.iter().enumerate() {
            let w = widths[i];
            write!(output, "{:w$}  ", v)?;
        }
        writeln!(output)?;
    }
    Ok(())
}

#[cfg(test)]
fn test_formatters() -> HashMap<&'static str, Formatter<(String, f64)>> {
    let mut formatters: HashMap<&'static str, Formatter<(String, f64)>> = HashMap::new();
    formatters.insert("name", |d| d.0.clone());
    formatters.insert("value", |d| format!("{:.1}", d.1));
    formatters
}

#[test]
fn test_parse_fields() {
    let formatters = test_formatters();
    assert!(parse_fields("name,value", &formatters).unwrap() == vec!["name", "value"]);
    assert!(parse_fields("value", &formatters).unwrap() == vec!["value"]);
    assert!(parse_fields("name,bogus", &formatters).is_err());
    assert!(parse_fields("", &formatters).is_err());
}

#[test]
fn test_format_fixed() {
    let formatters = test_formatters();
    let data = vec![("get".to_string(), 1.0), ("created".to_string(), 12.5)];
    let mut out = vec![];
    format_data(&mut out, &["name", "value"], &formatters, true, false, &data).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text == "name     value  \nget      1.0    \ncreated  12.5   \n");
}

#[test]
fn test_format_csv() {
    let formatters = test_formatters();
    let data = vec![("a,b".to_string(), 2.0)];
    let mut out = vec![];
    format_data(&mut out, &["value", "name"], &formatters, true, true, &data).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text == "value,name\n2.0,\"a,b\"\n");
}
