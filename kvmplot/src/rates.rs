// Per-operation rates across repeated experiment runs.
//
// For every run in the index range we take the request rate the driver reported for each
// operation, and the APIC/PIO event rates from the trace captured during that operation.  The runs
// are then reduced to a mean and standard deviation per operation, printed, and drawn as a grouped
// bar chart.

use crate::format::{self, Formatter};
use crate::graph::{self, BarChartSpec, BarGroup};
use crate::{MetaArgs, PrintArgs, RatesArgs, Unit};

use anyhow::{bail, Result};
use kvmtrace::{experiment_dir, load_experiment, EventKind, Series2D, OPERATIONS};
use log::info;
use std::collections::HashMap;
use std::io;
use std::path::Path;

const DEFAULT_FIELDS: &str = "op,series,mean,std,unit";

/// Rates for all runs: rows are runs, columns are `ops` in order.

pub struct RateTable {
    pub ops: Vec<&'static str>,
    pub unit: Unit,
    pub request: Series2D,
    pub events: Vec<(EventKind, Series2D)>,

    /// Interface throughput in bytes/sec, present only if every operation of every run had
    /// counters around its trace.
    pub rx_bytes: Option<Series2D>,
    pub tx_bytes: Option<Series2D>,
}

struct SummaryRow {
    op: String,
    series: String,
    unit: String,
    mean: f64,
    std: f64,
}

fn summary_formatters() -> HashMap<&'static str, Formatter<SummaryRow>> {
    let mut formatters: HashMap<&'static str, Formatter<SummaryRow>> = HashMap::new();
    formatters.insert("op", |r| r.op.clone());
    formatters.insert("series", |r| r.series.clone());
    formatters.insert("unit", |r| r.unit.clone());
    formatters.insert("mean", |r| format!("{:.3}", r.mean));
    formatters.insert("std", |r| format!("{:.3}", r.std));
    formatters
}

/// Load runs `min_idx..=max_idx` of the experiment with directory prefix `prefix`, printing each
/// run's rates to `output` as they are read.

pub fn collect_rates(
    output: &mut dyn io::Write,
    prefix: &str,
    min_idx: usize,
    max_idx: usize,
    unit: Unit,
) -> Result<RateTable> {
    if min_idx > max_idx {
        bail!("The minimum experiment index {min_idx} is greater than the maximum {max_idx}");
    }
    let n_exps = max_idx - min_idx + 1;
    let mut request = Series2D::new(n_exps);
    let mut events = EventKind::ALL
        .iter()
        .map(|k| (*k, Series2D::new(n_exps)))
        .collect::<Vec<_>>();
    let mut rx_bytes = Some(Series2D::new(n_exps));
    let mut tx_bytes = Some(Series2D::new(n_exps));

    for exp_idx in min_idx..=max_idx {
        let dir = experiment_dir(prefix, exp_idx);
        info!("Loading {}", dir.display());
        let exp = load_experiment(&dir, &OPERATIONS, &EventKind::ALL)?;
        let row = exp_idx - min_idx;

        for op in &exp.ops {
            let rate = op.request_rate / unit.per_sec();
            writeln!(output, "OPERATION: {} -- rate={:.6}/{}", op.name, rate, unit.name())?;
            request.append_to_row(row, rate)?;
            for (kind, series) in events.iter_mut() {
                let r = op.event_rate(*kind)?;
                writeln!(output, "\t{kind} rate={r:.6}/sec")?;
                series.append_to_row(row, r)?;
            }
            rx_bytes = match (rx_bytes, op.rx_bytes_rate) {
                (Some(mut s), Some(r)) => {
                    s.append_to_row(row, r)?;
                    Some(s)
                }
                _ => None,
            };
            tx_bytes = match (tx_bytes, op.tx_bytes_rate) {
                (Some(mut s), Some(r)) => {
                    s.append_to_row(row, r)?;
                    Some(s)
                }
                _ => None,
            };
        }
    }

    Ok(RateTable {
        ops: OPERATIONS.to_vec(),
        unit,
        request,
        events,
        rx_bytes,
        tx_bytes,
    })
}

fn summarize(table: &RateTable) -> Result<Vec<SummaryRow>> {
    let mut named = vec![(
        "zk_request".to_string(),
        format!("ops/{}", table.unit.name()),
        &table.request,
    )];
    for (kind, series) in &table.events {
        named.push((kind.to_string(), "events/sec".to_string(), series));
    }
    if let Some(ref s) = table.rx_bytes {
        named.push(("rx_bytes".to_string(), "bytes/sec".to_string(), s));
    }
    if let Some(ref s) = table.tx_bytes {
        named.push(("tx_bytes".to_string(), "bytes/sec".to_string(), s));
    }

    let mut rows = vec![];
    for (i, op) in table.ops.iter().enumerate() {
        for (series, unit, s) in &named {
            rows.push(SummaryRow {
                op: op.to_string(),
                series: series.clone(),
                unit: unit.clone(),
                mean: s.means()?[i],
                std: s.stds()?[i],
            });
        }
    }
    Ok(rows)
}

fn bar_groups(table: &RateTable) -> Result<Vec<BarGroup>> {
    const COLOURS: [&str; 3] = ["red", "gold", "green"];
    let mut groups = vec![BarGroup {
        label: format!("ZK request rates/{}", table.unit.name()),
        colour: "blue",
        values: table.request.means()?,
    }];
    for ((kind, series), colour) in table.events.iter().zip(COLOURS) {
        groups.push(BarGroup {
            label: format!("{} rates/sec", kind.name()),
            colour,
            values: series.means()?,
        });
    }
    Ok(groups)
}

pub fn aggregate_and_print_rates(
    output: &mut dyn io::Write,
    args: &RatesArgs,
    print_args: &PrintArgs,
    _meta_args: &MetaArgs,
) -> Result<()> {
    let table = collect_rates(
        output,
        &args.input,
        args.min_exp_idx,
        args.max_exp_idx,
        args.latency_unit,
    )?;

    table.request.dump(output)?;

    let formatters = summary_formatters();
    let spec = print_args.fmt.as_deref().unwrap_or(DEFAULT_FIELDS);
    let fields = format::parse_fields(spec, &formatters)?;
    let rows = summarize(&table)?;
    format::format_data(
        output,
        &fields,
        &formatters,
        print_args.header || print_args.fmt.is_none(),
        print_args.csv,
        &rows,
    )?;

    let groups = bar_groups(&table)?;
    let view = graph::bar_view(&BarChartSpec {
        title: "Zookeeper Latency test",
        categories: &table.ops,
        groups: &groups,
        y_range: (args.ylim_bottom, args.ylim_top),
        log_scale: args.log_scale,
    })?;
    graph::save(&view, Path::new(&args.output_file))
}

#[test]
fn test_collect_rates() {
    let mut out = vec![];
    let t = collect_rates(&mut out, "../test_data/run", 1, 2, Unit::Sec).unwrap();
    assert!(t.request.num_rows() == 2);
    let means = t.request.means().unwrap();
    let stds = t.request.stds().unwrap();
    // get: 20000 and 25000
    assert!(means[2] == 22500.0);
    assert!(stds[2] == 2500.0);
    let (kind, apic_write) = &t.events[0];
    assert!(*kind == EventKind::ApicWrite);
    assert!(apic_write.means().unwrap() == vec![5.0, 5.0, 5.0, 5.0]);
    assert!(apic_write.stds().unwrap() == vec![0.0, 0.0, 0.0, 0.0]);
    // run1/get.txt and run2/deleted.txt have no interface counters
    assert!(t.rx_bytes.is_none());
    assert!(t.tx_bytes.is_none());

    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("OPERATION: created -- rate=8103.727715/sec\n\tapic_write rate=5.000000/sec\n"));
}

#[test]
fn test_collect_rates_msec() {
    let mut out = vec![];
    let t = collect_rates(&mut out, "../test_data/run", 1, 2, Unit::Msec).unwrap();
    assert!(t.request.means().unwrap()[2] == 22.5);
}

#[test]
fn test_collect_rates_errors() {
    let mut out = vec![];
    assert!(collect_rates(&mut out, "../test_data/run", 2, 1, Unit::Sec).is_err());
    assert!(collect_rates(&mut out, "../test_data/run", 1, 3, Unit::Sec).is_err());
    assert!(collect_rates(&mut out, "../test_data/bad", 1, 1, Unit::Sec).is_err());
}

#[test]
fn test_summarize() {
    let mut out = vec![];
    let t = collect_rates(&mut out, "../test_data/run", 1, 1, Unit::Sec).unwrap();
    let rows = summarize(&t).unwrap();
    // 4 operations by 4 series, no interface counters
    assert!(rows.len() == 16);
    assert!(rows[0].op == "created" && rows[0].series == "zk_request");
    assert!(rows[1].series == "apic_write" && rows[1].mean == 5.0);
    assert!(rows[2].series == "apic_read" && rows[2].mean == 4.0);
    assert!(rows[3].series == "pio_write" && rows[3].mean == 6.0);

    let groups = bar_groups(&t).unwrap();
    assert!(groups.len() == 4);
    assert!(groups[0].values[0] == 8103.727715);
}
