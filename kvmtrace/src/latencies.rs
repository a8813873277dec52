// Parser for the latency report printed by the driver.  The interesting lines look like this:
//
//   created   10000 permanent znodes  in   1234 ms (0.123400 ms/op 8103.727715/sec)
//   deleted   10000 ephemeral znodes  in      0 ms (included in prior)
//   notif     10000           watches in     12 ms (0.001200 ms/op 833333.333333/sec)
//
// Only the permanent and ephemeral sections carry an operation name we key on; a section whose time
// was folded into the previous one has no rate and is skipped.  Everything else in the file (server
// banners and so on) is ignored.

use anyhow::{bail, Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZnodeKind {
    Permanent,
    Ephemeral,
}

fn rate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(\S+)\s+([0-9]+)\s+(permanent|ephemeral)\s.*?([0-9]+(?:\.[0-9]+)?)/sec\)\s*$",
        )
        .expect("static regex")
    })
}

#[derive(Debug, Default, Clone)]
pub struct LatencyReport {
    permanent: BTreeMap<String, f64>,
    ephemeral: BTreeMap<String, f64>,
    znode_count: Option<u64>,
}

impl LatencyReport {
    pub fn from_reader<R: BufRead>(reader: R) -> Result<LatencyReport> {
        let mut report = LatencyReport::default();
        for line in reader.lines() {
            let line = line?;
            let caps = match rate_re().captures(&line) {
                Some(caps) => caps,
                None => continue,
            };
            let count = caps[2].parse::<u64>()?;
            let rate = caps[4].parse::<f64>()?;
            let table = if &caps[3] == "permanent" {
                report.znode_count = Some(count);
                &mut report.permanent
            } else {
                &mut report.ephemeral
            };
            table.insert(caps[1].to_string(), rate);
        }
        Ok(report)
    }

    /// Rate in operations per second for the permanent-znode section of `op`.

    pub fn rate(&self, op: &str) -> Result<f64> {
        self.rate_for(op, ZnodeKind::Permanent)
    }

    pub fn ephemeral_rate(&self, op: &str) -> Result<f64> {
        self.rate_for(op, ZnodeKind::Ephemeral)
    }

    pub fn rate_for(&self, op: &str, kind: ZnodeKind) -> Result<f64> {
        let table = match kind {
            ZnodeKind::Permanent => &self.permanent,
            ZnodeKind::Ephemeral => &self.ephemeral,
        };
        match table.get(op) {
            Some(r) => Ok(*r),
            None => bail!("No {:?} rate for operation '{op}'", kind),
        }
    }

    /// The znode count of the last permanent section, if any.

    pub fn znode_count(&self) -> Option<u64> {
        self.znode_count
    }

    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.permanent.keys().map(|k| k.as_str())
    }
}

pub fn parse_latencies<P: AsRef<Path>>(path: P) -> Result<LatencyReport> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Opening {}", path.display()))?;
    LatencyReport::from_reader(BufReader::new(file))
        .with_context(|| format!("Reading {}", path.display()))
}

#[test]
fn test_parse_latencies1() {
    assert!(parse_latencies("../test_data/nosuch/latencies.txt").is_err());
}

#[test]
fn test_parse_latencies2() {
    let r = parse_latencies("../test_data/run1/latencies.txt").unwrap();
    assert!(r.rate("created").unwrap() == 8103.727715);
    assert!(r.rate("set").unwrap() == 9000.5);
    assert!(r.rate("get").unwrap() == 20000.0);
    assert!(r.rate("deleted").unwrap() == 7500.25);
    assert!(r.ephemeral_rate("created").unwrap() == 7000.0);
    // Folded into the previous section
    assert!(r.ephemeral_rate("deleted").is_err());
    assert!(r.rate("notif").is_err());
    assert!(r.znode_count() == Some(100));
    assert!(r.operations().collect::<Vec<_>>() == vec!["created", "deleted", "get", "set"]);
}

#[test]
fn test_rate_digits() {
    // The full number before "/sec" is the rate, not just its last digits.
    let input = b"get        100 permanent znodes  in     10 ms (0.100000 ms/op 12345.678900/sec)\n";
    let r = LatencyReport::from_reader(&input[..]).unwrap();
    assert!(r.rate("get").unwrap() == 12345.6789);

    let input = "set \u{0661}\u{0660}\u{0660} permanent znodes  in     10 ms (0.100000 ms/op 10000.000000/sec)\n";
    let r = LatencyReport::from_reader(input.as_bytes()).unwrap();
    assert!(r.rate("set").is_err());
}
