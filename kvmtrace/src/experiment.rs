// An experiment is a directory written by one run of the latency driver:
//
//   <dir>/latencies.txt    the driver's stdout
//   <dir>/<op>.txt         the trace captured while the driver performed <op>
//
// Repeated runs are numbered directories sharing a prefix, eg results1, results2, ...

use crate::events::EventKind;
use crate::latencies::{parse_latencies, LatencyReport};
use crate::tracelog::parse_tracelog;
use anyhow::{bail, Result};
use log::{debug, info};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The permanent-znode operations, in the order the driver runs them.

pub const OPERATIONS: [&str; 4] = ["created", "set", "get", "deleted"];

const IFACE: &str = "vnet0";

/// Reduced results for one operation of one experiment.

#[derive(Debug, Clone)]
pub struct OpResult {
    pub name: String,

    /// Operations per second as reported by the driver.
    pub request_rate: f64,

    /// Events per second, for each collected event kind.
    pub event_rates: BTreeMap<EventKind, f64>,

    /// Received and transmitted bytes per second over the span of the events, when the trace has
    /// interface counters around it.
    pub rx_bytes_rate: Option<f64>,
    pub tx_bytes_rate: Option<f64>,
}

impl OpResult {
    pub fn event_rate(&self, kind: EventKind) -> Result<f64> {
        match self.event_rates.get(&kind) {
            Some(r) => Ok(*r),
            None => bail!("No {kind} rate for operation '{}'", self.name),
        }
    }
}

#[derive(Debug)]
pub struct Experiment {
    pub dir: PathBuf,
    pub latencies: LatencyReport,
    pub ops: Vec<OpResult>,
}

impl Experiment {
    pub fn op(&self, name: &str) -> Result<&OpResult> {
        match self.ops.iter().find(|o| o.name == name) {
            Some(o) => Ok(o),
            None => bail!("Operation '{name}' not in experiment {}", self.dir.display()),
        }
    }
}

/// The directory of experiment `idx` given the common prefix; the index is appended verbatim.

pub fn experiment_dir(prefix: &str, idx: usize) -> PathBuf {
    PathBuf::from(format!("{prefix}{idx}"))
}

/// Load and reduce one experiment directory.  Any missing file, missing rate, or operation without
/// events of a requested kind is an error.

pub fn load_experiment<P: AsRef<Path>>(
    dir: P,
    ops: &[&str],
    kinds: &[EventKind],
) -> Result<Experiment> {
    let dir = dir.as_ref();
    let latencies = parse_latencies(dir.join("latencies.txt"))?;
    let mut results = vec![];
    for op in ops {
        let request_rate = latencies.rate(op)?;
        info!("{}: {op} rate={request_rate}/sec", dir.display());

        let trace = parse_tracelog(dir.join(format!("{op}.txt")), kinds)?;
        let mut event_rates = BTreeMap::new();
        for kind in kinds {
            let rate = trace.series(*kind)?.rate()?;
            debug!("{}: {op} {kind} rate={rate}/sec", dir.display());
            event_rates.insert(*kind, rate);
        }

        let (rx_bytes_rate, tx_bytes_rate) = if trace.ifstats().is_empty() {
            (None, None)
        } else {
            let (first, last) = trace.event_span()?;
            (
                Some(trace.ifstats().throughput(IFACE, "rx_bytes", last - first)?),
                Some(trace.ifstats().throughput(IFACE, "tx_bytes", last - first)?),
            )
        };

        results.push(OpResult {
            name: op.to_string(),
            request_rate,
            event_rates,
            rx_bytes_rate,
            tx_bytes_rate,
        });
    }
    Ok(Experiment {
        dir: dir.to_path_buf(),
        latencies,
        ops: results,
    })
}

#[test]
fn test_experiment_dir() {
    assert!(experiment_dir("../test_data/run", 1) == PathBuf::from("../test_data/run1"));
}

#[test]
fn test_load_experiment1() {
    let e = load_experiment("../test_data/run1", &OPERATIONS, &EventKind::ALL).unwrap();
    assert!(e.ops.len() == 4);
    let created = e.op("created").unwrap();
    assert!(created.request_rate == 8103.727715);
    // 5 events over one second
    assert!(created.event_rate(EventKind::ApicWrite).unwrap() == 5.0);
    assert!(created.event_rate(EventKind::ApicRead).unwrap() == 4.0);
    assert!(created.event_rate(EventKind::PioWrite).unwrap() == 3.0 / 0.5);
    assert!(created.rx_bytes_rate == Some(40000.0));
    assert!(created.tx_bytes_rate == Some(2000.0));

    let get = e.op("get").unwrap();
    assert!(get.rx_bytes_rate.is_none());
    assert!(e.op("watched").is_err());
}

#[test]
fn test_load_experiment2() {
    // bad1/set.txt has no pio_write events
    let e = load_experiment("../test_data/bad1", &OPERATIONS, &EventKind::ALL);
    assert!(e.is_err());
    assert!(format!("{:#}", e.unwrap_err()).contains("No event"));

    let e = load_experiment("../test_data/bad1", &["created"], &EventKind::ALL).unwrap();
    assert!(e.ops.len() == 1);
}
