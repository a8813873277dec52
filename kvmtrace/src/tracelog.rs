// Scan a captured trace file.
//
// The file is whatever the driver wrote for one traced section: a block of interface counters, the
// `kvm_` lines from trace_pipe, and another block of counters.  Every line is offered to every
// requested event series and to the counter collector; the first timestamp on any line becomes the
// origin of the section's timeline.

use crate::events::{parse_timestamp, EventKind, EventSeries};
use crate::ifstat::IfStats;
use crate::Timestamp;
use anyhow::{bail, Context, Result};
use log::debug;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Debug)]
pub struct TraceLog {
    series: Vec<EventSeries>,
    origin: Option<Timestamp>,
    ifstats: IfStats,
    lines: usize,
}

impl TraceLog {
    /// Read the trace from `reader`, collecting a series for each of `kinds`.  Lines that are not
    /// valid UTF8 are decoded lossily.

    pub fn from_reader<R: BufRead>(mut reader: R, kinds: &[EventKind]) -> Result<TraceLog> {
        let mut series = kinds.iter().map(|k| EventSeries::new(*k)).collect::<Vec<_>>();
        let mut origin = None;
        let mut ifstats = IfStats::new();
        let mut lines = 0;
        let mut buf = vec![];
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            lines += 1;
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
            if origin.is_none() {
                origin = parse_timestamp(line)?;
            }
            if ifstats.add_line(line) {
                continue;
            }
            for s in series.iter_mut() {
                s.try_add(line)?;
            }
        }
        for s in series.iter_mut() {
            s.finish();
        }
        Ok(TraceLog {
            series,
            origin,
            ifstats,
            lines,
        })
    }

    pub fn series(&self, kind: EventKind) -> Result<&EventSeries> {
        match self.series.iter().find(|s| s.kind() == kind) {
            Some(s) => Ok(s),
            None => bail!("Event kind {kind} was not collected"),
        }
    }

    /// The first timestamp in the file, on any line.

    pub fn origin(&self) -> Result<Timestamp> {
        match self.origin {
            Some(t) => Ok(t),
            None => bail!("No event: trace has no timestamped lines"),
        }
    }

    /// First and last event across all collected series.

    pub fn event_span(&self) -> Result<(Timestamp, Timestamp)> {
        let mut span: Option<(Timestamp, Timestamp)> = None;
        for s in self.series.iter().filter(|s| !s.is_empty()) {
            let (first, last) = s.span()?;
            span = Some(match span {
                None => (first, last),
                Some((f, l)) => (f.min(first), l.max(last)),
            });
        }
        match span {
            Some(span) => Ok(span),
            None => bail!("No event: trace has no collected events"),
        }
    }

    pub fn ifstats(&self) -> &IfStats {
        &self.ifstats
    }

    pub fn num_lines(&self) -> usize {
        self.lines
    }
}

/// Parse the trace file at `path`.  I/O errors and malformed event lines are errors.

pub fn parse_tracelog<P: AsRef<Path>>(path: P, kinds: &[EventKind]) -> Result<TraceLog> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Opening trace {}", path.display()))?;
    let log = TraceLog::from_reader(BufReader::new(file), kinds)
        .with_context(|| format!("Reading trace {}", path.display()))?;
    debug!("{}: {} lines", path.display(), log.num_lines());
    Ok(log)
}

#[test]
fn test_parse_tracelog1() {
    // No such file
    assert!(parse_tracelog("../test_data/nosuch/created.txt", &EventKind::ALL).is_err());
}

#[test]
fn test_parse_tracelog2() {
    let log = parse_tracelog("../test_data/run1/created.txt", &EventKind::ALL).unwrap();
    assert!(log.series(EventKind::ApicWrite).unwrap().len() == 5);
    assert!(log.series(EventKind::ApicRead).unwrap().len() == 2);
    assert!(log.series(EventKind::PioWrite).unwrap().len() == 3);
    assert!(log.origin().unwrap() == 100_000_000);
    assert!(log.event_span().unwrap() == (100_000_000, 101_000_000));
    assert!(log.ifstats().delta("vnet0", "rx_bytes").unwrap() == 40000);
}

#[test]
fn test_parse_tracelog3() {
    // A matching line without a timestamp terminates the parse.
    let input = b"vnet0 rx_bytes 1\n x [000] 1.000000: kvm_apic: apic_write\nkvm_apic: apic_write\n";
    assert!(TraceLog::from_reader(&input[..], &EventKind::ALL).is_err());
}

#[test]
fn test_trace_origin() {
    // The origin comes from any timestamped line, not only from collected events.
    let input = b" x [000] 5.000000: kvm_exit: reason IO\n x [000] 6.000000: kvm_pio: pio_write at 0x70\n";
    let log = TraceLog::from_reader(&input[..], &[EventKind::PioWrite]).unwrap();
    assert!(log.origin().unwrap() == 5_000_000);
    assert!(log.series(EventKind::PioWrite).unwrap().len() == 1);
    assert!(log.series(EventKind::ApicRead).is_err());

    let log = TraceLog::from_reader(&b"nothing here\n"[..], &EventKind::ALL).unwrap();
    assert!(log.origin().is_err());
    assert!(log.event_span().is_err());
}
