// Event extraction from ftrace text output (trace_pipe).
//
// A trace line looks like this:
//
//   qemu-system-x86-4312  [001] ....  7715.123456: kvm_apic: apic_write APIC_EOI = 0x0
//
// The timestamp is the `<sec>.<frac>:` token preceded by whitespace and followed by whitespace.
// An event kind is recognized by a marker substring anywhere in the line.

use crate::{Timestamp, USEC_PER_SEC};
use anyhow::{bail, Result};
use log::warn;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    ApicWrite,
    ApicRead,
    PioWrite,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::ApicWrite, EventKind::ApicRead, EventKind::PioWrite];

    /// The substring that identifies a line as carrying this event.

    pub fn marker(&self) -> &'static str {
        match self {
            EventKind::ApicWrite => "apic_write",
            EventKind::ApicRead => "apic_read",
            EventKind::PioWrite => "pio_write",
        }
    }

    /// Human-readable name, used for legends.

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ApicWrite => "APIC write",
            EventKind::ApicRead => "APIC read",
            EventKind::PioWrite => "PIO write",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.marker())
    }
}

fn timestamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s([0-9]+)\.([0-9]+):\s").expect("static regex"))
}

/// Return the timestamp of the line in microseconds, or None if the line has no timestamp token.
///
/// The fractional part is a decimal fraction of a second; ftrace prints six digits, shorter
/// fractions are padded and longer ones truncated to microsecond precision.  An error is returned
/// only if the seconds do not fit.

pub fn parse_timestamp(line: &str) -> Result<Option<Timestamp>> {
    let caps = match timestamp_re().captures(line) {
        Some(caps) => caps,
        None => return Ok(None),
    };
    let secs = match caps[1].parse::<u64>() {
        Ok(s) => s,
        Err(_) => bail!("Wrong format: timestamp out of range in {:?}", line),
    };
    let frac = &caps[2];
    let mut usecs = 0u64;
    for i in 0..6 {
        let digit = frac.as_bytes().get(i).map(|b| (b - b'0') as u64).unwrap_or(0);
        usecs = usecs * 10 + digit;
    }
    match secs
        .checked_mul(USEC_PER_SEC)
        .and_then(|s| s.checked_add(usecs))
    {
        Some(t) => Ok(Some(t)),
        None => bail!("Wrong format: timestamp out of range in {:?}", line),
    }
}

/// The timestamps of all events of one kind within one trace file, in file order until `finish` is
/// called, ascending afterwards.

#[derive(Debug, Clone)]
pub struct EventSeries {
    kind: EventKind,
    events: Vec<Timestamp>,
    ordered: bool,
}

impl EventSeries {
    pub fn new(kind: EventKind) -> EventSeries {
        EventSeries {
            kind,
            events: vec![],
            ordered: true,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn events(&self) -> &[Timestamp] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Add the line's timestamp if the line carries this series' event.  Returns true if the line
    /// was taken.  A matching line without a timestamp is an error.

    pub fn try_add(&mut self, line: &str) -> Result<bool> {
        if !line.contains(self.kind.marker()) {
            return Ok(false);
        }
        match parse_timestamp(line)? {
            Some(t) => {
                self.push(t);
                Ok(true)
            }
            None => bail!("Wrong format: no timestamp on {} line {:?}", self.kind, line),
        }
    }

    pub fn push(&mut self, t: Timestamp) {
        if let Some(last) = self.events.last() {
            if t < *last {
                self.ordered = false;
            }
        }
        self.events.push(t);
    }

    /// Make the series ascending.  Trace buffers are per-CPU and trace_pipe can interleave them
    /// slightly out of order.

    pub fn finish(&mut self) {
        if !self.ordered {
            warn!(
                "{}: {} events arrived out of order, sorting",
                self.kind,
                self.events.len()
            );
            self.events.sort();
            self.ordered = true;
        }
    }

    /// First and last timestamp.

    pub fn span(&self) -> Result<(Timestamp, Timestamp)> {
        match (self.events.first(), self.events.last()) {
            (Some(first), Some(last)) => Ok((*first, *last)),
            _ => bail!("No event: no {} events in trace", self.kind),
        }
    }

    /// Event arrival rate in events per second over the span of the series.

    pub fn rate(&self) -> Result<f64> {
        let (first, last) = self.span()?;
        let duration = last - first;
        if duration == 0 {
            bail!(
                "Zero duration: all {} {} events have the same timestamp",
                self.events.len(),
                self.kind
            );
        }
        Ok(self.events.len() as f64 * USEC_PER_SEC as f64 / duration as f64)
    }
}

#[test]
fn test_parse_timestamp() {
    let line = " qemu-system-x86-4312  [001] ....  7715.123456: kvm_apic: apic_write APIC_EOI = 0x0";
    assert!(parse_timestamp(line).unwrap() == Some(7715123456));

    // Short fraction is a fraction, not a microsecond count
    assert!(parse_timestamp("cpu 12.5: kvm_pio: pio_write").unwrap() == Some(12500000));

    // Long fraction is truncated
    assert!(parse_timestamp("cpu 1.0000019: x").unwrap() == Some(1000001));

    // No timestamp at all
    assert!(parse_timestamp("vnet0 rx_bytes 1234").unwrap().is_none());
    assert!(parse_timestamp("7715.123456: kvm_apic").unwrap().is_none());

    // Overflow
    assert!(parse_timestamp("x 99999999999999999999.000001: y").is_err());

    // Only ASCII digits make a timestamp
    assert!(parse_timestamp("x 1.\u{0663}\u{0663}: kvm_apic: apic_write").unwrap().is_none());
    assert!(parse_timestamp("x \u{0661}.000001: kvm_apic: apic_write").unwrap().is_none());
}

#[test]
fn test_event_series() {
    let mut s = EventSeries::new(EventKind::ApicWrite);
    assert!(!s.try_add(" x [000] 1.000000: kvm_apic: apic_read APIC_ESR").unwrap());
    assert!(s.try_add(" x [000] 1.000000: kvm_apic: apic_write APIC_EOI").unwrap());
    assert!(s.try_add(" x [000] 1.500000: kvm_apic: apic_write APIC_EOI").unwrap());
    assert!(s.try_add(" x [000] 2.000000: kvm_apic: apic_write APIC_EOI").unwrap());
    assert!(s.len() == 3);
    assert!(s.rate().unwrap() == 3.0);

    // Fail fast on a matching line without a timestamp
    assert!(s.try_add("apic_write without time").is_err());
    assert!(s.try_add(" x [000] 2.\u{0663}\u{0663}: kvm_apic: apic_write APIC_EOI").is_err());
    assert!(s.len() == 3);
}

#[test]
fn test_event_series_errors() {
    let s = EventSeries::new(EventKind::PioWrite);
    let e = s.rate().unwrap_err();
    assert!(e.to_string().starts_with("No event"));

    let mut s = EventSeries::new(EventKind::PioWrite);
    s.push(5);
    assert!(s.rate().is_err());
}

#[test]
fn test_event_series_ordering() {
    let mut s = EventSeries::new(EventKind::ApicRead);
    s.push(30);
    s.push(10);
    s.push(20);
    s.finish();
    assert!(s.events() == [10, 20, 30]);
    assert!(s.span().unwrap() == (10, 30));
}
