// Event counts per fixed-width time window.

use crate::events::EventSeries;
use crate::{Timestamp, USEC_PER_MSEC};
use anyhow::{bail, Result};

/// Count the events of `series` in consecutive windows of `resolution_ms` milliseconds, the first
/// window starting at `origin`.  Windows before the first event are zero, every event lands in
/// exactly one window, and the window holding the last event is the last element (even if it is
/// partial).
///
/// The series must be non-empty and must not have events before `origin`.

pub fn time_series(series: &EventSeries, origin: Timestamp, resolution_ms: u64) -> Result<Vec<u64>> {
    if resolution_ms == 0 {
        bail!("Resolution must be positive");
    }
    let (first, last) = series.span()?;
    if first < origin {
        bail!(
            "{} event at {} precedes the trace origin {}",
            series.kind(),
            first,
            origin
        );
    }
    let width = match resolution_ms.checked_mul(USEC_PER_MSEC) {
        Some(w) => w,
        None => bail!("Resolution {resolution_ms}ms is too large"),
    };
    let mut counts = vec![0u64; ((last - origin) / width + 1) as usize];
    for t in series.events() {
        counts[((t - origin) / width) as usize] += 1;
    }
    Ok(counts)
}

/// Keep the windows that start before `max_ms` milliseconds.

pub fn truncate_timeline(counts: &[u64], resolution_ms: u64, max_ms: Option<u64>) -> &[u64] {
    match max_ms {
        Some(max_ms) if resolution_ms > 0 => {
            let n = max_ms.div_ceil(resolution_ms) as usize;
            &counts[..n.min(counts.len())]
        }
        _ => counts,
    }
}

#[cfg(test)]
use crate::events::EventKind;

#[test]
fn test_time_series() {
    let mut s = EventSeries::new(EventKind::ApicWrite);
    // origin is 1_000_000; windows are 10ms
    for t in [1_025_000, 1_026_000, 1_031_000, 1_059_999, 1_060_000] {
        s.push(t);
    }
    let ts = time_series(&s, 1_000_000, 10).unwrap();
    assert!(ts == vec![0, 0, 2, 1, 0, 1, 1]);
    assert!(ts.iter().sum::<u64>() == s.len() as u64);
}

#[test]
fn test_time_series_single_window() {
    let mut s = EventSeries::new(EventKind::PioWrite);
    s.push(500);
    s.push(700);
    assert!(time_series(&s, 500, 1).unwrap() == vec![2]);
}

#[test]
fn test_time_series_errors() {
    let s = EventSeries::new(EventKind::PioWrite);
    assert!(time_series(&s, 0, 10).is_err());

    let mut s = EventSeries::new(EventKind::PioWrite);
    s.push(10);
    assert!(time_series(&s, 0, 0).is_err());
    assert!(time_series(&s, 20, 10).is_err());
    assert!(time_series(&s, 0, u64::MAX / 1000 + 1).is_err());
    assert!(time_series(&s, 0, 2_305_843_009_213_693_952).is_err());
    assert!(time_series(&s, 0, u64::MAX / 1000).unwrap() == vec![1]);
}

#[test]
fn test_truncate_timeline() {
    let ts = [1, 2, 3, 4, 5];
    assert!(truncate_timeline(&ts, 10, Some(30)) == [1, 2, 3]);
    // The window starting at 30 begins before 35
    assert!(truncate_timeline(&ts, 10, Some(35)) == [1, 2, 3, 4]);
    assert!(truncate_timeline(&ts, 10, Some(0)).is_empty());
    assert!(truncate_timeline(&ts, 10, Some(1000)) == ts);
    assert!(truncate_timeline(&ts, 10, None) == ts);
}
