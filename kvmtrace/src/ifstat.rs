// Interface counters as printed by `virsh domifstat <domain> <iface>`:
//
//   vnet0 rx_bytes 7286
//   vnet0 rx_packets 81
//   vnet0 tx_bytes 13408
//   ...
//
// The driver writes one block before a capture and one after, so the first and last value of each
// counter bracket the traced section.

use anyhow::{bail, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn counter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(\S+)\s+((?:rx|tx)_\w+)\s+([0-9]+)\s*$").expect("static regex")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sample {
    first: u64,
    last: u64,
    count: usize,
}

#[derive(Debug, Default, Clone)]
pub struct IfStats {
    // (iface, counter) -> samples
    counters: BTreeMap<(String, String), Sample>,
}

impl IfStats {
    pub fn new() -> IfStats {
        IfStats::default()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Record the line if it is a counter line.  Returns true if it was.

    pub fn add_line(&mut self, line: &str) -> bool {
        let caps = match counter_re().captures(line) {
            Some(caps) => caps,
            None => return false,
        };
        let value = match caps[3].parse::<u64>() {
            Ok(v) => v,
            Err(_) => return false,
        };
        let key = (caps[1].to_string(), caps[2].to_string());
        self.counters
            .entry(key)
            .and_modify(|s| {
                s.last = value;
                s.count += 1;
            })
            .or_insert(Sample {
                first: value,
                last: value,
                count: 1,
            });
        true
    }

    /// Counter increase between the first and the last block.

    pub fn delta(&self, iface: &str, counter: &str) -> Result<u64> {
        match self.counters.get(&(iface.to_string(), counter.to_string())) {
            None => bail!("Absent throughput counters: no {iface} {counter}"),
            Some(s) if s.count < 2 => {
                bail!("Absent throughput counters: only one {iface} {counter} sample")
            }
            Some(s) => {
                if s.last < s.first {
                    bail!("Counter {iface} {counter} went backwards ({} -> {})", s.first, s.last);
                }
                Ok(s.last - s.first)
            }
        }
    }

    /// Counter increase per second over `duration_usec`.

    pub fn throughput(&self, iface: &str, counter: &str, duration_usec: u64) -> Result<f64> {
        let delta = self.delta(iface, counter)?;
        if duration_usec == 0 {
            bail!("Zero duration for {iface} {counter} throughput");
        }
        Ok(delta as f64 * crate::USEC_PER_SEC as f64 / duration_usec as f64)
    }
}

#[test]
fn test_ifstat() {
    let mut s = IfStats::new();
    assert!(s.add_line("vnet0 rx_bytes 1000"));
    assert!(s.add_line("vnet0 tx_bytes 50"));
    assert!(!s.add_line(" qemu-4312 [001] .... 7715.123456: kvm_apic: apic_write APIC_EOI = 0x0"));
    assert!(!s.add_line("vnet0 rx_bytes"));
    assert!(s.add_line("vnet0 rx_bytes 3000"));
    assert!(s.add_line("vnet0 tx_bytes 50"));

    assert!(s.delta("vnet0", "rx_bytes").unwrap() == 2000);
    assert!(s.delta("vnet0", "tx_bytes").unwrap() == 0);
    assert!(s.throughput("vnet0", "rx_bytes", 500_000).unwrap() == 4000.0);

    let e = s.delta("vnet1", "rx_bytes").unwrap_err();
    assert!(e.to_string().starts_with("Absent throughput counters"));
    assert!(s.throughput("vnet0", "rx_bytes", 0).is_err());
}

#[test]
fn test_ifstat_single_sample() {
    let mut s = IfStats::new();
    assert!(s.add_line("vnet0 rx_packets 12"));
    assert!(s.delta("vnet0", "rx_packets").is_err());

    // Not a counter line
    assert!(!s.add_line("vnet0 rx_packets \u{0661}\u{0662}"));
    assert!(s.delta("vnet0", "rx_packets").is_err());
}
