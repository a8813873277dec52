// Configuration files for the driver.
//
// The trace configuration is a JSON object naming the shell commands used to control and capture
// kernel tracing.  All fields are optional; missing fields take the defaults below, which are the
// commands for a single KVM guest `os_u1204_1` on interface `vnet0`:
//
//   enable_trace  - string, turns kvm tracing on
//   disable_trace - string, turns kvm tracing off
//   trace_pipe    - string, writes the trace pipe to stdout until killed
//   stop_capture  - string, kills whatever `trace_pipe` started (sudo children do not die with us);
//                   a `pkill -f` pattern must not match the stop command's own command line
//   ifstat        - string, prints interface counters as "<iface> <counter> <value>" lines
//   event_filter  - string, only trace lines containing this are kept
//   flush_secs    - integer, how long to drain stale trace data before a section
//
// See ../test_data/trace.json for an example.
//
// The ZooKeeper configuration is a server `zoo.cfg`: `key=value` lines, with the ensemble in
// `server.N=host:peerport:electionport` entries and the client port in `clientPort`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub enable_trace: String,
    pub disable_trace: String,
    pub trace_pipe: String,
    pub stop_capture: String,
    pub ifstat: String,
    pub event_filter: String,
    pub flush_secs: u64,
}

impl Default for TraceConfig {
    fn default() -> TraceConfig {
        TraceConfig {
            enable_trace: "sudo /home/depend/bin/enable_trace_kvm.sh 1".to_string(),
            disable_trace: "sudo /home/depend/bin/enable_trace_kvm.sh 0".to_string(),
            trace_pipe: "sudo cat /sys/kernel/debug/tracing/trace_pipe".to_string(),
            stop_capture: "sudo pkill -9 -f '[/]sys/kernel/debug/tracing/trace_pipe'".to_string(),
            ifstat: "sudo virsh domifstat os_u1204_1 vnet0".to_string(),
            event_filter: "kvm_".to_string(),
            flush_secs: 5,
        }
    }
}

pub fn read_trace_config(filename: &str) -> Result<TraceConfig> {
    let file = File::open(path::Path::new(filename))
        .with_context(|| format!("Opening trace config {filename}"))?;
    let config = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Parsing trace config {filename}"))?;
    Ok(config)
}

/// Read a `zoo.cfg` into a map.  Blank lines and `#` comments are skipped; any other line must be
/// `key=value`.

pub fn read_zk_config(filename: &str) -> Result<HashMap<String, String>> {
    let file = File::open(path::Path::new(filename))
        .with_context(|| format!("Opening ZooKeeper config {filename}"))?;
    let mut config = HashMap::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim_end();
        if line.is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        match line.split_once('=') {
            Some((k, v)) => {
                config.insert(k.trim().to_string(), v.to_string());
            }
            None => bail!("{filename}:{}: expected key=value", lineno + 1),
        }
    }
    Ok(config)
}

/// The connect strings to test, one session per element.  `--cluster` is a single connect string
/// for the whole ensemble; a `zoo.cfg` also yields the whole ensemble as one connect string;
/// otherwise `servers` is a comma-separated list tested in turn.

pub fn zk_servers(cluster: Option<&str>, config: Option<&str>, servers: &str) -> Result<Vec<String>> {
    if let Some(cluster) = cluster {
        return Ok(vec![cluster.to_string()]);
    }
    if let Some(filename) = config {
        let config = read_zk_config(filename)?;
        let client_port = match config.get("clientPort") {
            Some(p) => p.trim(),
            None => bail!("No clientPort in {filename}"),
        };
        let mut members = vec![];
        for (k, v) in config.iter() {
            if let Some(id) = k.strip_prefix("server.") {
                let id = id
                    .parse::<u32>()
                    .with_context(|| format!("Bad server id in {k}"))?;
                let host = v.split(':').next().unwrap_or_default().trim();
                members.push((id, format!("{host}:{client_port}")));
            }
        }
        if members.is_empty() {
            bail!("No server.N entries in {filename}");
        }
        members.sort();
        return Ok(vec![members
            .into_iter()
            .map(|(_, m)| m)
            .collect::<Vec<_>>()
            .join(",")]);
    }
    let servers = servers
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect::<Vec<_>>();
    if servers.is_empty() {
        bail!("No servers to test");
    }
    Ok(servers)
}

#[test]
fn test_read_trace_config() {
    let c = read_trace_config("../test_data/trace.json").unwrap();
    assert!(c.enable_trace == "sudo /home/depend/bin/enable_trace_kvm.sh 1");
    assert!(c.flush_secs == 5);
    // Not in the file
    assert!(c.event_filter == "kvm_");
    assert!(c.stop_capture == TraceConfig::default().stop_capture);

    assert!(read_trace_config("../test_data/nosuch.json").is_err());
    assert!(read_trace_config("../test_data/zoo.cfg").is_err());
}

#[test]
fn test_stop_capture_does_not_match_itself() {
    let c = TraceConfig::default();
    let target = "/sys/kernel/debug/tracing/trace_pipe";
    assert!(c.trace_pipe.contains(target));
    assert!(c.stop_capture.contains("[/]sys/kernel/debug/tracing/trace_pipe"));
    assert!(!c.stop_capture.contains(target));
}

#[test]
fn test_read_zk_config() {
    let c = read_zk_config("../test_data/zoo.cfg").unwrap();
    assert!(c.get("clientPort").unwrap() == "2181");
    assert!(c.get("server.2").unwrap() == "zk2.example.com:2888:3888");
    assert!(read_zk_config("../test_data/run1/latencies.txt").is_err());
}

#[test]
fn test_zk_servers() {
    let s = zk_servers(None, None, "a:2181,b:2182").unwrap();
    assert!(s == vec!["a:2181", "b:2182"]);

    let s = zk_servers(Some("a:1,b:2"), Some("../test_data/zoo.cfg"), "x:1").unwrap();
    assert!(s == vec!["a:1,b:2"]);

    let s = zk_servers(None, Some("../test_data/zoo.cfg"), "x:1").unwrap();
    assert!(s == vec!["zk1.example.com:2181,zk2.example.com:2181,zk3.example.com:2181"]);

    assert!(zk_servers(None, None, " , ").is_err());
}
