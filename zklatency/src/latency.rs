// The latency test proper.
//
// For each session the test runs seven timed phases over `znode_count` children of the root znode,
// each phase inside a trace section of the same name:
//
//   created      create permanent znodes
//   set          set their data
//   get          read their data
//   deleted      delete them
//   created_eph  create ephemeral znodes
//   watched_eph  leave `watch_multiple` watches on each
//   deleted_eph  delete them, which fires the watches
//
// and then waits for all the watch notifications to arrive.  Every phase prints one line:
//
//   <msg> in <ms> ms (<ms/op> ms/op <rate>/sec)
//
// or, when the phase took less than a millisecond, `<msg> in <ms> ms (included in prior)`.  These
// are the lines that kvmtrace::LatencyReport reads back.
//
// In synchronous mode each phase issues its operations one at a time.  In asynchronous mode all the
// operations of a phase are submitted to a worker pool up front and the completions are then
// waited on in submission order.

use crate::dispatch::submit_and_wait;
use crate::session::{CountingWatcher, NodeMode, Session};
use crate::tracer::Tracer;

use anyhow::{bail, Result};
use log::info;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(60);

pub struct TestOptions {
    pub root_znode: String,
    pub znode_count: usize,
    pub watch_multiple: usize,
    pub synchronous: bool,
    pub async_workers: usize,
    pub force: bool,
    pub data: Vec<u8>,
}

impl TestOptions {
    pub fn child_path(&self, i: usize) -> String {
        format!("{}/session_{}", self.root_znode, i)
    }

    pub fn mode_name(&self) -> &'static str {
        if self.synchronous {
            "synchronous"
        } else {
            "asynchronous"
        }
    }
}

enum Batches {
    Synchronous,
    Asynchronous(usize),
}

impl Batches {
    fn run<T, F>(&self, count: usize, op: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> Result<T> + Sync,
    {
        match self {
            Batches::Synchronous => (0..count).map(op).collect(),
            Batches::Asynchronous(workers) => submit_and_wait(*workers, count, op),
        }
    }
}

pub fn format_elapsed(msg: &str, elapsed: Duration, count: usize) -> String {
    let elapms = elapsed.as_secs_f64() * 1000.0;
    if elapms as u64 != 0 {
        format!(
            "{} in {:6} ms ({:.6} ms/op {:.6}/sec)",
            msg,
            elapms as u64,
            elapms / count as f64,
            count as f64 / (elapms / 1000.0)
        )
    } else {
        format!("{} in {:6} ms (included in prior)", msg, elapms as u64)
    }
}

// Run `f` inside the trace section `name` and report its time.  The section is ended even if `f`
// fails.
fn timed<F>(
    output: &mut dyn io::Write,
    tracer: &mut dyn Tracer,
    name: &str,
    msg: &str,
    count: usize,
    f: F,
) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    tracer.begin_section(name)?;
    let start = Instant::now();
    let result = f();
    let elapsed = start.elapsed();
    let ended = tracer.end_section(name);
    result?;
    ended?;
    writeln!(output, "{}", format_elapsed(msg, elapsed, count))?;
    Ok(())
}

fn check_paths(paths: &[String], opts: &TestOptions) -> Result<()> {
    for (j, p) in paths.iter().enumerate() {
        if *p != opts.child_path(j) {
            bail!("invalid path {p} for operation {j}");
        }
    }
    Ok(())
}

fn latency_test(
    output: &mut dyn io::Write,
    s: &dyn Session,
    tracer: &mut dyn Tracer,
    opts: &TestOptions,
    batches: Batches,
) -> Result<()> {
    let n = opts.znode_count;
    let data = &opts.data[..];

    timed(output, tracer, "created", &format!("created {:7} permanent znodes ", n), n, || {
        let paths = batches.run(n, |j| s.create(&opts.child_path(j), data, NodeMode::Persistent))?;
        check_paths(&paths, opts)
    })?;

    timed(output, tracer, "set", &format!("set     {:7} permanent znodes ", n), n, || {
        batches.run(n, |j| s.set(&opts.child_path(j), data))?;
        Ok(())
    })?;

    timed(output, tracer, "get", &format!("get     {:7} permanent znodes ", n), n, || {
        let values = batches.run(n, |j| s.get(&opts.child_path(j)))?;
        for (j, v) in values.iter().enumerate() {
            if v != data {
                bail!("invalid data ({} bytes) for operation {j}", v.len());
            }
        }
        Ok(())
    })?;

    timed(output, tracer, "deleted", &format!("deleted {:7} permanent znodes ", n), n, || {
        batches.run(n, |j| s.delete(&opts.child_path(j)))?;
        Ok(())
    })?;

    timed(output, tracer, "created_eph", &format!("created {:7} ephemeral znodes ", n), n, || {
        let paths = batches.run(n, |j| s.create(&opts.child_path(j), data, NodeMode::Ephemeral))?;
        check_paths(&paths, opts)
    })?;

    // Watch k is on node k % n for watcher k / n.
    let watchers = (0..opts.watch_multiple)
        .map(|_| Arc::new(CountingWatcher::new()))
        .collect::<Vec<_>>();
    let nw = opts.watch_multiple * n;
    timed(output, tracer, "watched_eph", &format!("watched {:7} ephemeral znodes ", nw), nw, || {
        let found = batches.run(nw, |k| {
            s.exists_watch(&opts.child_path(k % n), watchers[k / n].clone())
        })?;
        if let Some(k) = found.iter().position(|x| !x) {
            bail!("missing node {} for operation {k}", opts.child_path(k % n));
        }
        Ok(())
    })?;

    timed(output, tracer, "deleted_eph", &format!("deleted {:7} ephemeral znodes ", n), n, || {
        batches.run(n, |j| s.delete(&opts.child_path(j)))?;
        Ok(())
    })?;

    let start = Instant::now();
    for w in &watchers {
        let got = w.wait_for_expected(n, NOTIFICATION_TIMEOUT);
        if got != n {
            bail!("wrong number of watches: {got}");
        }
    }
    writeln!(
        output,
        "{}",
        format_elapsed(&format!("notif   {:7}           watches", nw), start.elapsed(), nw)
    )?;
    Ok(())
}

pub fn synchronous_latency_test(
    output: &mut dyn io::Write,
    s: &dyn Session,
    tracer: &mut dyn Tracer,
    opts: &TestOptions,
) -> Result<()> {
    latency_test(output, s, tracer, opts, Batches::Synchronous)
}

pub fn asynchronous_latency_test(
    output: &mut dyn io::Write,
    s: &dyn Session,
    tracer: &mut dyn Tracer,
    opts: &TestOptions,
) -> Result<()> {
    latency_test(output, s, tracer, opts, Batches::Asynchronous(opts.async_workers))
}

/// Make sure the root znode exists and is empty.  An existing root is an error unless `force` is
/// set, in which case its children are removed.

pub fn prepare_root(s: &dyn Session, opts: &TestOptions) -> Result<()> {
    let root = &opts.root_znode;
    if s.exists(root)? {
        if !opts.force {
            bail!("Node {root} already exists!");
        }
        let children = s.children(root)?;
        info!("Removing {} children of {root}", children.len());
        for child in children {
            s.delete(&format!("{root}/{child}"))?;
        }
    } else {
        let description = format!(
            "smoketest root, delete after test done, created {}",
            chrono::Local::now().format("%a %b %e %H:%M:%S %Y")
        );
        s.create(root, description.as_bytes(), NodeMode::Persistent)?;
    }
    Ok(())
}

fn test_sessions(
    output: &mut dyn io::Write,
    sessions: &[Box<dyn Session>],
    servers: &[String],
    tracer: &mut dyn Tracer,
    opts: &TestOptions,
) -> Result<()> {
    for (s, server) in sessions.iter().zip(servers) {
        writeln!(
            output,
            "Testing latencies on server {} using {} calls",
            server,
            opts.mode_name()
        )?;
        if opts.synchronous {
            synchronous_latency_test(output, s.as_ref(), tracer, opts)?;
        } else {
            asynchronous_latency_test(output, s.as_ref(), tracer, opts)?;
        }
    }
    Ok(())
}

/// Run the test on every session in turn, `sessions[i]` being connected to `servers[i]`.  The root
/// znode is managed through the first session.  Tracing is disabled again even if a test fails.

pub fn run_latency_tests(
    output: &mut dyn io::Write,
    sessions: &[Box<dyn Session>],
    servers: &[String],
    tracer: &mut dyn Tracer,
    opts: &TestOptions,
) -> Result<()> {
    if sessions.len() != servers.len() {
        bail!("{} sessions for {} servers", sessions.len(), servers.len());
    }
    let first = match sessions.first() {
        Some(s) => s.as_ref(),
        None => bail!("No sessions to test"),
    };
    prepare_root(first, opts)?;

    tracer.start()?;
    let tested = test_sessions(output, sessions, servers, tracer, opts);
    let stopped = tracer.stop();
    tested?;
    stopped?;

    first.delete(&opts.root_znode)?;
    for s in sessions {
        s.close()?;
    }
    writeln!(output, "Latency test complete")?;
    Ok(())
}

#[cfg(test)]
fn test_options(n: usize, synchronous: bool) -> TestOptions {
    TestOptions {
        root_znode: "/zk-latencies".to_string(),
        znode_count: n,
        watch_multiple: 2,
        synchronous,
        async_workers: 4,
        force: false,
        data: vec![b'x'; 25],
    }
}

#[test]
fn test_format_elapsed() {
    assert!(
        format_elapsed("created    1000 permanent znodes ", Duration::from_millis(250), 1000)
            == "created    1000 permanent znodes  in    250 ms (0.250000 ms/op 4000.000000/sec)"
    );
    assert!(
        format_elapsed("deleted      10 ephemeral znodes ", Duration::from_micros(900), 10)
            == "deleted      10 ephemeral znodes  in      0 ms (included in prior)"
    );
}

#[test]
fn test_child_path() {
    let opts = test_options(1, true);
    assert!(opts.child_path(17) == "/zk-latencies/session_17");
    assert!(opts.mode_name() == "synchronous");
}

#[test]
fn test_prepare_root() {
    use crate::memory::MemorySession;

    let s = MemorySession::new();
    let mut opts = test_options(1, true);
    prepare_root(&s, &opts).unwrap();
    assert!(s.exists("/zk-latencies").unwrap());
    assert!(String::from_utf8(s.get("/zk-latencies").unwrap())
        .unwrap()
        .starts_with("smoketest root, delete after test done, created "));

    s.create("/zk-latencies/stale", b"", NodeMode::Persistent).unwrap();
    let e = prepare_root(&s, &opts).unwrap_err();
    assert!(e.to_string() == "Node /zk-latencies already exists!");

    opts.force = true;
    prepare_root(&s, &opts).unwrap();
    assert!(s.children("/zk-latencies").unwrap().is_empty());
}

#[cfg(test)]
fn check_run(synchronous: bool) {
    use crate::memory::MemorySession;
    use crate::tracer::NoTracer;

    let opts = test_options(50, synchronous);
    let first = MemorySession::with_delay(Duration::from_micros(100));
    let second = first.sibling();
    let sessions: Vec<Box<dyn Session>> = vec![Box::new(first), Box::new(second)];
    let servers = vec!["a:2181".to_string(), "b:2181".to_string()];
    let mut out = vec![];
    run_latency_tests(&mut out, &sessions, &servers, &mut NoTracer, &opts).unwrap();

    let text = String::from_utf8(out).unwrap();
    let lines = text.lines().collect::<Vec<_>>();
    assert!(lines.len() == 2 * 9 + 1);
    assert!(lines[0] == format!("Testing latencies on server a:2181 using {} calls", opts.mode_name()));
    assert!(lines[1].starts_with("created      50 permanent znodes  in "));
    assert!(lines[6].starts_with("watched     100 ephemeral znodes  in "));
    assert!(lines[8].starts_with("notif       100           watches in "));
    assert!(lines[9] == format!("Testing latencies on server b:2181 using {} calls", opts.mode_name()));
    assert!(lines[18] == "Latency test complete");

    // The report reads back, and the second server's numbers win.
    let report = kvmtrace::LatencyReport::from_reader(text.as_bytes()).unwrap();
    assert!(report.znode_count() == Some(50));
    for op in ["created", "set", "get", "deleted"] {
        assert!(report.rate(op).unwrap() > 0.0);
    }
    assert!(report.ephemeral_rate("watched").unwrap() > 0.0);

    // Root is gone again
    assert!(!sessions[0].exists("/zk-latencies").unwrap());
}

#[test]
fn test_run_synchronous() {
    check_run(true);
}

#[test]
fn test_run_asynchronous() {
    check_run(false);
}

#[cfg(test)]
struct Recorder(Vec<String>);

#[cfg(test)]
impl Tracer for Recorder {
    fn start(&mut self) -> Result<()> {
        self.0.push("start".to_string());
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.0.push("stop".to_string());
        Ok(())
    }

    fn begin_section(&mut self, name: &str) -> Result<()> {
        self.0.push(format!("begin {name}"));
        Ok(())
    }

    fn end_section(&mut self, name: &str) -> Result<()> {
        self.0.push(format!("end {name}"));
        Ok(())
    }
}

#[test]
fn test_trace_sections() {
    use crate::memory::MemorySession;

    let opts = test_options(3, false);
    let sessions: Vec<Box<dyn Session>> = vec![Box::new(MemorySession::new())];
    let mut tracer = Recorder(vec![]);
    let mut out = vec![];
    run_latency_tests(&mut out, &sessions, &["x:1".to_string()], &mut tracer, &opts).unwrap();
    assert!(
        tracer.0
            == vec![
                "start",
                "begin created",
                "end created",
                "begin set",
                "end set",
                "begin get",
                "end get",
                "begin deleted",
                "end deleted",
                "begin created_eph",
                "end created_eph",
                "begin watched_eph",
                "end watched_eph",
                "begin deleted_eph",
                "end deleted_eph",
                "stop",
            ]
    );
}

#[test]
fn test_phase_failure_stops_tracing() {
    use crate::memory::MemorySession;

    let opts = test_options(3, false);
    let sessions: Vec<Box<dyn Session>> =
        vec![Box::new(MemorySession::failing_on("/zk-latencies/session_1"))];
    let mut tracer = Recorder(vec![]);
    let mut out = vec![];
    let e = run_latency_tests(&mut out, &sessions, &["x:1".to_string()], &mut tracer, &opts)
        .unwrap_err();
    assert!(format!("{:#}", e) == "Operation 1: create /zk-latencies/session_1: injected failure");
    assert!(tracer.0 == vec!["start", "begin created", "end created", "stop"]);
    assert!(String::from_utf8(out).unwrap() == "Testing latencies on server x:1 using asynchronous calls\n");

    // Also the first failure in a synchronous batch
    let opts = test_options(3, true);
    let s = MemorySession::failing_on("/zk-latencies/session_1");
    prepare_root(&s, &opts).unwrap();
    let mut out = vec![];
    let e = synchronous_latency_test(&mut out, &s, &mut Recorder(vec![]), &opts).unwrap_err();
    assert!(format!("{:#}", e) == "create /zk-latencies/session_1: injected failure");
}
