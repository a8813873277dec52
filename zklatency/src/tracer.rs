// Kernel trace control.
//
// Tracing is switched on once for the whole test.  Each timed phase is a section: the trace pipe
// is drained of stale data, the interface counters are written to `<log_dir>/<name>.txt`, and the
// matching trace lines are streamed into the same file until the section ends, when the counters
// are appended again.  All the actual work is done by the shell commands in the TraceConfig.

use crate::configs::TraceConfig;

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

pub trait Tracer {
    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn begin_section(&mut self, name: &str) -> Result<()>;

    fn end_section(&mut self, name: &str) -> Result<()>;
}

/// For running without kernel tracing.

pub struct NoTracer;

impl Tracer for NoTracer {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn begin_section(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn end_section(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }
}

struct Capture {
    child: Child,
    pump: thread::JoinHandle<Result<usize>>,
}

pub struct KvmTracer {
    config: TraceConfig,
    log_dir: PathBuf,
    capture: Option<Capture>,
}

fn shell(cmd: &str) -> Command {
    let mut c = Command::new("sh");
    c.arg("-c").arg(cmd);
    c
}

fn run_command(cmd: &str) -> Result<()> {
    debug!("Running {:?}", cmd);
    let status = shell(cmd)
        .status()
        .with_context(|| format!("Failed to run {:?}", cmd))?;
    if !status.success() {
        bail!("{:?} failed ({})", cmd, &status);
    }
    Ok(())
}

/// Run `cmd` with its stdout going to `file`.

fn run_command_into(cmd: &str, file: File) -> Result<()> {
    debug!("Running {:?}", cmd);
    let status = shell(cmd)
        .stdout(Stdio::from(file))
        .status()
        .with_context(|| format!("Failed to run {:?}", cmd))?;
    if !status.success() {
        bail!("{:?} failed ({})", cmd, &status);
    }
    Ok(())
}

/// Copy the lines of `input` that contain `filter` to `output`; returns the number copied.

fn pump_lines<R: BufRead, W: Write>(input: R, mut output: W, filter: &str) -> Result<usize> {
    let mut n = 0;
    for line in input.lines() {
        let line = line?;
        if line.contains(filter) {
            writeln!(output, "{line}")?;
            n += 1;
        }
    }
    output.flush()?;
    Ok(n)
}

impl KvmTracer {
    pub fn new(config: TraceConfig, log_dir: &Path) -> Result<KvmTracer> {
        if !log_dir.is_dir() {
            bail!("Log directory {} does not exist", log_dir.display());
        }
        Ok(KvmTracer {
            config,
            log_dir: log_dir.to_path_buf(),
            capture: None,
        })
    }

    pub fn section_file(&self, name: &str) -> PathBuf {
        self.log_dir.join(format!("{name}.txt"))
    }

    // Read and discard whatever is buffered in the trace pipe.
    fn flush_trace_pipe(&self) -> Result<()> {
        let mut child = shell(&self.config.trace_pipe)
            .stdout(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to run {:?}", self.config.trace_pipe))?;
        thread::sleep(Duration::from_secs(self.config.flush_secs));
        self.kill_capture(&mut child);
        Ok(())
    }

    fn kill_capture(&self, child: &mut Child) {
        if let Err(e) = run_command(&self.config.stop_capture) {
            warn!("{e:#}");
        }
        if let Err(e) = child.kill() {
            debug!("Capture already gone: {e}");
        }
        if let Err(e) = child.wait() {
            warn!("Waiting for capture: {e}");
        }
    }
}

impl Tracer for KvmTracer {
    fn start(&mut self) -> Result<()> {
        info!("Enabling kernel tracing");
        run_command(&self.config.enable_trace)
    }

    fn stop(&mut self) -> Result<()> {
        info!("Disabling kernel tracing");
        run_command(&self.config.disable_trace)
    }

    fn begin_section(&mut self, name: &str) -> Result<()> {
        if self.capture.is_some() {
            bail!("Trace section {name} started inside another section");
        }
        self.flush_trace_pipe()?;

        let path = self.section_file(name);
        let file = File::create(&path).with_context(|| format!("Creating {}", path.display()))?;
        run_command_into(&self.config.ifstat, file)?;

        let out = OpenOptions::new()
            .append(true)
            .open(&path)
            .with_context(|| format!("Opening {}", path.display()))?;
        let mut child = shell(&self.config.trace_pipe)
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to run {:?}", self.config.trace_pipe))?;
        let stdout = match child.stdout.take() {
            Some(s) => s,
            None => bail!("No output from {:?}", self.config.trace_pipe),
        };
        let filter = self.config.event_filter.clone();
        let pump = thread::spawn(move || pump_lines(BufReader::new(stdout), out, &filter));
        info!("Tracing section {name} into {}", path.display());
        self.capture = Some(Capture { child, pump });
        Ok(())
    }

    fn end_section(&mut self, name: &str) -> Result<()> {
        let mut capture = match self.capture.take() {
            Some(c) => c,
            None => bail!("Trace section {name} ended without being started"),
        };
        self.kill_capture(&mut capture.child);
        let lines = match capture.pump.join() {
            Ok(r) => r?,
            Err(_) => bail!("Trace capture for {name} panicked"),
        };
        info!("Section {name}: {lines} trace lines");

        let path = self.section_file(name);
        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .with_context(|| format!("Opening {}", path.display()))?;
        run_command_into(&self.config.ifstat, file)
    }
}

#[test]
fn test_pump_lines() {
    let input = b"kvm_apic: apic_write\nsched_switch\nkvm_pio: pio_write\n";
    let mut out = vec![];
    assert!(pump_lines(&input[..], &mut out, "kvm_").unwrap() == 2);
    assert!(out == b"kvm_apic: apic_write\nkvm_pio: pio_write\n");
}

#[test]
fn test_kvm_tracer_with_shell() {
    // Stand-in commands: the "trace pipe" prints a few lines and exits.
    let dir = std::env::temp_dir().join(format!("zklatency-tracer-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let config = TraceConfig {
        enable_trace: "true".to_string(),
        disable_trace: "true".to_string(),
        trace_pipe: "printf ' x [000] 1.000000: kvm_apic: apic_write\\n x [000] 1.5: other\\n'".to_string(),
        stop_capture: "true".to_string(),
        ifstat: "echo vnet0 rx_bytes 10".to_string(),
        event_filter: "kvm_".to_string(),
        flush_secs: 0,
    };
    let mut t = KvmTracer::new(config, &dir).unwrap();
    t.start().unwrap();
    t.begin_section("created").unwrap();
    assert!(t.begin_section("set").is_err());
    // Let the stand-in pipe finish before it is killed
    thread::sleep(Duration::from_millis(500));
    t.end_section("created").unwrap();
    assert!(t.end_section("created").is_err());
    t.stop().unwrap();

    let text = std::fs::read_to_string(t.section_file("created")).unwrap();
    assert!(text == "vnet0 rx_bytes 10\n x [000] 1.000000: kvm_apic: apic_write\nvnet0 rx_bytes 10\n");
    std::fs::remove_dir_all(&dir).unwrap();

    assert!(KvmTracer::new(TraceConfig::default(), Path::new("/nonexistent/dir")).is_err());
}
