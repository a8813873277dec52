// `zklatency` -- Measure ZooKeeper operation latencies while capturing KVM trace events
//
// Run with --help for brief help.
//
// The driver connects to every server first, so that an unavailable server or an ensemble without
// quorum fails before any znode is created.  It then runs the latency test against each session in
// turn with kernel tracing enabled, writing one trace file per phase into the log directory, and
// prints the phase timings on stdout.  Redirect stdout to `<log-dir>/latencies.txt` to get an
// experiment directory that `kvmplot` can read.
//
// WARNING: with --force an existing root znode is emptied.  Never point this at a real znode.

mod configs;
mod dispatch;
mod latency;
mod session;
mod tracer;

#[cfg(test)]
mod memory;

use configs::TraceConfig;
use latency::TestOptions;
use session::{Session, ZkSession};
use tracer::{KvmTracer, NoTracer, Tracer};

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;
use std::io;
use std::path::Path;
use std::process;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Comma-separated list of host:port, tested in turn
    #[arg(long, default_value = "localhost:2181")]
    servers: String,

    /// Comma-separated list of host:port, tested as one ensemble (overrides --servers)
    #[arg(long)]
    cluster: Option<String>,

    /// ZooKeeper configuration file (zoo.cfg) to take the ensemble from
    #[arg(long)]
    config: Option<String>,

    /// Session timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    timeout: u64,

    /// Root for the test, created and deleted by the test
    #[arg(long, default_value = "/zk-latencies")]
    root_znode: String,

    /// Data size in bytes when creating and setting znodes
    #[arg(long, default_value_t = 2500)]
    znode_size: usize,

    /// Number of znodes to operate on in each phase
    #[arg(long, default_value_t = 10000, value_parser = clap::value_parser!(u64).range(1..))]
    znode_count: u64,

    /// Number of watches to put on each znode
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    watch_multiple: u64,

    /// Run even if the root znode exists, deleting its children
    #[arg(long, default_value_t = false)]
    force: bool,

    /// Issue operations one at a time instead of in asynchronous batches
    #[arg(long, default_value_t = false)]
    synchronous: bool,

    /// Number of threads issuing operations in asynchronous batches
    #[arg(long, default_value_t = 16, value_parser = clap::value_parser!(u64).range(1..))]
    async_workers: u64,

    /// Directory for the per-phase trace files
    #[arg(long, short = 'l', default_value = "./")]
    log_dir: String,

    /// JSON file with the trace control commands [default: built-in commands]
    #[arg(long)]
    trace_config: Option<String>,

    /// Do not touch kernel tracing
    #[arg(long, default_value_t = false, conflicts_with = "trace_config")]
    no_trace: bool,

    /// Print progress to stderr
    #[arg(long, short, default_value_t = false)]
    verbose: bool,

    /// Print only errors to stderr
    #[arg(long, short, default_value_t = false, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn test_options(&self) -> TestOptions {
        TestOptions {
            root_znode: self.root_znode.clone(),
            znode_count: self.znode_count as usize,
            watch_multiple: self.watch_multiple as usize,
            synchronous: self.synchronous,
            async_workers: self.async_workers as usize,
            force: self.force,
            data: vec![b'x'; self.znode_size],
        }
    }

    fn tracer(&self) -> Result<Box<dyn Tracer>> {
        if self.no_trace {
            return Ok(Box::new(NoTracer));
        }
        let config = match self.trace_config {
            Some(ref filename) => configs::read_trace_config(filename)?,
            None => TraceConfig::default(),
        };
        Ok(Box::new(KvmTracer::new(config, Path::new(&self.log_dir))?))
    }
}

fn main() {
    match zklatency() {
        Ok(()) => {}
        Err(msg) => {
            eprintln!("ERROR: {:#}", msg);
            process::exit(1);
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        LevelFilter::Error
    } else if cli.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn zklatency() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let servers = configs::zk_servers(cli.cluster.as_deref(), cli.config.as_deref(), &cli.servers)?;
    let mut tracer = cli.tracer()?;
    let opts = cli.test_options();

    let timeout = Duration::from_millis(cli.timeout);
    let mut sessions: Vec<Box<dyn Session>> = vec![];
    for server in &servers {
        sessions.push(Box::new(ZkSession::connect(server, timeout)?));
    }

    latency::run_latency_tests(&mut io::stdout(), &sessions, &servers, tracer.as_mut(), &opts)
}

#[test]
fn test_cli() {
    use clap::CommandFactory;
    Cli::command().debug_assert();

    let cli = Cli::try_parse_from(["zklatency"]).unwrap();
    assert!(cli.servers == "localhost:2181");
    assert!(cli.timeout == 5000);
    assert!(cli.log_dir == "./");
    assert!(!cli.synchronous);
    let opts = cli.test_options();
    assert!(opts.root_znode == "/zk-latencies");
    assert!(opts.znode_count == 10000);
    assert!(opts.watch_multiple == 1);
    assert!(opts.async_workers == 16);
    assert!(opts.data.len() == 2500);

    let cli = Cli::try_parse_from([
        "zklatency",
        "--cluster",
        "a:1,b:2",
        "--znode-count",
        "10",
        "--znode-size",
        "3",
        "--synchronous",
        "--force",
        "-l",
        "/tmp",
        "--no-trace",
        "-q",
    ])
    .unwrap();
    assert!(cli.cluster.as_deref() == Some("a:1,b:2"));
    assert!(cli.log_dir == "/tmp");
    assert!(cli.quiet);
    let opts = cli.test_options();
    assert!(opts.synchronous && opts.force);
    assert!(opts.data == b"xxx");
    assert!(cli.tracer().is_ok());

    assert!(Cli::try_parse_from(["zklatency", "--znode-count", "0"]).is_err());
    assert!(Cli::try_parse_from(["zklatency", "-v", "-q"]).is_err());
    assert!(Cli::try_parse_from(["zklatency", "--no-trace", "--trace-config", "t.json"]).is_err());
}

#[test]
fn test_tracer_config() {
    let cli = Cli::try_parse_from([
        "zklatency",
        "--trace-config",
        "../test_data/trace.json",
        "-l",
        "../test_data",
    ])
    .unwrap();
    assert!(cli.tracer().is_ok());

    let cli = Cli::try_parse_from(["zklatency", "--trace-config", "../test_data/nosuch.json"]).unwrap();
    assert!(cli.tracer().is_err());

    let cli = Cli::try_parse_from(["zklatency", "-l", "../test_data/nosuch"]).unwrap();
    assert!(cli.tracer().is_err());
}
