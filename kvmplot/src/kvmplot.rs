// `kvmplot` -- Summarize and plot KVM event rates from ZooKeeper latency experiments
//
// Run with --help for brief help.
//
// An experiment directory is produced by `zklatency --log-dir <dir> > <dir>/latencies.txt`: it
// holds the driver's report and one trace file per operation.  Repeated runs of the same experiment
// are directories with a common prefix and a numeric suffix.
//
// Quirks
//
// The y limits given to `rates` apply to all bar groups, and the request rates share the axis with
// the event rates even though their units can differ (with -u msec).  Log scale is applied to every
// group.
//
// `rates` draws the means only.  The run-to-run standard deviation is not shown as error bars on the
// chart; it is in the summary table.
//
// Windows in `flows` start at the first timestamped line of the trace, not at the first event of
// each kind, so the three lines of a chart share a time axis.

mod flows;
mod format;
mod graph;
mod rates;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use std::io;
use std::process;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print and plot per-operation request and event rates across experiment runs
    Rates(RatesCommand),

    /// Print and plot event counts over time for each operation of one experiment
    Flows(FlowsCommand),
}

#[derive(Args, Debug)]
pub struct RatesCommand {
    #[command(flatten)]
    rates_args: RatesArgs,

    #[command(flatten)]
    print_args: PrintArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct FlowsCommand {
    #[command(flatten)]
    flows_args: FlowsArgs,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unit {
    Sec,
    Msec,
}

impl Unit {
    pub fn name(&self) -> &'static str {
        match self {
            Unit::Sec => "sec",
            Unit::Msec => "msec",
        }
    }

    /// Number of this unit in a second.
    pub fn per_sec(&self) -> f64 {
        match self {
            Unit::Sec => 1.0,
            Unit::Msec => 1000.0,
        }
    }
}

#[derive(Args, Debug)]
pub struct RatesArgs {
    /// Experiment directory prefix; run N is read from <INPUT>N
    input: String,

    /// Index of the first run
    #[arg(short = 'm', long = "min-experiment-index", default_value_t = 1)]
    min_exp_idx: usize,

    /// Index of the last run (inclusive)
    #[arg(short = 'M', long = "max-experiment-index", default_value_t = 1)]
    max_exp_idx: usize,

    /// Top of the y axis
    #[arg(short = 'Y', long, default_value_t = 100000.0)]
    ylim_top: f64,

    /// Bottom of the y axis
    #[arg(short = 'y', long, default_value_t = 0.0)]
    ylim_bottom: f64,

    /// Chart file, .svg or .pdf
    #[arg(short = 'o', long = "output", default_value = "plot.svg")]
    output_file: String,

    /// Time unit for the request rates
    #[arg(short = 'u', long, value_enum, default_value_t = Unit::Sec)]
    latency_unit: Unit,

    /// Plot rates on a log10 scale
    #[arg(short = 'l', long, default_value_t = false)]
    log_scale: bool,
}

#[derive(Args, Debug)]
pub struct FlowsArgs {
    /// Experiment directory
    input: String,

    /// Suffix for the chart files, which are named <OP><SUFFIX>.svg
    #[arg(short = 'o', long, default_value = "")]
    output_suffix: String,

    /// Directory for the chart files
    #[arg(short = 'd', long, default_value = ".")]
    output_dir: String,

    /// Window width in milliseconds
    #[arg(short = 'r', long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    resolution: u64,

    /// Plot only this many milliseconds from the start of the trace [default: all]
    #[arg(short = 'M', long = "max-timeline")]
    max_timeline: Option<u64>,

    /// Plot counts on a log10 scale
    #[arg(short = 'l', long, default_value_t = false)]
    log_scale: bool,

    /// Also render the charts as text on stdout
    #[arg(long, default_value_t = false)]
    text: bool,
}

#[derive(Args, Debug, Default)]
pub struct PrintArgs {
    /// Select fields for the summary: op,series,mean,std,unit [default: all]
    #[arg(long)]
    fmt: Option<String>,

    /// Print the summary as CSV
    #[arg(long, default_value_t = false)]
    csv: bool,

    /// Print a header row (always on without --fmt)
    #[arg(long, default_value_t = false)]
    header: bool,
}

#[derive(Args, Debug, Default)]
pub struct MetaArgs {
    /// Print progress and diagnostics to stderr
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

fn main() {
    match kvmplot() {
        Ok(()) => {}
        Err(msg) => {
            eprintln!("ERROR: {:#}", msg);
            process::exit(1);
        }
    }
}

fn init_logging(meta_args: &MetaArgs) {
    let level = if meta_args.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn kvmplot() -> Result<()> {
    let cli = Cli::parse();

    let meta_args = match cli.command {
        Commands::Rates(ref c) => &c.meta_args,
        Commands::Flows(ref c) => &c.meta_args,
    };
    init_logging(meta_args);

    match cli.command {
        Commands::Rates(ref c) => {
            rates::aggregate_and_print_rates(&mut io::stdout(), &c.rates_args, &c.print_args, meta_args)
        }
        Commands::Flows(ref c) => {
            flows::print_and_plot_flows(&mut io::stdout(), &c.flows_args, meta_args)
        }
    }
}

#[test]
fn test_cli() {
    use clap::CommandFactory;
    Cli::command().debug_assert();

    let cli = Cli::try_parse_from(["kvmplot", "rates", "results", "-M", "3", "-u", "msec", "-l"]).unwrap();
    if let Commands::Rates(c) = cli.command {
        assert!(c.rates_args.input == "results");
        assert!(c.rates_args.min_exp_idx == 1);
        assert!(c.rates_args.max_exp_idx == 3);
        assert!(c.rates_args.latency_unit == Unit::Msec);
        assert!(c.rates_args.log_scale);
        assert!(c.rates_args.output_file == "plot.svg");
        assert!(c.rates_args.ylim_top == 100000.0);
    } else {
        panic!("Expected rates");
    }

    let cli = Cli::try_parse_from(["kvmplot", "flows", "results1", "-r", "5", "-M", "200"]).unwrap();
    if let Commands::Flows(c) = cli.command {
        assert!(c.flows_args.resolution == 5);
        assert!(c.flows_args.max_timeline == Some(200));
        assert!(c.flows_args.output_suffix == "");
        assert!(c.flows_args.output_dir == ".");
    } else {
        panic!("Expected flows");
    }

    assert!(Cli::try_parse_from(["kvmplot", "flows", "results1", "-r", "0"]).is_err());
    assert!(Cli::try_parse_from(["kvmplot", "rates", "results", "-u", "usec"]).is_err());
}

#[test]
fn test_rates_end_to_end() {
    let dir = std::env::temp_dir().join(format!("kvmplot-rates-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let out_file = dir.join("plot.svg");
    let cli = Cli::try_parse_from([
        "kvmplot",
        "rates",
        "../test_data/run",
        "-M",
        "2",
        "-o",
        out_file.to_str().unwrap(),
        "--fmt",
        "op,series,mean",
        "--csv",
    ])
    .unwrap();
    let mut out = vec![];
    if let Commands::Rates(c) = cli.command {
        rates::aggregate_and_print_rates(&mut out, &c.rates_args, &c.print_args, &c.meta_args).unwrap();
    }
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("MEANS: "));
    assert!(text.contains("get,zk_request,22500.000\n"));
    assert!(out_file.exists());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_flows_end_to_end() {
    let dir = std::env::temp_dir().join(format!("kvmplot-flows-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let cli = Cli::try_parse_from([
        "kvmplot",
        "flows",
        "../test_data/run1",
        "-r",
        "250",
        "-o",
        "_run1",
        "-d",
        dir.to_str().unwrap(),
        "--text",
    ])
    .unwrap();
    let mut out = vec![];
    if let Commands::Flows(c) = cli.command {
        flows::print_and_plot_flows(&mut out, &c.flows_args, &c.meta_args).unwrap();
    } else {
        panic!("Expected flows");
    }
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with(
        "created:\n\tapic_write: [1, 1, 1, 1, 1]\n\tapic_read: [1, 0, 1]\n\tpio_write: [1, 1, 1]\n"
    ));
    assert!(text.contains("\ndeleted:\n\tapic_write: [1, 1, 1, 1, 1]\n"));
    assert!(text.contains('●'));
    for op in ["created", "set", "get", "deleted"] {
        assert!(dir.join(format!("{op}_run1.svg")).exists());
    }
    std::fs::remove_dir_all(&dir).unwrap();
}
