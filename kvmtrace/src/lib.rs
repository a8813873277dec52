// This library reads the text logs produced by a ZooKeeper latency run with KVM tracing enabled: the
// kernel trace captured per operation, the interface counters written around each capture, and the
// latency report printed by the driver.  It reduces them to rates, time series, and cross-run
// statistics.
//
// All failures are reported as errors and are expected to terminate the caller; there is no
// attempt to recover from a malformed log.

mod events;
mod experiment;
mod ifstat;
mod latencies;
mod series;
mod timeline;
mod tracelog;

/// Microseconds since the trace clock's epoch.

pub type Timestamp = u64;

pub const USEC_PER_SEC: u64 = 1_000_000;
pub const USEC_PER_MSEC: u64 = 1_000;

// Extract the trace timestamp from a line, and accumulate per-kind event series with their rates.

pub use events::{parse_timestamp, EventKind, EventSeries};

// Scan one trace file into event series, a timeline origin, and interface counters.

pub use tracelog::{parse_tracelog, TraceLog};

// Bucket an event series into fixed-width windows for plotting.

pub use timeline::{time_series, truncate_timeline};

// Interface counters (`virsh domifstat` output) and throughput derived from them.

pub use ifstat::IfStats;

// The per-operation rates printed by the latency driver.

pub use latencies::{parse_latencies, LatencyReport, ZnodeKind};

// Per-run by per-operation values and their column statistics.

pub use series::Series2D;

// One experiment directory, fully reduced.

pub use experiment::{experiment_dir, load_experiment, Experiment, OpResult, OPERATIONS};
