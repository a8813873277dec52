// Event flows: how the APIC/PIO events of one experiment are distributed over time while each
// operation runs.  Every operation gets its own line chart, events per window against time since
// the start of the capture.

use crate::graph::{self, LineSeries};
use crate::{FlowsArgs, MetaArgs};

use anyhow::Result;
use itertools::Itertools;
use kvmtrace::{parse_tracelog, time_series, truncate_timeline, EventKind, TraceLog, OPERATIONS};
use log::info;
use std::io;
use std::path::{Path, PathBuf};

const COLOURS: [&str; 3] = ["blue", "red", "gold"];

/// The windowed counts of each event kind in `trace`, in `EventKind::ALL` order.

pub fn flows(trace: &TraceLog, resolution_ms: u64) -> Result<Vec<(EventKind, Vec<u64>)>> {
    let origin = trace.origin()?;
    let mut result = vec![];
    for kind in EventKind::ALL {
        result.push((kind, time_series(trace.series(kind)?, origin, resolution_ms)?));
    }
    Ok(result)
}

/// Chart lines for the flows, x in milliseconds, truncated to `max_ms`.

pub fn flow_lines(
    flows: &[(EventKind, Vec<u64>)],
    resolution_ms: u64,
    max_ms: Option<u64>,
) -> Vec<LineSeries> {
    flows
        .iter()
        .zip(COLOURS)
        .map(|((kind, counts), colour)| LineSeries {
            label: kind.name().to_string(),
            colour,
            points: truncate_timeline(counts, resolution_ms, max_ms)
                .iter()
                .enumerate()
                .map(|(i, c)| (i as f64 * resolution_ms as f64, *c as f64))
                .collect(),
        })
        .collect()
}

pub fn output_file(dir: &Path, op: &str, suffix: &str) -> PathBuf {
    dir.join(format!("{op}{suffix}.svg"))
}

pub fn print_and_plot_flows(
    output: &mut dyn io::Write,
    args: &FlowsArgs,
    _meta_args: &MetaArgs,
) -> Result<()> {
    let dir = Path::new(&args.input);
    for op in OPERATIONS {
        let trace = parse_tracelog(dir.join(format!("{op}.txt")), &EventKind::ALL)?;
        let flows = flows(&trace, args.resolution)?;

        writeln!(output, "{op}:")?;
        for (kind, counts) in &flows {
            writeln!(output, "\t{kind}: [{}]", counts.iter().join(", "))?;
        }

        let lines = flow_lines(&flows, args.resolution, args.max_timeline);
        let y_label = format!("throughput /{}msec", args.resolution);
        let view = graph::line_view(&lines, "time (msec)", &y_label, args.log_scale)?;
        if args.text {
            let text = graph::to_text(&lines, "time (msec)", &y_label, args.log_scale)?;
            writeln!(output, "{}\n", text)?;
        }
        let file = output_file(Path::new(&args.output_dir), op, &args.output_suffix);
        info!("{op}: plotting {} windows into {}", lines[0].points.len(), file.display());
        graph::save(&view, &file)?;
    }
    Ok(())
}

#[test]
fn test_flows() {
    let trace = parse_tracelog("../test_data/run1/created.txt", &EventKind::ALL).unwrap();
    let f = flows(&trace, 250).unwrap();
    assert!(f.len() == 3);
    // apic_write at 0, 250, 500, 750, 1000 ms
    assert!(f[0] == (EventKind::ApicWrite, vec![1, 1, 1, 1, 1]));
    // apic_read at 200, 700 ms
    assert!(f[1] == (EventKind::ApicRead, vec![1, 0, 1]));
    // pio_write at 100, 300, 600 ms
    assert!(f[2] == (EventKind::PioWrite, vec![1, 1, 1]));

    assert!(flows(&trace, 0).is_err());
}

#[test]
fn test_flow_lines() {
    let f = vec![
        (EventKind::ApicWrite, vec![3, 0, 2, 7]),
        (EventKind::PioWrite, vec![1]),
    ];
    let lines = flow_lines(&f, 10, Some(25));
    assert!(lines.len() == 2);
    assert!(lines[0].label == "APIC write");
    // Windows starting at 0, 10 and 20 begin before 25
    assert!(lines[0].points == vec![(0.0, 3.0), (10.0, 0.0), (20.0, 2.0)]);
    assert!(lines[1].points == vec![(0.0, 1.0)]);

    let lines = flow_lines(&f, 10, None);
    assert!(lines[0].points.len() == 4);
}

#[test]
fn test_output_file() {
    assert!(output_file(Path::new("."), "created", "") == PathBuf::from("./created.svg"));
    assert!(output_file(Path::new("plots"), "get", "_run1") == PathBuf::from("plots/get_run1.svg"));
}
