// Chart rendering.  Charts are drawn with plotlib as SVG; a `.pdf` output name renders the SVG next
// to it and converts it with rsvg-convert.

use anyhow::{bail, Result};
use log::{debug, info};
use plotlib::page::Page;
use plotlib::repr::{BarChart, Plot};
use plotlib::style::{BoxStyle, LineStyle, PointMarker, PointStyle};
use plotlib::view::{CategoricalView, ContinuousView, View};
use std::path::{Path, PathBuf};
use std::process::Command;

const SVG_SIZE: (u32, u32) = (720, 540);
const TEXT_SIZE: (u32, u32) = (80, 24);

/// One series of a grouped bar chart: a value per category.

pub struct BarGroup {
    pub label: String,
    pub colour: &'static str,
    pub values: Vec<f64>,
}

/// One line of a line chart.

pub struct LineSeries {
    pub label: String,
    pub colour: &'static str,
    pub points: Vec<(f64, f64)>,
}

pub struct BarChartSpec<'a> {
    pub title: &'a str,
    pub categories: &'a [&'a str],
    pub groups: &'a [BarGroup],
    pub y_range: (f64, f64),
    pub log_scale: bool,
}

/// Value transform for a log-scaled axis.  Counts and rates below 1 are clamped to 1 so that the
/// axis starts at zero.

pub fn log_value(v: f64) -> f64 {
    v.max(1.0).log10()
}

/// Grouped bars: for every category one bar per group, in group order.  The x axis labels are
/// `category:group`.

pub fn bar_view(spec: &BarChartSpec) -> Result<CategoricalView> {
    let (ymin, ymax) = if spec.log_scale {
        (log_value(spec.y_range.0), log_value(spec.y_range.1))
    } else {
        spec.y_range
    };
    if ymin >= ymax {
        bail!("Empty y range [{}, {}]", spec.y_range.0, spec.y_range.1);
    }
    let mut view = CategoricalView::new();
    for (i, category) in spec.categories.iter().enumerate() {
        for group in spec.groups {
            let v = match group.values.get(i) {
                Some(v) => *v,
                None => bail!("Series '{}' has no value for '{category}'", group.label),
            };
            let v = if spec.log_scale { log_value(v) } else { v };
            view = view.add(
                BarChart::new(v.clamp(ymin, ymax))
                    .label(format!("{category}:{}", group.label))
                    .style(&BoxStyle::new().fill(group.colour)),
            );
        }
    }
    let y_label = if spec.log_scale {
        "log10(rate)".to_string()
    } else {
        "rate".to_string()
    };
    Ok(view
        .y_range(ymin, ymax)
        .x_label(format!("Operations - {}", spec.title))
        .y_label(y_label))
}

// Text rendering cannot draw lines, so the text view marks the data points instead.
fn continuous_view(
    lines: &[LineSeries],
    x_label: &str,
    y_label: &str,
    log_scale: bool,
    text: bool,
) -> ContinuousView {
    let mut x_max = 0.0f64;
    let mut y_max = 0.0f64;
    let mut view = ContinuousView::new();
    for (i, line) in lines.iter().enumerate() {
        if line.points.is_empty() {
            continue;
        }
        let points = line
            .points
            .iter()
            .map(|(x, y)| (*x, if log_scale { log_value(*y) } else { *y }))
            .collect::<Vec<_>>();
        for (x, y) in &points {
            x_max = x_max.max(*x);
            y_max = y_max.max(*y);
        }
        let plot = if text {
            let marker = match i % 3 {
                0 => PointMarker::Circle,
                1 => PointMarker::Square,
                _ => PointMarker::Cross,
            };
            Plot::new(points).point_style(PointStyle::new().marker(marker))
        } else {
            Plot::new(points).line_style(LineStyle::new().colour(line.colour))
        };
        view = view.add(plot.legend(line.label.clone()));
    }
    if x_max <= 0.0 {
        x_max = 1.0;
    }
    if y_max <= 0.0 {
        y_max = 1.0;
    }
    let y_label = if log_scale {
        format!("log10({y_label})")
    } else {
        y_label.to_string()
    };
    // Text cells at the very top of the range fall off the face
    let x_top = if text { x_max * 1.05 } else { x_max };
    view.x_range(0.0, x_top)
        .y_range(0.0, y_max * 1.1)
        .x_label(x_label)
        .y_label(y_label)
}

pub fn line_view(
    lines: &[LineSeries],
    x_label: &str,
    y_label: &str,
    log_scale: bool,
) -> Result<ContinuousView> {
    Ok(continuous_view(lines, x_label, y_label, log_scale, false))
}

/// Render `lines` as text, for the terminal.  Series are marked with a circle, a square, and a
/// cross in turn.

pub fn to_text(lines: &[LineSeries], x_label: &str, y_label: &str, log_scale: bool) -> Result<String> {
    let view = continuous_view(lines, x_label, y_label, log_scale, true);
    match Page::single(&view)
        .dimensions(TEXT_SIZE.0, TEXT_SIZE.1)
        .to_text()
    {
        Ok(s) => Ok(s),
        Err(e) => bail!("Failed to render text graph ({})", &e),
    }
}

fn svg_path(output: &Path) -> PathBuf {
    output.with_extension("svg")
}

/// Save `view` to `output`.  The extension selects the format, svg or pdf.

pub fn save(view: &dyn View, output: &Path) -> Result<()> {
    let pdf = match output.extension().and_then(|e| e.to_str()) {
        Some("svg") => false,
        Some("pdf") => true,
        _ => bail!("Output {:?} must end in .svg or .pdf", output),
    };
    let svg = svg_path(output);
    if let Err(e) = Page::single(view)
        .dimensions(SVG_SIZE.0, SVG_SIZE.1)
        .save(&svg)
    {
        bail!("Failed to plot graph into {:?} ({})", &svg, &e);
    }
    if pdf {
        svg_to_pdf(&svg, output)?;
    }
    info!("Wrote {}", output.display());
    Ok(())
}

fn svg_to_pdf(svg: &Path, pdf: &Path) -> Result<()> {
    debug!("Converting {:?} to {:?}", svg, pdf);
    let status = match Command::new("rsvg-convert")
        .args(["-f", "pdf", "-o"])
        .arg(pdf)
        .arg(svg)
        .status()
    {
        Ok(status) => status,
        Err(e) => bail!("Failed to run rsvg-convert ({}), is librsvg installed?", &e),
    };
    if !status.success() {
        bail!("rsvg-convert failed converting {:?} ({})", svg, &status);
    }
    Ok(())
}

#[cfg(test)]
fn test_groups() -> Vec<BarGroup> {
    vec![
        BarGroup {
            label: "zk".to_string(),
            colour: "blue",
            values: vec![10.0, 20.0],
        },
        BarGroup {
            label: "apic".to_string(),
            colour: "red",
            values: vec![1000.0, 0.5],
        },
    ]
}

#[test]
fn test_log_value() {
    assert!(log_value(1000.0) == 3.0);
    assert!(log_value(0.0) == 0.0);
    assert!(log_value(0.5) == 0.0);
}

#[test]
fn test_bar_view() {
    let groups = test_groups();
    let spec = BarChartSpec {
        title: "test",
        categories: &["created", "set"],
        groups: &groups,
        y_range: (0.0, 100.0),
        log_scale: false,
    };
    assert!(bar_view(&spec).is_ok());

    // Missing value for the second category
    let short = vec![BarGroup {
        label: "zk".to_string(),
        colour: "blue",
        values: vec![1.0],
    }];
    let spec = BarChartSpec {
        groups: &short,
        ..spec
    };
    assert!(bar_view(&spec).is_err());
}

#[test]
fn test_bar_view_range() {
    let groups = test_groups();
    let spec = BarChartSpec {
        title: "test",
        categories: &["created"],
        groups: &groups,
        y_range: (10.0, 10.0),
        log_scale: true,
    };
    assert!(bar_view(&spec).is_err());
}

#[test]
fn test_line_view_text() {
    let lines = vec![LineSeries {
        label: "APIC write".to_string(),
        colour: "blue",
        points: vec![(0.0, 1.0), (10.0, 5.0), (20.0, 2.0)],
    }];
    let text = to_text(&lines, "time (msec)", "events", false).unwrap();
    assert!(text.contains("time (msec)"));
    assert!(text.matches('●').count() >= 3);

    // Second series gets squares; empty series are left out
    let lines = vec![
        LineSeries {
            label: "APIC read".to_string(),
            colour: "red",
            points: vec![],
        },
        LineSeries {
            label: "PIO write".to_string(),
            colour: "gold",
            points: vec![(0.0, 3.0), (10.0, 0.0)],
        },
    ];
    let text = to_text(&lines, "time (msec)", "events", true).unwrap();
    assert!(text.contains('■'));
    assert!(!text.contains('●'));
}

#[test]
fn test_save_bad_extension() {
    let lines = vec![LineSeries {
        label: "x".to_string(),
        colour: "blue",
        points: vec![(0.0, 1.0), (1.0, 2.0)],
    }];
    let view = line_view(&lines, "x", "y", false).unwrap();
    let dir = std::env::temp_dir().join(format!("kvmplot-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    assert!(save(&view, &dir.join("plot.png")).is_err());
    assert!(save(&view, &dir.join("plot.svg")).is_ok());
    assert!(dir.join("plot.svg").exists());
    std::fs::remove_dir_all(&dir).unwrap();
}
