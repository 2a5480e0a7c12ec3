//! Timeline and histogram rendering of call statistics
//!
//! Plots are plain SVG documents. The timeline draws one row per call with
//! its queued and running intervals; the histogram counts calls running in
//! each time bin.

use chrono::Utc;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::future::CallStats;
use crate::error::{ErrorExt, Result};

/// Pixels per inch of `figsize`
const DPI: f64 = 96.0;
const MARGIN: f64 = 48.0;
const HISTOGRAM_BINS: usize = 40;

/// Files written by one plot call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotReport {
    pub timeline: PathBuf,
    pub histogram: PathBuf,
}

/// Statistics of one call relative to the earliest submission
#[derive(Debug, Clone, PartialEq)]
struct Span {
    label: String,
    submitted: f64,
    started: Option<f64>,
    ended: Option<f64>,
}

fn spans(calls: &[(String, CallStats)]) -> (Vec<Span>, f64) {
    let origin = calls
        .iter()
        .filter_map(|(_, s)| s.host_submit_tstamp)
        .fold(f64::INFINITY, f64::min);
    let origin = if origin.is_finite() { origin } else { 0.0 };

    let spans: Vec<Span> = calls
        .iter()
        .map(|(label, s)| Span {
            label: label.clone(),
            submitted: s.host_submit_tstamp.unwrap_or(origin) - origin,
            started: s.worker_start_tstamp.map(|t| t - origin),
            ended: s.worker_end_tstamp.map(|t| t - origin),
        })
        .collect();

    let horizon = spans
        .iter()
        .flat_map(|s| [Some(s.submitted), s.started, s.ended])
        .flatten()
        .fold(0.0, f64::max)
        .max(1e-3);
    (spans, horizon)
}

fn canvas(figsize: (f64, f64)) -> (f64, f64) {
    (
        (figsize.0 * DPI).max(2.0 * MARGIN + 100.0),
        (figsize.1 * DPI).max(2.0 * MARGIN + 100.0),
    )
}

fn header(out: &mut String, width: f64, height: f64, title: &str) {
    let _ = writeln!(
        out,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w:.0}" height="{h:.0}" viewBox="0 0 {w:.0} {h:.0}" font-family="sans-serif" font-size="11">"#,
        w = width,
        h = height
    );
    let _ = writeln!(out, r#"<rect width="100%" height="100%" fill="white"/>"#);
    let _ = writeln!(
        out,
        r#"<text x="{:.1}" y="20" text-anchor="middle" font-size="14">{}</text>"#,
        width / 2.0,
        title
    );
}

fn axes(out: &mut String, width: f64, height: f64, horizon: f64, y_label: &str) {
    let (x0, y0, x1) = (MARGIN, height - MARGIN, width - MARGIN);
    let _ = writeln!(
        out,
        r#"<line x1="{x0:.1}" y1="{y0:.1}" x2="{x1:.1}" y2="{y0:.1}" stroke="black"/><line x1="{x0:.1}" y1="{m:.1}" x2="{x0:.1}" y2="{y0:.1}" stroke="black"/>"#,
        m = MARGIN
    );
    for tick in 0..=4 {
        let t = horizon * f64::from(tick) / 4.0;
        let x = x0 + (x1 - x0) * f64::from(tick) / 4.0;
        let _ = writeln!(
            out,
            r#"<text x="{x:.1}" y="{:.1}" text-anchor="middle">{t:.2}s</text>"#,
            y0 + 16.0
        );
    }
    let _ = writeln!(
        out,
        r#"<text x="14" y="{:.1}" transform="rotate(-90 14 {:.1})" text-anchor="middle">{}</text>"#,
        height / 2.0,
        height / 2.0,
        y_label
    );
}

/// Render the per-call timeline
pub fn render_timeline(calls: &[(String, CallStats)], figsize: (f64, f64)) -> String {
    let (width, height) = canvas(figsize);
    let (spans, horizon) = spans(calls);
    let mut out = String::new();
    header(&mut out, width, height, "Execution timeline");
    axes(&mut out, width, height, horizon, "call");

    let plot_w = width - 2.0 * MARGIN;
    let plot_h = height - 2.0 * MARGIN;
    let row_h = plot_h / spans.len().max(1) as f64;
    let x = |t: f64| MARGIN + plot_w * (t / horizon);

    for (i, span) in spans.iter().enumerate() {
        let y = MARGIN + row_h * i as f64;
        let bar_h = (row_h * 0.8).max(1.0);
        let queued_end = span.started.unwrap_or(span.submitted);
        let _ = writeln!(
            out,
            r##"<rect x="{:.2}" y="{y:.2}" width="{:.2}" height="{bar_h:.2}" fill="#9ecae1"><title>{} queued</title></rect>"##,
            x(span.submitted),
            (x(queued_end) - x(span.submitted)).max(0.0),
            span.label
        );
        if let (Some(start), Some(end)) = (span.started, span.ended) {
            let _ = writeln!(
                out,
                r##"<rect x="{:.2}" y="{y:.2}" width="{:.2}" height="{bar_h:.2}" fill="#3182bd"><title>{} {:.3}s</title></rect>"##,
                x(start),
                (x(end) - x(start)).max(1.0),
                span.label,
                end - start
            );
        }
    }
    out.push_str("</svg>\n");
    out
}

/// Count calls running within each of `bins` equal time slices
fn running_histogram(spans: &[Span], horizon: f64, bins: usize) -> Vec<usize> {
    let width = horizon / bins as f64;
    (0..bins)
        .map(|bin| {
            let (lo, hi) = (width * bin as f64, width * (bin + 1) as f64);
            spans
                .iter()
                .filter(|s| match (s.started, s.ended) {
                    (Some(start), Some(end)) => start < hi && end >= lo,
                    _ => false,
                })
                .count()
        })
        .collect()
}

/// Render the concurrency histogram
pub fn render_histogram(calls: &[(String, CallStats)], figsize: (f64, f64)) -> String {
    let (width, height) = canvas(figsize);
    let (spans, horizon) = spans(calls);
    let counts = running_histogram(&spans, horizon, HISTOGRAM_BINS);
    let peak = counts.iter().copied().max().unwrap_or(0).max(1);

    let mut out = String::new();
    header(&mut out, width, height, "Concurrent calls");
    axes(&mut out, width, height, horizon, "running calls");

    let plot_w = width - 2.0 * MARGIN;
    let plot_h = height - 2.0 * MARGIN;
    let bin_w = plot_w / HISTOGRAM_BINS as f64;
    for (bin, count) in counts.iter().enumerate() {
        let bar_h = plot_h * (*count as f64) / (peak as f64);
        let _ = writeln!(
            out,
            r##"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{bar_h:.2}" fill="#31a354"><title>{count}</title></rect>"##,
            MARGIN + bin_w * bin as f64,
            height - MARGIN - bar_h,
            (bin_w - 1.0).max(0.5)
        );
    }
    out.push_str("</svg>\n");
    out
}

/// Default destination prefix: `plots/<timestamp>`
pub fn default_dst() -> PathBuf {
    Path::new("plots").join(Utc::now().format("%Y%m%d_%H%M%S").to_string())
}

fn with_suffix(dst: &Path, suffix: &str) -> PathBuf {
    let mut name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(suffix);
    dst.with_file_name(name)
}

/// Write `<dst>_timeline.svg` and `<dst>_histogram.svg`
pub async fn write_plots(
    dst: &Path,
    calls: &[(String, CallStats)],
    figsize: (f64, f64),
) -> Result<PlotReport> {
    if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .to_storage_error(format!("cannot create plot directory {}", parent.display()))?;
    }
    let report = PlotReport {
        timeline: with_suffix(dst, "_timeline.svg"),
        histogram: with_suffix(dst, "_histogram.svg"),
    };
    for (path, svg) in [
        (&report.timeline, render_timeline(calls, figsize)),
        (&report.histogram, render_histogram(calls, figsize)),
    ] {
        fs::write(path, svg)
            .await
            .to_storage_error(format!("cannot write {}", path.display()))?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn call(label: &str, submit: f64, start: f64, end: f64) -> (String, CallStats) {
        (
            label.to_string(),
            CallStats {
                host_submit_tstamp: Some(submit),
                worker_start_tstamp: Some(start),
                worker_end_tstamp: Some(end),
                ..CallStats::default()
            },
        )
    }

    #[test]
    fn test_histogram_counts_overlap() {
        let calls = vec![call("a", 100.0, 100.0, 102.0), call("b", 100.0, 101.0, 104.0)];
        let (spans, horizon) = spans(&calls);
        assert_eq!(horizon, 4.0);

        let counts = running_histogram(&spans, horizon, 4);
        assert_eq!(counts, vec![1, 2, 2, 1]);
    }

    #[test]
    fn test_timeline_has_one_bar_per_running_call() {
        let calls = vec![call("a", 0.0, 0.5, 1.0), call("b", 0.0, 0.2, 0.4)];
        let svg = render_timeline(&calls, (10.0, 6.0));
        assert!(svg.starts_with("<svg"));
        assert_eq!(svg.matches("fill=\"#3182bd\"").count(), 2);
    }

    #[tokio::test]
    async fn test_write_plots_creates_both_files() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("nested").join("run1");
        let report = write_plots(&dst, &[call("a", 0.0, 0.1, 0.2)], (4.0, 3.0))
            .await
            .unwrap();
        assert!(report.timeline.ends_with("run1_timeline.svg"));
        assert!(report.timeline.exists());
        assert!(report.histogram.exists());
    }
}
