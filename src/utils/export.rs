//! Reporting for a finished sample series.
//!
//! - `write_csv`: one line per record: `timestamp_ms,latency_ms` (or the error message
//!   when the record carries no latency).
//! - `draw_chart`: SVG line chart of latency over stream time with the threshold line.
//! - `log_latency_errors`: debug listing of every failure plus the configured threshold.
//! - `SeriesStats`: min / mean / p95 / max of the measured latencies.

use std::{fs::create_dir_all, path::Path};

use log::{debug, info};
use plotters::prelude::*;
use statrs::statistics::{Data, Distribution, Max, Min, OrderStatistics};

use crate::error::ReportError;
use crate::utils::series::{MeasurementRecord, SampleSeries};

/// Summary of the measured latencies (milliseconds).
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesStats {
    pub min_ms: f64,
    pub mean_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
    pub count: usize,
    pub failures: usize,
}

impl SeriesStats {
    /// `None` when no record carries a latency.
    pub fn from_series(series: &SampleSeries) -> Option<Self> {
        let values: Vec<f64> = series.latencies().map(|(_, l)| as_ms(l)).collect();
        if values.is_empty() {
            return None;
        }
        let count = values.len();
        let mut data = Data::new(values);
        Some(Self {
            min_ms: data.min(),
            mean_ms: data.mean().unwrap_or(0.0),
            p95_ms: data.percentile(95),
            max_ms: data.max(),
            count,
            failures: series.failure_count(),
        })
    }
}

#[inline]
fn as_ms(d: std::time::Duration) -> f64 {
    d.as_secs_f64() * 1_000.0
}

/// Second CSV column of a record.
fn csv_value(record: &MeasurementRecord) -> String {
    match (&record.latency, &record.error) {
        (Some(latency), _) => latency.as_millis().to_string(),
        (None, Some(error)) => error.to_string(),
        (None, None) => String::new(),
    }
}

/// Writes the series as headerless CSV, one record per line, in timestamp order.
pub fn write_csv<P: AsRef<Path>>(series: &SampleSeries, path: P) -> Result<(), ReportError> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        create_dir_all(dir)?;
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    for record in series {
        writer.write_record([record.timestamp.as_millis().to_string(), csv_value(record)])?;
    }
    writer.flush()?;

    info!("Latency series ({} records) exported to: {:?}", series.len(), path);
    Ok(())
}

fn chart_err<E: std::fmt::Display>(e: E) -> ReportError {
    ReportError::Chart(e.to_string())
}

/// Renders latency (ms) over stream time (s) as an SVG chart.
/// Failures are marked with red dots; the threshold is drawn as a horizontal line.
pub fn draw_chart<P: AsRef<Path>>(
    series: &SampleSeries,
    title: &str,
    path: P,
    width: u32,
    height: u32,
) -> Result<(), ReportError> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        create_dir_all(dir)?;
    }

    let points: Vec<(f64, f64)> = series
        .latencies()
        .map(|(t, l)| (t.as_secs_f64(), as_ms(l)))
        .collect();
    let failures: Vec<(f64, f64)> = series
        .failures()
        .filter_map(|r| r.latency.map(|l| (r.timestamp.as_secs_f64(), as_ms(l))))
        .collect();
    let threshold_ms = as_ms(series.configured_threshold());

    let x_min = points.first().map(|p| p.0).unwrap_or(0.0);
    let x_max = points.last().map(|p| p.0).unwrap_or(1.0).max(x_min + 1.0);
    let y_max = points
        .iter()
        .map(|p| p.1)
        .fold(threshold_ms, f64::max)
        * 1.1;

    let root = SVGBackend::new(path, (width, height)).into_drawing_area();
    root.fill(&WHITE).map_err(chart_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 16))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(x_min..x_max, 0f64..y_max.max(1.0))
        .map_err(chart_err)?;

    chart
        .configure_mesh()
        .x_desc("Time (s)")
        .y_desc("Latency (ms)")
        .draw()
        .map_err(chart_err)?;

    chart
        .draw_series(LineSeries::new(points, &BLUE))
        .map_err(chart_err)?;
    chart
        .draw_series(LineSeries::new(
            vec![(x_min, threshold_ms), (x_max, threshold_ms)],
            &RED,
        ))
        .map_err(chart_err)?;
    chart
        .draw_series(failures.into_iter().map(|p| Circle::new(p, 3, RED.filled())))
        .map_err(chart_err)?;

    root.present().map_err(chart_err)?;
    info!("Latency chart exported to: {:?}", path);
    Ok(())
}

/// Logs every failure of the series at debug level; returns the failure count.
pub fn log_latency_errors(series: &SampleSeries, name: &str) -> usize {
    debug!("---------------------------------------------");
    debug!("LATENCY ERRORS {}", name);
    debug!("---------------------------------------------");
    let mut errors = 0;
    for record in series.failures() {
        errors += 1;
        if let Some(e) = &record.error {
            debug!("{}", e);
        }
    }
    debug!(
        "{} errors of latency detected (threshold: {:?})",
        errors,
        series.configured_threshold()
    );
    debug!("---------------------------------------------");
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LatencyError;
    use std::{fs, time::Duration};

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn sample_series() -> SampleSeries {
        let mut s = SampleSeries::new(ms(100));
        s.insert(MeasurementRecord::measured(ms(2000), ms(40), None, None));
        s.insert(MeasurementRecord::measured(ms(1000), ms(20), None, None));
        s.insert(MeasurementRecord::measured(
            ms(3000),
            ms(200),
            None,
            Some(LatencyError::LatencyThresholdExceeded {
                observed: ms(200),
                threshold: ms(100),
                context: String::new(),
            }),
        ));
        s.insert(MeasurementRecord::failed(
            ms(4000),
            LatencyError::ProbeFailed {
                reason: "no video".into(),
                context: String::new(),
            },
        ));
        s
    }

    #[test]
    fn csv_has_one_line_per_record_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latency.csv");
        write_csv(&sample_series(), &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "1000,20");
        assert_eq!(lines[1], "2000,40");
        assert_eq!(lines[2], "3000,200");
        assert!(lines[3].starts_with("4000,"));
        assert!(lines[3].contains("no video"));
    }

    #[test]
    fn chart_is_written_as_svg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("charts").join("latency.svg");
        draw_chart(&sample_series(), "loopback", &path, 500, 270).unwrap();
        let svg = fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[test]
    fn chart_of_empty_series_still_renders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.svg");
        draw_chart(&SampleSeries::new(ms(100)), "empty", &path, 300, 200).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn stats_cover_measured_latencies() {
        let stats = SeriesStats::from_series(&sample_series()).unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.min_ms, 20.0);
        assert_eq!(stats.max_ms, 200.0);
        assert!((stats.mean_ms - 86.666).abs() < 0.01);
        assert!(SeriesStats::from_series(&SampleSeries::new(ms(1))).is_none());
    }

    #[test]
    fn logged_error_count_matches_series() {
        assert_eq!(log_latency_errors(&sample_series(), "test"), 2);
    }
}
