//! # Latency check entry point
//! Runs one latency session against the synthetic loopback stream and exports the series.
//!
//! ## Modes (`[session] mode`)
//! - **paired:** two `ColorPoller`s (local / remote) feed the controller; latency is the
//!   skew between matching color changes.
//! - **local:** the controller samples a local latency probe every `poll_interval`.
//!
//! ## Outputs
//! - `<output_dir>/latency.csv`: `timestamp_ms,latency_ms` per record.
//! - `<output_dir>/latency.svg`: latency chart with the threshold line.
//!
//! Configuration: `latency.toml` (or the path given as first argument), overridden by
//! `LATENCY_*` environment variables. Logging via `RUST_LOG`.

use std::{
    process::ExitCode,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use log::{error, info, warn};

use latency_controller::{
    config::{HarnessConfig, SessionMode},
    controller::{LatencyController, RunSummary},
    error::Result,
    loopback::LoopbackSource,
    signal::{event::SignalSide, poller::ColorPoller},
    utils::{
        export::{draw_chart, log_latency_errors, write_csv, SeriesStats},
        metrics::LiveMetrics,
        series::SampleSeries,
    },
};

const DEFAULT_CONFIG_PATH: &str = "latency.toml";

fn main() -> ExitCode {
    env_logger::init();
    info!("=== LATENCY CHECK START ===");

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let harness = match HarnessConfig::load_from(&path) {
        Ok(h) => h,
        Err(e) => {
            error!("Failed to load configuration from {}: {}", path, e);
            return ExitCode::from(2);
        }
    };
    let config = match harness.controller_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid controller configuration: {}", e);
            return ExitCode::from(2);
        }
    };

    let metrics = LiveMetrics::new();
    let controller = LatencyController::new(config).with_monitor(Arc::new(metrics.clone()));
    let name = controller.name().to_string();

    let (series, outcome) = match harness.session.mode {
        SessionMode::Paired => run_paired(controller, &harness),
        SessionMode::Local => run_local(controller, &harness),
    };

    export(&series, &name, &harness);

    let snapshot = metrics.snapshot();
    info!(
        "Live metrics: {} accepted samples, {} threshold breaches",
        snapshot.accepted, snapshot.latency_errors
    );

    match outcome {
        Ok(summary) => {
            info!(
                "=== LATENCY CHECK FINISHED: {:?} after {:.1}s ===",
                summary.termination,
                summary.elapsed.as_secs_f64()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("=== LATENCY CHECK FAILED: {} ===", e);
            ExitCode::FAILURE
        }
    }
}

fn run_paired(
    mut controller: LatencyController,
    harness: &HarnessConfig,
) -> (SampleSeries, Result<RunSummary>) {
    let s = &harness.session;
    let source = LoopbackSource::new(Duration::from_millis(s.color_period_ms));
    let period = Duration::from_millis(s.probe_period_ms);
    let running = Arc::new(AtomicBool::new(true));

    let local = ColorPoller::new(
        "local",
        period,
        controller.register_source(SignalSide::Local),
        running.clone(),
    )
    .spawn(source.local());
    let remote = ColorPoller::new(
        "remote",
        period,
        controller.register_source(SignalSide::Remote),
        running.clone(),
    )
    .spawn(source.remote(
        Duration::from_millis(s.remote_delay_ms),
        Duration::from_millis(s.remote_jitter_ms),
    ));

    let outcome = controller.run(Some(harness.session_duration()));

    running.store(false, Ordering::Release);
    for (side, handle) in [(SignalSide::Local, local), (SignalSide::Remote, remote)] {
        match handle.join() {
            Ok(stats) => info!(
                "{} poller: {} polls, {} events, {} late wake-ups",
                side, stats.polls, stats.events, stats.late_wakeups
            ),
            Err(_) => error!("{} poller thread panicked", side),
        }
    }

    (controller.into_series(), outcome)
}

fn run_local(
    mut controller: LatencyController,
    harness: &HarnessConfig,
) -> (SampleSeries, Result<RunSummary>) {
    let s = &harness.session;
    let source = LoopbackSource::new(Duration::from_millis(s.color_period_ms));
    let mut feed = source.latency_feed(
        Duration::from_millis(s.remote_delay_ms),
        Duration::from_millis(s.remote_jitter_ms),
    );
    let outcome = controller.run_local(harness.session_duration(), &mut feed);
    (controller.into_series(), outcome)
}

fn export(series: &SampleSeries, name: &str, harness: &HarnessConfig) {
    let s = &harness.session;
    log_latency_errors(series, name);

    match SeriesStats::from_series(series) {
        Some(stats) => info!(
            "Latency over {} samples: min {:.1} ms, mean {:.1} ms, p95 {:.1} ms, max {:.1} ms ({} failures)",
            stats.count, stats.min_ms, stats.mean_ms, stats.p95_ms, stats.max_ms, stats.failures
        ),
        None => warn!("No latency sample was acquired"),
    }

    if let Err(e) = write_csv(series, s.output_dir.join("latency.csv")) {
        error!("CSV export failed: {}", e);
    }
    let title = if name.is_empty() { "Latency" } else { name };
    if let Err(e) = draw_chart(
        series,
        title,
        s.output_dir.join("latency.svg"),
        s.chart_width,
        s.chart_height,
    ) {
        error!("Chart export failed: {}", e);
    }
}
