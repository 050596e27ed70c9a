//! Latency controller: measures the skew between the local and remote renderings of the
//! same color-marker video.
//!
//! Event sources report color changes through an `EventSink` (one per side). A run waits
//! for both sides to show the sync marker, then pairs local/remote events, classifies
//! each latency against the threshold and accumulates a `SampleSeries`.
//!
//! Runs are bounded by an optional duration (deadline check plus a `Watchdog` that
//! interrupts a blocked wait) or by an external `CancelToken`.

pub mod listener;
pub mod local_mode;
pub mod measurement;
pub mod policy;
pub mod rendezvous;
pub mod watchdog;

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, error, info};

use crate::config::ControllerConfig;
use crate::error::{LatencyError, Result};
use crate::signal::event::{SideState, SignalSide};
use crate::utils::{metrics::LatencyMonitor, series::SampleSeries};

use listener::{EventHub, EventSink};
use measurement::{Exit, MeasurementLoop};
use watchdog::{CancelToken, Watchdog};

/// How a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The deadline passed between two iterations.
    DeadlineReached,
    /// The watchdog interrupted a wait when the run duration elapsed.
    WatchdogExpired,
    /// The run's cancel token was triggered from outside.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub termination: Termination,
    pub records: usize,
    pub failures: usize,
    pub elapsed: Duration,
}

pub struct LatencyController {
    config: ControllerConfig,
    hub: Arc<EventHub>,
    series: SampleSeries,
    monitor: Option<Arc<dyn LatencyMonitor>>,
    last_outcome: Option<Result<RunSummary>>,
}

impl LatencyController {
    pub fn new(config: ControllerConfig) -> Self {
        let series = SampleSeries::new(config.latency_threshold);
        Self {
            config,
            hub: Arc::new(EventHub::new()),
            series,
            monitor: None,
            last_outcome: None,
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn LatencyMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        self.config.name.as_deref().unwrap_or("")
    }

    /// Registers the event source of `side`; replaces any previous one.
    /// Registrations are released when a run ends.
    pub fn register_source(&self, side: SignalSide) -> EventSink {
        self.hub.register(side)
    }

    pub fn is_registered(&self, side: SignalSide) -> bool {
        self.hub.is_registered(side)
    }

    /// Last event seen on `side`.
    pub fn side_state(&self, side: SignalSide) -> SideState {
        self.hub.side_state(side)
    }

    /// Series of the current or last run. Partial after a failed run.
    pub fn series(&self) -> &SampleSeries {
        &self.series
    }

    pub fn into_series(self) -> SampleSeries {
        self.series
    }

    pub fn failure_count(&self) -> usize {
        self.series.failure_count()
    }

    pub fn configured_threshold(&self) -> Duration {
        self.config.latency_threshold
    }

    /// Result of the last completed run, including background runs.
    pub fn last_outcome(&self) -> Option<&Result<RunSummary>> {
        self.last_outcome.as_ref()
    }

    /// Runs the measurement loop on the calling thread.
    ///
    /// With `Some(duration)` the run ends gracefully once it elapses; with `None` it runs
    /// until a fatal error (use `run_until` to stop it from outside).
    pub fn run(&mut self, duration: Option<Duration>) -> Result<RunSummary> {
        self.run_until(duration, CancelToken::new())
    }

    /// Same as `run`, also ending gracefully when `cancel` is triggered.
    pub fn run_until(&mut self, duration: Option<Duration>, cancel: CancelToken) -> Result<RunSummary> {
        let outcome = self.run_inner(duration, cancel);
        self.last_outcome = Some(outcome.clone());
        outcome
    }

    fn run_inner(&mut self, duration: Option<Duration>, cancel: CancelToken) -> Result<RunSummary> {
        let context = self.config.context();
        if let Err(e) = self.config.validate() {
            self.hub.release_registrations();
            return Err(e);
        }

        let missing: Vec<&str> = SignalSide::ALL
            .iter()
            .filter(|side| !self.hub.is_registered(**side))
            .map(|side| side.name())
            .collect();
        if !missing.is_empty() {
            self.hub.release_registrations();
            return Err(LatencyError::MisconfiguredController {
                missing: missing.join(" and "),
                context,
            });
        }

        self.series = SampleSeries::new(self.config.latency_threshold);
        let started = Instant::now();
        // A duration past the representable range runs unbounded.
        let deadline = duration.and_then(|d| started.checked_add(d));
        // The watchdog cancels a per-run child so the caller's token survives expiry.
        let run_token = cancel.child();
        let mut watchdog = duration
            .filter(|_| deadline.is_some())
            .map(|d| Watchdog::arm(d, run_token.clone()));
        info!(
            "{}latency check started (threshold {:?}, duration {:?})",
            context, self.config.latency_threshold, duration
        );

        let outcome = {
            let mut lp = MeasurementLoop::new(
                &self.config,
                self.hub.rendezvous(),
                &run_token,
                &mut self.series,
                self.monitor.as_deref(),
            );
            lp.run(deadline)
        };

        // Every exit path: stop the timer, then release the sources.
        let watchdog_fired = match watchdog.as_mut() {
            Some(w) => {
                w.disarm();
                w.fired()
            }
            None => false,
        };
        let dropped = self.hub.release_registrations();
        if dropped > 0 {
            debug!("{}dropped {} pending events at end of run", context, dropped);
        }

        let termination = match outcome? {
            Exit::DeadlineReached => Termination::DeadlineReached,
            Exit::Cancelled if watchdog_fired => Termination::WatchdogExpired,
            Exit::Cancelled => Termination::Stopped,
        };
        let summary = RunSummary {
            termination,
            records: self.series.len(),
            failures: self.series.failure_count(),
            elapsed: started.elapsed(),
        };
        info!(
            "{}latency check finished: {:?}, {} records, {} failures",
            context, summary.termination, summary.records, summary.failures
        );
        Ok(summary)
    }

    /// Runs the loop on its own thread. Failures are logged, not propagated; the
    /// controller (with its series and `last_outcome`) is handed back by `join`.
    pub fn run_in_background(self, duration: Option<Duration>) -> BackgroundRun {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let handle = thread::spawn(move || {
            let mut controller = self;
            if let Err(e) = controller.run_until(duration, token) {
                error!("{}background latency check failed: {}", controller.config.context(), e);
            }
            controller
        });
        BackgroundRun { handle, cancel }
    }
}

/// Handle to a run started with `run_in_background`.
pub struct BackgroundRun {
    handle: JoinHandle<LatencyController>,
    cancel: CancelToken,
}

impl BackgroundRun {
    /// Requests a graceful stop of the running loop.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the run to end. `Err` only if the measurement thread panicked.
    pub fn join(self) -> thread::Result<LatencyController> {
        self.handle.join()
    }
}
