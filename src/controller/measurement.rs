//! measurement.rs
//! The measurement loop: sync on the marker color, then pair local/remote events.
//!
//! States: AwaitingSyncLocal -> AwaitingSyncRemote -> Measuring -> Terminated | Aborted.
//! The loop suspends only inside `Rendezvous::wait_for`; everything else is synchronous.

use std::time::Instant;

use log::{debug, info, warn};

use crate::controller::{
    policy::FailurePolicy,
    rendezvous::{Rendezvous, WaitError},
    watchdog::CancelToken,
};
use crate::config::ControllerConfig;
use crate::error::{LatencyError, Result};
use crate::signal::{
    color::{similar, Color},
    event::{SignalEvent, SignalSide},
};
use crate::utils::{
    metrics::LatencyMonitor,
    series::{MeasurementRecord, SampleSeries},
};

/// Consecutive color mismatches between warnings.
const MISMATCH_WARN_EVERY: u64 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingSyncLocal,
    AwaitingSyncRemote,
    Measuring,
    Terminated,
    Aborted,
}

/// Graceful ways out of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exit {
    DeadlineReached,
    Cancelled,
}

pub(crate) struct MeasurementLoop<'a> {
    config: &'a ControllerConfig,
    rendezvous: &'a Rendezvous,
    cancel: &'a CancelToken,
    series: &'a mut SampleSeries,
    monitor: Option<&'a dyn LatencyMonitor>,
    policy: FailurePolicy,
    state: LoopState,
    mismatches: u64,
    context: String,
}

impl<'a> MeasurementLoop<'a> {
    pub(crate) fn new(
        config: &'a ControllerConfig,
        rendezvous: &'a Rendezvous,
        cancel: &'a CancelToken,
        series: &'a mut SampleSeries,
        monitor: Option<&'a dyn LatencyMonitor>,
    ) -> Self {
        Self {
            config,
            rendezvous,
            cancel,
            series,
            monitor,
            policy: FailurePolicy::new(
                config.latency_threshold,
                config.fail_fast,
                config.consecutive_failure_limit,
            ),
            state: LoopState::AwaitingSyncLocal,
            mismatches: 0,
            context: config.context(),
        }
    }

    pub(crate) fn state(&self) -> LoopState {
        self.state
    }

    /// Runs until the deadline, cancellation or a fatal error.
    pub(crate) fn run(&mut self, deadline: Option<Instant>) -> Result<Exit> {
        let outcome = self.drive(deadline);
        self.state = match outcome {
            Ok(_) => LoopState::Terminated,
            Err(_) => LoopState::Aborted,
        };
        outcome
    }

    fn drive(&mut self, deadline: Option<Instant>) -> Result<Exit> {
        // ====================================================================
        // Synchronization: both streams must show the marker color first
        // ====================================================================
        self.state = LoopState::AwaitingSyncLocal;
        if self.await_marker(SignalSide::Local)?.is_none() {
            return Ok(Exit::Cancelled);
        }
        self.state = LoopState::AwaitingSyncRemote;
        if self.await_marker(SignalSide::Remote)?.is_none() {
            return Ok(Exit::Cancelled);
        }
        debug!("{}both streams synchronized on the marker color", self.context);

        // ====================================================================
        // Steady state: local first, then remote
        // ====================================================================
        self.state = LoopState::Measuring;
        loop {
            if deadline.is_some_and(|d| Instant::now() > d) {
                return Ok(Exit::DeadlineReached);
            }
            let Some(local) = self.wait(SignalSide::Local)? else {
                return Ok(Exit::Cancelled);
            };
            let Some(remote) = self.wait(SignalSide::Remote)? else {
                return Ok(Exit::Cancelled);
            };
            self.evaluate(&local, &remote)?;
        }
    }

    /// Waits until `side` reports the marker color. `None` when cancelled.
    fn await_marker(&mut self, side: SignalSide) -> Result<Option<SignalEvent>> {
        loop {
            let Some(event) = self.wait(side)? else {
                return Ok(None);
            };
            if similar(&event.value, &Color::SYNC_MARKER) {
                return Ok(Some(event));
            }
            debug!(
                "{}{} stream shows {} while waiting for the marker",
                self.context, side, event.value
            );
        }
    }

    /// One rendezvous wait. Cancellation maps to `None`, a timeout is fatal.
    fn wait(&self, side: SignalSide) -> Result<Option<SignalEvent>> {
        match self
            .rendezvous
            .wait_for(side, self.config.wait_timeout, self.cancel)
        {
            Ok(_) if self.cancel.is_cancelled() => Ok(None),
            Ok(event) => Ok(Some(event)),
            Err(WaitError::Cancelled { .. }) => Ok(None),
            Err(WaitError::TimedOut { side, waited }) => Err(LatencyError::SynchronizationTimeout {
                side,
                waited,
                context: self.context.clone(),
            }),
        }
    }

    /// Classifies one local/remote pairing and records it.
    fn evaluate(&mut self, local: &SignalEvent, remote: &SignalEvent) -> Result<()> {
        let latency = remote.skew(local);
        debug!(
            "{}latency={:?} local_color={} remote_color={} local_time={:?} remote_time={:?}",
            self.context,
            latency,
            local.value,
            remote.value,
            local.logical_timestamp,
            remote.logical_timestamp
        );

        if !similar(&local.value, &remote.value) {
            // One side already moved on; wait for the next pair.
            self.mismatches += 1;
            if self.mismatches % MISMATCH_WARN_EVERY == 0 {
                warn!(
                    "{}{} consecutive color mismatches between LOCAL and REMOTE streams",
                    self.context, self.mismatches
                );
            }
            return Ok(());
        }
        self.mismatches = 0;

        info!("{}--> Latency acquired ({} ms)", self.context, latency.as_millis());
        if let Some(m) = self.monitor {
            m.record_latency(latency);
        }

        let assessment = self.policy.assess(latency, &self.context);
        if let Some(breach) = &assessment.breach {
            if let Some(m) = self.monitor {
                m.record_latency_error();
            }
            if assessment.fatal.is_none() {
                warn!("{}", breach);
            }
        }

        self.series.insert(MeasurementRecord::measured(
            remote.logical_timestamp,
            latency,
            Some(remote.value),
            assessment.breach,
        ));

        match assessment.fatal {
            Some(fatal) => Err(fatal),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn push(rv: &Rendezvous, side: SignalSide, t0: Instant, at_ms: u64, color: Color) {
        rv.release(SignalEvent::new(side, ms(at_ms), color, t0 + ms(at_ms)));
    }

    #[test]
    fn stale_colors_are_skipped_during_sync() {
        let config = ControllerConfig::default().with_wait_timeout(ms(50));
        let rv = Rendezvous::new();
        let cancel = CancelToken::new();
        let mut series = SampleSeries::new(config.latency_threshold);
        let t0 = Instant::now();

        push(&rv, SignalSide::Local, t0, 0, Color::RED);
        push(&rv, SignalSide::Local, t0, 10, Color::SYNC_MARKER);
        push(&rv, SignalSide::Remote, t0, 0, Color::BLUE);
        push(&rv, SignalSide::Remote, t0, 15, Color::SYNC_MARKER);

        let mut lp = MeasurementLoop::new(&config, &rv, &cancel, &mut series, None);
        let err = lp.run(None).unwrap_err();
        // Synchronized, then starved on the local side.
        assert!(matches!(
            err,
            LatencyError::SynchronizationTimeout { side: SignalSide::Local, .. }
        ));
        assert_eq!(lp.state(), LoopState::Aborted);
        assert!(series.is_empty());
    }

    #[test]
    fn mismatched_pair_appends_nothing() {
        let config = ControllerConfig::default()
            .with_wait_timeout(ms(30))
            .with_latency_threshold(ms(100));
        let rv = Rendezvous::new();
        let cancel = CancelToken::new();
        let mut series = SampleSeries::new(config.latency_threshold);
        let t0 = Instant::now();

        push(&rv, SignalSide::Local, t0, 0, Color::SYNC_MARKER);
        push(&rv, SignalSide::Remote, t0, 0, Color::SYNC_MARKER);
        // Local already blue while remote still shows red.
        push(&rv, SignalSide::Local, t0, 500, Color::BLUE);
        push(&rv, SignalSide::Remote, t0, 520, Color::RED);
        push(&rv, SignalSide::Local, t0, 1000, Color::RED);
        push(&rv, SignalSide::Remote, t0, 1030, Color::RED);

        let mut lp = MeasurementLoop::new(&config, &rv, &cancel, &mut series, None);
        assert!(lp.run(None).is_err());
        assert_eq!(series.len(), 1);
        let rec = series.latest().unwrap();
        assert_eq!(rec.timestamp, ms(1030));
        assert_eq!(rec.latency, Some(ms(30)));
        assert_eq!(rec.color, Some(Color::RED));
    }

    #[test]
    fn cancelled_before_sync_terminates_gracefully() {
        let config = ControllerConfig::default();
        let rv = Rendezvous::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut series = SampleSeries::new(config.latency_threshold);

        let mut lp = MeasurementLoop::new(&config, &rv, &cancel, &mut series, None);
        assert_eq!(lp.run(None), Ok(Exit::Cancelled));
        assert_eq!(lp.state(), LoopState::Terminated);
    }

    #[test]
    fn elapsed_deadline_exits_before_waiting() {
        let config = ControllerConfig::default().with_wait_timeout(ms(10));
        let rv = Rendezvous::new();
        let cancel = CancelToken::new();
        let mut series = SampleSeries::new(config.latency_threshold);
        let t0 = Instant::now();
        push(&rv, SignalSide::Local, t0, 0, Color::SYNC_MARKER);
        push(&rv, SignalSide::Remote, t0, 0, Color::SYNC_MARKER);

        let mut lp = MeasurementLoop::new(&config, &rv, &cancel, &mut series, None);
        let past = Instant::now() - ms(1);
        assert_eq!(lp.run(Some(past)), Ok(Exit::DeadlineReached));
    }
}
