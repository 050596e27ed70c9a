//! local_mode.rs
//! Local-mode latency assessment: the page itself measures latency and the controller
//! polls it at `poll_interval`.
//!
//! Same threshold / fail-fast / consecutive-limit policy as the paired mode. The first
//! measured sample is a warm-up and is discarded; unavailable samples are skipped.

use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::controller::{
    policy::FailurePolicy, watchdog::CancelToken, LatencyController, RunSummary, Termination,
};
use crate::error::{LatencyError, Result};
use crate::utils::series::{MeasurementRecord, SampleSeries};

/// One reading of a `LatencyProbe`.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeSample {
    /// Nothing measured yet.
    Unavailable,
    /// `latency` measured at stream time `at`.
    Measured { latency: Duration, at: Duration },
    /// The probe could not compute a latency at stream time `at`.
    Failed { reason: String, at: Duration },
}

/// Source of locally computed latency samples (e.g. a script running in the page).
pub trait LatencyProbe {
    fn sample(&mut self) -> ProbeSample;
}

impl<F> LatencyProbe for F
where
    F: FnMut() -> ProbeSample,
{
    fn sample(&mut self) -> ProbeSample {
        self()
    }
}

impl LatencyController {
    /// Polls `probe` every `poll_interval` until `duration` elapses.
    pub fn run_local<P: LatencyProbe + ?Sized>(&mut self, duration: Duration, probe: &mut P) -> Result<RunSummary> {
        self.run_local_until(duration, probe, CancelToken::new())
    }

    /// Same as `run_local`, also ending gracefully when `cancel` is triggered.
    pub fn run_local_until<P: LatencyProbe + ?Sized>(
        &mut self,
        duration: Duration,
        probe: &mut P,
        cancel: CancelToken,
    ) -> Result<RunSummary> {
        let outcome = self.local_inner(duration, probe, &cancel);
        self.last_outcome = Some(outcome.clone());
        outcome
    }

    fn local_inner<P: LatencyProbe + ?Sized>(
        &mut self,
        duration: Duration,
        probe: &mut P,
        cancel: &CancelToken,
    ) -> Result<RunSummary> {
        if let Err(e) = self.config.validate() {
            self.hub.release_registrations();
            return Err(e);
        }
        let context = self.config.context();
        self.series = SampleSeries::new(self.config.latency_threshold);

        let started = Instant::now();
        let deadline = started.checked_add(duration);
        let mut policy = FailurePolicy::new(
            self.config.latency_threshold,
            self.config.fail_fast,
            self.config.consecutive_failure_limit,
        );
        let mut first = true;

        let termination = loop {
            if deadline.is_some_and(|d| Instant::now() > d) {
                break Termination::DeadlineReached;
            }
            if cancel.sleep(self.config.poll_interval) {
                break Termination::Stopped;
            }

            match probe.sample() {
                ProbeSample::Unavailable => continue,
                ProbeSample::Failed { reason, at } => {
                    let err = LatencyError::ProbeFailed {
                        reason,
                        context: context.clone(),
                    };
                    warn!("{}", err);
                    self.series.insert(MeasurementRecord::failed(at, err.clone()));
                    if self.config.fail_fast {
                        return Err(err);
                    }
                }
                ProbeSample::Measured { latency, at } => {
                    if first {
                        first = false;
                        debug!("{}first latency sample discarded ({:?})", context, latency);
                        continue;
                    }
                    info!("{}>>> Latency acquired: {} ms", context, latency.as_millis());
                    if let Some(m) = &self.monitor {
                        m.record_latency(latency);
                    }

                    let assessment = policy.assess(latency, &context);
                    if let Some(breach) = &assessment.breach {
                        if let Some(m) = &self.monitor {
                            m.record_latency_error();
                        }
                        if assessment.fatal.is_none() {
                            warn!("{}", breach);
                        }
                    }
                    self.series.insert(MeasurementRecord::measured(
                        at,
                        latency,
                        None,
                        assessment.breach,
                    ));
                    if let Some(fatal) = assessment.fatal {
                        return Err(fatal);
                    }
                }
            }
        };

        Ok(RunSummary {
            termination,
            records: self.series.len(),
            failures: self.series.failure_count(),
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use std::collections::VecDeque;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    /// Replays a fixed script, then reports nothing.
    fn scripted(samples: Vec<ProbeSample>) -> impl FnMut() -> ProbeSample {
        let mut queue: VecDeque<ProbeSample> = samples.into();
        move || queue.pop_front().unwrap_or(ProbeSample::Unavailable)
    }

    fn measured(latency: u64, at: u64) -> ProbeSample {
        ProbeSample::Measured {
            latency: ms(latency),
            at: ms(at),
        }
    }

    fn controller(fail_fast: bool) -> LatencyController {
        LatencyController::new(
            ControllerConfig::default()
                .with_latency_threshold(ms(100))
                .with_poll_interval(ms(1))
                .with_fail_fast(fail_fast),
        )
    }

    #[test]
    fn first_sample_is_discarded() {
        let mut c = controller(false);
        let mut probe = scripted(vec![
            ProbeSample::Unavailable,
            measured(500, 0),
            measured(20, 100),
            measured(30, 200),
        ]);
        let summary = c.run_local(ms(60), &mut probe).unwrap();
        assert_eq!(summary.termination, Termination::DeadlineReached);
        assert_eq!(c.series().len(), 2);
        assert_eq!(c.failure_count(), 0);
        assert!(c.series().get(ms(0)).is_none());
    }

    #[test]
    fn consecutive_breaches_abort_local_run() {
        let mut c = controller(false);
        let mut probe = scripted(vec![
            measured(0, 0),
            measured(200, 100),
            measured(200, 200),
            measured(200, 300),
            measured(20, 400),
        ]);
        let err = c.run_local(ms(500), &mut probe).unwrap_err();
        assert!(matches!(
            err,
            LatencyError::ConsecutiveFailureLimitExceeded { count: 3, .. }
        ));
        assert_eq!(c.failure_count(), 3);
        assert!(c.series().get(ms(400)).is_none());
    }

    #[test]
    fn probe_failure_recorded_and_fatal_only_with_fail_fast() {
        let failing = || {
            scripted(vec![
                measured(0, 0),
                ProbeSample::Failed {
                    reason: "no video".into(),
                    at: ms(50),
                },
                measured(10, 100),
            ])
        };

        let mut lenient = controller(false);
        lenient.run_local(ms(40), &mut failing()).unwrap();
        assert_eq!(lenient.failure_count(), 1);
        assert_eq!(lenient.series().len(), 2);

        let mut strict = controller(true);
        let err = strict.run_local(ms(500), &mut failing()).unwrap_err();
        assert!(matches!(err, LatencyError::ProbeFailed { .. }));
        assert_eq!(strict.failure_count(), 1);
        assert!(strict.last_outcome().is_some_and(|o| o.is_err()));
    }

    #[test]
    fn cancel_stops_local_run() {
        let mut c = controller(false);
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut probe = scripted(vec![]);
        let summary = c.run_local_until(ms(5_000), &mut probe, cancel).unwrap();
        assert_eq!(summary.termination, Termination::Stopped);
        assert!(summary.elapsed < ms(1_000));
    }
}
