//! policy.rs
//! Threshold classification and the consecutive-failure counter.

use std::time::Duration;

use crate::error::LatencyError;

/// Outcome of classifying one accepted latency sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    /// Set when the sample exceeded the threshold; stored on the record.
    pub breach: Option<LatencyError>,
    /// Set when the run must end because of this sample.
    pub fatal: Option<LatencyError>,
}

impl Assessment {
    pub fn is_within_threshold(&self) -> bool {
        self.breach.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct FailurePolicy {
    threshold: Duration,
    fail_fast: bool,
    limit: u32,
    consecutive: u32,
}

impl FailurePolicy {
    pub fn new(threshold: Duration, fail_fast: bool, limit: u32) -> Self {
        Self {
            threshold,
            fail_fast,
            limit,
            consecutive: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Classifies `observed` against the threshold and updates the counter.
    ///
    /// Within threshold resets the counter. A breach is fatal immediately with
    /// `fail_fast`, otherwise once the counter reaches the limit.
    pub fn assess(&mut self, observed: Duration, context: &str) -> Assessment {
        if observed <= self.threshold {
            self.consecutive = 0;
            return Assessment {
                breach: None,
                fatal: None,
            };
        }

        let breach = LatencyError::LatencyThresholdExceeded {
            observed,
            threshold: self.threshold,
            context: context.to_string(),
        };

        if self.fail_fast {
            return Assessment {
                fatal: Some(breach.clone()),
                breach: Some(breach),
            };
        }

        self.consecutive += 1;
        let fatal = (self.consecutive >= self.limit).then(|| {
            LatencyError::ConsecutiveFailureLimitExceeded {
                count: self.consecutive,
                last: Box::new(breach.clone()),
            }
        });

        Assessment {
            breach: Some(breach),
            fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn within_threshold_never_counts() {
        let mut p = FailurePolicy::new(ms(100), false, 3);
        for observed in [0, 20, 99, 100] {
            let a = p.assess(ms(observed), "");
            assert!(a.is_within_threshold());
            assert!(a.fatal.is_none());
            assert_eq!(p.consecutive_failures(), 0);
        }
    }

    #[test]
    fn limit_reached_after_three_breaches() {
        let mut p = FailurePolicy::new(ms(100), false, 3);
        assert!(p.assess(ms(200), "").fatal.is_none());
        assert!(p.assess(ms(300), "").fatal.is_none());
        let third = p.assess(ms(400), "");
        match third.fatal {
            Some(LatencyError::ConsecutiveFailureLimitExceeded { count, last }) => {
                assert_eq!(count, 3);
                assert!(last.is_threshold_breach());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn success_resets_counter() {
        let mut p = FailurePolicy::new(ms(100), false, 3);
        p.assess(ms(200), "");
        p.assess(ms(200), "");
        assert_eq!(p.consecutive_failures(), 2);
        p.assess(ms(50), "");
        assert_eq!(p.consecutive_failures(), 0);
        assert!(p.assess(ms(200), "").fatal.is_none());
    }

    #[test]
    fn fail_fast_is_fatal_on_first_breach() {
        let mut p = FailurePolicy::new(ms(100), true, 3);
        let a = p.assess(ms(101), "[run] ");
        assert_eq!(a.fatal, a.breach);
        assert!(matches!(
            a.fatal,
            Some(LatencyError::LatencyThresholdExceeded { observed, .. }) if observed == ms(101)
        ));
    }
}
