//! loopback.rs
//! Synthetic color-marker stream for running the controller without a browser.
//!
//! - `LoopbackSource`: shared clock; the rendered color changes every `period`,
//!   starting with the sync marker and cycling through `PALETTE`.
//! - `LocalFeed`: the stream as rendered locally (no delay).
//! - `RemoteFeed`: the same stream seen after `delay` plus a random per-color jitter.
//! - `LocalLatencyFeed`: latency samples for local mode, derived from the same delay model.

use std::time::{Duration, Instant};

use rand::random_range;

use crate::controller::local_mode::{LatencyProbe, ProbeSample};
use crate::signal::{color::Color, poller::ColorProbe};

pub const PALETTE: [Color; 4] = [Color::SYNC_MARKER, Color::RED, Color::BLUE, Color::WHITE];

#[derive(Debug, Clone, Copy)]
pub struct LoopbackSource {
    start: Instant,
    period: Duration,
}

impl LoopbackSource {
    pub fn new(period: Duration) -> Self {
        Self::starting_at(Instant::now(), period)
    }

    pub fn starting_at(start: Instant, period: Duration) -> Self {
        Self {
            start,
            period: period.max(Duration::from_millis(1)),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Index of the color segment shown at stream time `t`.
    pub fn segment_at(&self, t: Duration) -> u64 {
        (t.as_nanos() / self.period.as_nanos()) as u64
    }

    pub fn segment_start(&self, segment: u64) -> Duration {
        self.period.saturating_mul(segment.min(u32::MAX as u64) as u32)
    }

    pub fn color_of(segment: u64) -> Color {
        PALETTE[(segment % PALETTE.len() as u64) as usize]
    }

    pub fn local(&self) -> LocalFeed {
        LocalFeed { source: *self }
    }

    pub fn remote(&self, delay: Duration, jitter_max: Duration) -> RemoteFeed {
        RemoteFeed {
            source: *self,
            delay,
            jitter_max,
            shown: None,
            pending_jitter: None,
        }
    }

    pub fn latency_feed(&self, delay: Duration, jitter_max: Duration) -> LocalLatencyFeed {
        LocalLatencyFeed {
            source: *self,
            delay,
            jitter_max,
        }
    }
}

fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    Duration::from_micros(random_range(0..=max.as_micros() as u64))
}

pub struct LocalFeed {
    source: LoopbackSource,
}

impl ColorProbe for LocalFeed {
    fn probe(&mut self) -> Option<(Duration, Color)> {
        let t = self.source.elapsed();
        Some((t, LoopbackSource::color_of(self.source.segment_at(t))))
    }
}

pub struct RemoteFeed {
    source: LoopbackSource,
    delay: Duration,
    jitter_max: Duration,
    shown: Option<u64>,
    /// Extra delay drawn for the next color change.
    pending_jitter: Option<Duration>,
}

impl ColorProbe for RemoteFeed {
    fn probe(&mut self) -> Option<(Duration, Color)> {
        let lagged = self.source.elapsed().checked_sub(self.delay)?;
        let target = self.source.segment_at(lagged);

        if self.shown != Some(target) {
            let extra = *self
                .pending_jitter
                .get_or_insert_with(|| jitter(self.jitter_max));
            if lagged >= self.source.segment_start(target) + extra {
                self.shown = Some(target);
                self.pending_jitter = None;
            }
        }

        // Nothing rendered until the first segment made it through.
        let shown = self.shown?;
        Some((lagged, LoopbackSource::color_of(shown)))
    }
}

pub struct LocalLatencyFeed {
    source: LoopbackSource,
    delay: Duration,
    jitter_max: Duration,
}

impl LatencyProbe for LocalLatencyFeed {
    fn sample(&mut self) -> ProbeSample {
        let at = self.source.elapsed();
        if at < self.delay {
            return ProbeSample::Unavailable;
        }
        ProbeSample::Measured {
            latency: self.delay + jitter(self.jitter_max),
            at,
        }
    }
}
