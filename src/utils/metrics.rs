
//! Live latency metrics fed by the controller while a run is in progress.
//!
//! - **LatencyMonitor:** hook called for every accepted latency and every threshold breach.
//! - **LiveMetrics:** shared mutex buffer (bounded to 1000 points) for dashboards and summaries.
//!
//! The sample series stays the authoritative record; these buffers only hold recent history.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

/// Observer of a running measurement loop. Called from the measurement thread.
pub trait LatencyMonitor: Send + Sync {
    /// An accepted (color-matched) latency sample.
    fn record_latency(&self, latency: Duration);

    /// A sample that exceeded the threshold.
    fn record_latency_error(&self);
}

/// Recent latency history and breach counters.
#[derive(Default, Clone, Debug)]
pub struct Metrics {
    /// Latency tracking (milliseconds, last 1000 samples)
    pub latency_ms: VecDeque<f64>,

    pub accepted: u64,
    pub latency_errors: u64,
}

pub type SharedMetrics = Arc<Mutex<Metrics>>;

pub const MAX_POINTS: usize = 1_000;

/// Appends value to metrics buffer; removes oldest if at capacity (FIFO).
#[inline]
pub fn push_capped(buf: &mut VecDeque<f64>, val: f64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

/// `LatencyMonitor` backed by `SharedMetrics`.
#[derive(Clone, Default)]
pub struct LiveMetrics {
    metrics: SharedMetrics,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    /// Copy of the current buffers.
    pub fn snapshot(&self) -> Metrics {
        match self.metrics.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn last_latency_ms(&self) -> Option<f64> {
        self.snapshot().latency_ms.back().copied()
    }
}

impl LatencyMonitor for LiveMetrics {
    fn record_latency(&self, latency: Duration) {
        let mut m = match self.metrics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        m.accepted += 1;
        push_capped(&mut m.latency_ms, latency.as_secs_f64() * 1_000.0);
    }

    fn record_latency_error(&self) {
        let mut m = match self.metrics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        m.latency_errors += 1;
    }
}
