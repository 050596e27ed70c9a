//! error.rs
//! Error kinds raised by the latency controller and its reporting writers.
//!
//! - `LatencyError`: everything that can end a measurement run.
//! - `ReportError`: failures while exporting a finished series (CSV / chart).
//! - `ParseColorError`: malformed `"r,g,b[,a]"` color descriptors.

use std::time::Duration;

use thiserror::Error;

use crate::signal::event::SignalSide;

/// Convenience alias for results using the controller error type.
pub type Result<T> = std::result::Result<T, LatencyError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LatencyError {
    /// No event arrived on `side` within the configured wait timeout.
    #[error("{context}change color not detected in {side} stream after {waited:?}")]
    SynchronizationTimeout {
        side: SignalSide,
        waited: Duration,
        context: String,
    },

    /// A paired measurement exceeded the configured threshold.
    #[error("{context}latency error detected: {observed:?} (threshold {threshold:?})")]
    LatencyThresholdExceeded {
        observed: Duration,
        threshold: Duration,
        context: String,
    },

    /// Too many back-to-back threshold breaches.
    #[error("{count} consecutive latency errors detected. Latest: {last}")]
    ConsecutiveFailureLimitExceeded {
        count: u32,
        last: Box<LatencyError>,
    },

    /// Measurement started without both event sources registered.
    #[error("{context}bad setup in latency controller: missing {missing} event source")]
    MisconfiguredController { missing: String, context: String },

    /// The local-mode latency probe reported a failure.
    #[error("{context}latency probe failed: {reason}")]
    ProbeFailed { reason: String, context: String },

    #[error("invalid controller configuration: {0}")]
    InvalidConfig(String),
}

impl LatencyError {
    /// True for the breach kind that may be recorded without ending the run.
    pub fn is_threshold_breach(&self) -> bool {
        matches!(self, LatencyError::LatencyThresholdExceeded { .. })
    }
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("chart rendering error: {0}")]
    Chart(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseColorError {
    #[error("expected at least 3 comma separated channels, got {0}")]
    MissingChannels(usize),

    #[error("invalid channel value '{0}'")]
    InvalidChannel(String),
}
