//! # Latency controller
//! Measures the end-to-end latency between a locally rendered color-marker video and its
//! remote rendering (e.g. a WebRTC loopback), and classifies every sample against a
//! threshold.
//!
//! ## Layout
//! - **signal:** colors, side events and the periodic color poller feeding a controller.
//! - **controller:** rendezvous, watchdog, failure policy and the measurement loops.
//! - **utils:** sample series, live metrics and CSV / SVG reporting.
//! - **loopback:** synthetic color stream used by the binary and the integration tests.

pub mod config;
pub mod controller;
pub mod error;
pub mod loopback;
pub mod signal;
pub mod utils;

pub use config::{ControllerConfig, HarnessConfig};
pub use controller::{
    listener::EventSink,
    local_mode::{LatencyProbe, ProbeSample},
    watchdog::CancelToken,
    BackgroundRun, LatencyController, RunSummary, Termination,
};
pub use error::{LatencyError, ReportError, Result};
pub use signal::{
    color::{similar, Color},
    event::{SideState, SignalEvent, SignalSide},
};
pub use utils::series::{MeasurementRecord, SampleSeries};
