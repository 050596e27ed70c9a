//! Controller and harness configuration.
//!
//! `ControllerConfig` is the runtime form used by the controller (typed durations,
//! builder-style setters, defaults of the loopback stability tests).
//!
//! `HarnessConfig` is the file form. It is loaded with figment from a TOML file merged
//! with `LATENCY_`-prefixed environment variables, e.g.
//! `LATENCY_CONTROLLER__LATENCY_THRESHOLD_MS=500`.
//!
//! ```toml
//! [controller]
//! name = "WebRTC in loopback"
//! latency_threshold_ms = 3000
//! wait_timeout_ms = 30000
//! consecutive_failure_limit = 3
//! fail_fast = false
//!
//! [session]
//! mode = "paired"
//! duration_secs = 30
//! output_dir = "data"
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{LatencyError, Result};

pub const DEFAULT_LATENCY_THRESHOLD: Duration = Duration::from_millis(3_000);
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_CONSECUTIVE_FAILURE_LIMIT: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Used only to prefix diagnostics.
    pub name: Option<String>,
    pub latency_threshold: Duration,
    /// Longest wait for the next event on one side before the run fails.
    pub wait_timeout: Duration,
    /// Sampling period of the local-mode probe.
    pub poll_interval: Duration,
    pub consecutive_failure_limit: u32,
    /// Abort on the first threshold breach instead of recording it.
    pub fail_fast: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: None,
            latency_threshold: DEFAULT_LATENCY_THRESHOLD,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            consecutive_failure_limit: DEFAULT_CONSECUTIVE_FAILURE_LIMIT,
            fail_fast: false,
        }
    }
}

impl ControllerConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_latency_threshold(mut self, threshold: Duration) -> Self {
        self.latency_threshold = threshold;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_consecutive_failure_limit(mut self, limit: u32) -> Self {
        self.consecutive_failure_limit = limit;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// `"[name] "` or an empty string; prefix for log lines and error messages.
    pub fn context(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => format!("[{}] ", name),
            _ => String::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.consecutive_failure_limit == 0 {
            return Err(LatencyError::InvalidConfig(
                "consecutive_failure_limit must be at least 1".into(),
            ));
        }
        if self.wait_timeout.is_zero() {
            return Err(LatencyError::InvalidConfig("wait_timeout must be non-zero".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(LatencyError::InvalidConfig("poll_interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// File/environment form of the controller settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSection {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_threshold_ms")]
    pub latency_threshold_ms: u64,
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_limit")]
    pub consecutive_failure_limit: u32,
    #[serde(default)]
    pub fail_fast: bool,
}

/// How the binary measures: pairing both color streams, or sampling a local probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    #[default]
    Paired,
    Local,
}

/// Settings of the synthetic loopback session run by the binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSection {
    #[serde(default)]
    pub mode: SessionMode,
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Time each marker color stays on screen.
    #[serde(default = "default_color_period_ms")]
    pub color_period_ms: u64,
    /// Simulated pipeline delay of the remote rendering.
    #[serde(default = "default_remote_delay_ms")]
    pub remote_delay_ms: u64,
    /// Upper bound of the random jitter added to the remote delay.
    #[serde(default)]
    pub remote_jitter_ms: u64,
    #[serde(default = "default_probe_period_ms")]
    pub probe_period_ms: u64,
    #[serde(default = "default_chart_width")]
    pub chart_width: u32,
    #[serde(default = "default_chart_height")]
    pub chart_height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HarnessConfig {
    #[serde(default)]
    pub controller: ControllerSection,
    #[serde(default)]
    pub session: SessionSection,
}

// Default value functions
fn default_threshold_ms() -> u64 {
    DEFAULT_LATENCY_THRESHOLD.as_millis() as u64
}

fn default_wait_timeout_ms() -> u64 {
    DEFAULT_WAIT_TIMEOUT.as_millis() as u64
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_limit() -> u32 {
    DEFAULT_CONSECUTIVE_FAILURE_LIMIT
}

fn default_duration_secs() -> u64 {
    30
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_color_period_ms() -> u64 {
    1_000
}

fn default_remote_delay_ms() -> u64 {
    150
}

fn default_probe_period_ms() -> u64 {
    5
}

fn default_chart_width() -> u32 {
    500
}

fn default_chart_height() -> u32 {
    270
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            name: None,
            latency_threshold_ms: default_threshold_ms(),
            wait_timeout_ms: default_wait_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            consecutive_failure_limit: default_limit(),
            fail_fast: false,
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            mode: SessionMode::default(),
            duration_secs: default_duration_secs(),
            output_dir: default_output_dir(),
            color_period_ms: default_color_period_ms(),
            remote_delay_ms: default_remote_delay_ms(),
            remote_jitter_ms: 0,
            probe_period_ms: default_probe_period_ms(),
            chart_width: default_chart_width(),
            chart_height: default_chart_height(),
        }
    }
}

impl HarnessConfig {
    /// Defaults overridden by `path` (if it exists) and then by `LATENCY_*` variables.
    pub fn load_from<P: AsRef<Path>>(path: P) -> std::result::Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(HarnessConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("LATENCY_").split("__"))
            .extract()
    }

    /// Validated runtime configuration of the controller.
    pub fn controller_config(&self) -> Result<ControllerConfig> {
        let c = &self.controller;
        let config = ControllerConfig {
            name: c.name.clone(),
            latency_threshold: Duration::from_millis(c.latency_threshold_ms),
            wait_timeout: Duration::from_millis(c.wait_timeout_ms),
            poll_interval: Duration::from_millis(c.poll_interval_ms),
            consecutive_failure_limit: c.consecutive_failure_limit,
            fail_fast: c.fail_fast,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.session.duration_secs)
    }
}
