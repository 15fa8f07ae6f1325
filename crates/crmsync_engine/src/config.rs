//! Configuration for the reconciliation engine.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for running sync cycles.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How far behind "now" each query window ends, to tolerate clock skew
    /// between the two stores.
    pub delay: Duration,
    /// Time between the starts of two cycles when polling.
    pub interval: Duration,
    /// File recording the start of the last completed cycle.
    pub tracker_path: Option<PathBuf>,
    /// Stop after one cycle.
    pub run_once: bool,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the clock-skew delay.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sets the polling interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the tracker file.
    #[must_use]
    pub fn with_tracker_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tracker_path = Some(path.into());
        self
    }

    /// Runs a single cycle instead of polling.
    #[must_use]
    pub fn once(mut self) -> Self {
        self.run_once = true;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            interval: Duration::from_secs(5),
            tracker_path: None,
            run_once: false,
        }
    }
}
