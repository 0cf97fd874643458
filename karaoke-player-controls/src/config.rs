use std::time::Duration;

use crate::{Result, window::WindowOptions};

/// Timings and window parameters shared by both sides of a detached session.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    pub window: WindowOptions,
    /// Pause after closing a stale window before creating its replacement.
    pub settle_delay_ms: u64,
    pub creation_timeout_ms: u64,
    pub request_state_attempts: u32,
    pub request_state_interval_ms: u64,
    /// Minimum spacing between two `time-update` messages.
    pub progress_interval_ms: u64,
    pub channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            window: WindowOptions::default(),
            settle_delay_ms: 100,
            creation_timeout_ms: 10_000,
            request_state_attempts: 5,
            request_state_interval_ms: 1_000,
            progress_interval_ms: 500,
            channel_capacity: 64,
        }
    }
}

impl SyncConfig {
    /// Parses a JSON document. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn creation_timeout(&self) -> Duration {
        Duration::from_millis(self.creation_timeout_ms)
    }

    pub fn request_state_interval(&self) -> Duration {
        Duration::from_millis(self.request_state_interval_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}
