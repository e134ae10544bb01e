//! Watch mode configuration: debounce window and polling cadence

use serde::Deserialize;

/// Observer settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// Quiet period before a burst of changes triggers a re-scan
    pub debounce_ms: u64,
    /// How often the transcript is checked for changes
    pub poll_interval_ms: u64,
    /// Write a full HTML page (stylesheet included) instead of a fragment
    pub standalone: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            poll_interval_ms: 250,
            standalone: true,
        }
    }
}

/// `[watch]` as loaded from file
#[derive(Debug, Deserialize, Default)]
pub struct FileWatch {
    pub debounce_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub standalone: Option<bool>,
}

impl WatchConfig {
    /// Create from file config with defaults
    pub fn from_file(file: Option<FileWatch>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            debounce_ms: file.debounce_ms.unwrap_or(defaults.debounce_ms),
            // A zero interval would spin the poller
            poll_interval_ms: file
                .poll_interval_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(defaults.poll_interval_ms),
            standalone: file.standalone.unwrap_or(defaults.standalone),
        }
    }
}
