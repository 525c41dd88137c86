use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    console::{stream_buffer::DEFAULT_CAPACITY, ConsoleView},
    protocol::{
        profile::Profile,
        status::{registry::DEFAULT_SCAN_INTERVAL, RegistryConfig},
    },
};

fn default_poll_interval_ms() -> u64 {
    DEFAULT_SCAN_INTERVAL.as_millis() as u64
}

fn default_buffer_capacity() -> usize {
    DEFAULT_CAPACITY
}

/// Everything a monitor session needs, loadable from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Port and line parameters
    pub profile: Profile,
    /// Interval between port scans in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Stream buffer size in bytes
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Prefix every received line with the local time
    #[serde(default)]
    pub timestamps: bool,
    /// View shown when the session starts
    #[serde(default)]
    pub view: ConsoleView,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            profile: Profile::default(),
            poll_interval_ms: default_poll_interval_ms(),
            buffer_capacity: default_buffer_capacity(),
            timestamps: false,
            view: ConsoleView::default(),
        }
    }
}

impl MonitorConfig {
    /// Parse configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    /// Read configuration from a file
    pub fn from_file(file_path: &str) -> anyhow::Result<Self> {
        use anyhow::Context;

        let content = std::fs::read_to_string(file_path)
            .with_context(|| format!("Failed to read config file {file_path}"))?;
        Self::from_json(&content).with_context(|| format!("Invalid config file {file_path}"))
    }

    /// Convert to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            scan_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }
}
