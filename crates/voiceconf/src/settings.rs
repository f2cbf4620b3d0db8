//! Settings sections. Everything here is read once at startup.

use serde::{Deserialize, Serialize};

/// Frame mixer timing and worker pool sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixerSettings {
    /// How long one tick waits for source reads before mixing without them.
    /// Default: 50
    #[serde(default = "MixerSettings::default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Worker threads performing source reads.
    /// Default: 16
    #[serde(default = "MixerSettings::default_read_workers")]
    pub read_workers: usize,

    /// Output cadence of the tick driver.
    /// Default: 20
    #[serde(default = "MixerSettings::default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl MixerSettings {
    fn default_read_timeout_ms() -> u64 {
        50
    }

    fn default_read_workers() -> usize {
        16
    }

    fn default_tick_interval_ms() -> u64 {
        20
    }
}

impl Default for MixerSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: Self::default_read_timeout_ms(),
            read_workers: Self::default_read_workers(),
            tick_interval_ms: Self::default_tick_interval_ms(),
        }
    }
}

/// Graph routing defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingSettings {
    /// Id of the output node in a freshly created graph.
    /// Default: output-1
    #[serde(default = "RoutingSettings::default_output_node_id")]
    pub output_node_id: String,

    /// Volume percentage (0-200) applied to prepared sources without one.
    /// Default: 100
    #[serde(default = "RoutingSettings::default_volume")]
    pub default_volume: u32,
}

impl RoutingSettings {
    fn default_output_node_id() -> String {
        "output-1".to_string()
    }

    fn default_volume() -> u32 {
        100
    }
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            output_node_id: Self::default_output_node_id(),
            default_volume: Self::default_volume(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySettings {
    /// Log level filter, in `RUST_LOG` syntax.
    /// Default: info
    #[serde(default = "TelemetrySettings::default_log_level")]
    pub log_level: String,
}

impl TelemetrySettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
