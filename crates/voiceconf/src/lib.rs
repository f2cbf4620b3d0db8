//! Minimal configuration loading for voicemix.
//!
//! Everything here is fixed at startup: mixer timing, the worker pool size,
//! routing defaults and the log filter. Runtime state (graphs, queues,
//! volumes) lives in the engine, not here.
//!
//! # Usage
//!
//! ```rust,no_run
//! use voiceconf::VoiceConfig;
//!
//! let config = VoiceConfig::load().expect("Failed to load config");
//! println!("read timeout: {}ms", config.mixer.read_timeout_ms);
//! println!("output node: {}", config.routing.output_node_id);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/voicemix/config.toml` (system)
//! 2. `~/.config/voicemix/config.toml` (user)
//! 3. `./voicemix.toml` (local override, or an explicit path)
//! 4. Environment variables (`VOICEMIX_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [mixer]
//! read_timeout_ms = 50
//! read_workers = 16
//! tick_interval_ms = 20
//!
//! [routing]
//! output_node_id = "output-1"
//! default_volume = 100
//!
//! [telemetry]
//! log_level = "info"
//! ```

pub mod loader;
pub mod settings;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use settings::{MixerSettings, RoutingSettings, TelemetrySettings};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete voicemix configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VoiceConfig {
    #[serde(default)]
    pub mixer: MixerSettings,

    #[serde(default)]
    pub routing: RoutingSettings,

    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

impl VoiceConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with `config_path` replacing `./voicemix.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars applied.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = VoiceConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::overlay_file(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# voicemix configuration\n\n");

        output.push_str("[mixer]\n");
        output.push_str(&format!("read_timeout_ms = {}\n", self.mixer.read_timeout_ms));
        output.push_str(&format!("read_workers = {}\n", self.mixer.read_workers));
        output.push_str(&format!("tick_interval_ms = {}\n", self.mixer.tick_interval_ms));

        output.push_str("\n[routing]\n");
        output.push_str(&format!(
            "output_node_id = \"{}\"\n",
            self.routing.output_node_id
        ));
        output.push_str(&format!("default_volume = {}\n", self.routing.default_volume));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output
    }
}
