//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, VoiceConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/voicemix/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("voicemix/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("voicemix.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<VoiceConfig, ConfigError> {
    let mut config = VoiceConfig::default();
    overlay_file(&mut config, path)?;
    Ok(config)
}

/// Apply the keys set in a TOML file on top of `config`.
///
/// Keys the file does not mention keep their current value, so a later file
/// can still set a key back to its default.
pub fn overlay_file(config: &mut VoiceConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    apply_toml(config, &contents, path)
}

/// Parse config from a TOML string. Missing keys keep their defaults.
pub(crate) fn parse_toml(contents: &str, path: &Path) -> Result<VoiceConfig, ConfigError> {
    let mut config = VoiceConfig::default();
    apply_toml(&mut config, contents, path)?;
    Ok(config)
}

fn apply_toml(config: &mut VoiceConfig, contents: &str, path: &Path) -> Result<(), ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    if let Some(mixer) = table.get("mixer").and_then(|v| v.as_table()) {
        if let Some(v) = mixer.get("read_timeout_ms").and_then(|v| v.as_integer()) {
            config.mixer.read_timeout_ms = non_negative(v, "mixer.read_timeout_ms", path)?;
        }
        if let Some(v) = mixer.get("read_workers").and_then(|v| v.as_integer()) {
            config.mixer.read_workers = non_negative(v, "mixer.read_workers", path)? as usize;
        }
        if let Some(v) = mixer.get("tick_interval_ms").and_then(|v| v.as_integer()) {
            config.mixer.tick_interval_ms = non_negative(v, "mixer.tick_interval_ms", path)?;
        }
    }

    if let Some(routing) = table.get("routing").and_then(|v| v.as_table()) {
        if let Some(v) = routing.get("output_node_id").and_then(|v| v.as_str()) {
            config.routing.output_node_id = v.to_string();
        }
        if let Some(v) = routing.get("default_volume").and_then(|v| v.as_integer()) {
            config.routing.default_volume = non_negative(v, "routing.default_volume", path)? as u32;
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.telemetry.log_level = v.to_string();
        }
    }

    Ok(())
}

fn non_negative(value: i64, key: &str, path: &Path) -> Result<u64, ConfigError> {
    u64::try_from(value).map_err(|_| ConfigError::Parse {
        path: path.to_path_buf(),
        message: format!("{} must not be negative (got {})", key, value),
    })
}

/// Apply environment variable overrides to config.
///
/// Values that fail to parse are ignored.
pub fn apply_env_overrides(config: &mut VoiceConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("VOICEMIX_READ_TIMEOUT_MS") {
        if let Ok(ms) = v.parse() {
            config.mixer.read_timeout_ms = ms;
            sources.env_overrides.push("VOICEMIX_READ_TIMEOUT_MS".to_string());
        }
    }
    if let Ok(v) = env::var("VOICEMIX_READ_WORKERS") {
        if let Ok(workers) = v.parse() {
            config.mixer.read_workers = workers;
            sources.env_overrides.push("VOICEMIX_READ_WORKERS".to_string());
        }
    }
    if let Ok(v) = env::var("VOICEMIX_TICK_INTERVAL_MS") {
        if let Ok(ms) = v.parse() {
            config.mixer.tick_interval_ms = ms;
            sources.env_overrides.push("VOICEMIX_TICK_INTERVAL_MS".to_string());
        }
    }

    if let Ok(v) = env::var("VOICEMIX_OUTPUT_NODE") {
        config.routing.output_node_id = v;
        sources.env_overrides.push("VOICEMIX_OUTPUT_NODE".to_string());
    }

    if let Ok(v) = env::var("VOICEMIX_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("VOICEMIX_LOG_LEVEL".to_string());
    }
    // RUST_LOG wins over everything
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}
