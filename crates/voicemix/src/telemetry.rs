//! Logging setup for binaries.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither `RUST_LOG` nor a configured level is usable.
pub const DEFAULT_FILTER: &str = "info,voicemix=debug";

/// Build the log filter. `RUST_LOG` wins over `log_level`.
pub fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a global fmt subscriber. Fails if one is already installed.
pub fn init(log_level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(fmt::layer().with_thread_names(true))
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize tracing: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_accepts_levels() {
        // Must not panic on either a plain level or a directive list
        let _ = env_filter("warn");
        let _ = env_filter("info,voicemix::mixer=trace");
    }
}
