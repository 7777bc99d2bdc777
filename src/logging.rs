//! Tracing setup for binaries and test harnesses embedding the engine

use anyhow::anyhow;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives
pub const LOG_ENV: &str = "IOWORKER_LOG";

/// Install a global fmt subscriber
///
/// Filter directives come from `IOWORKER_LOG` when set, otherwise from
/// `default_level` (e.g. `"info"` or `"ioworker=debug"`).
///
/// # Errors
///
/// Fails when the directives do not parse or a global subscriber is
/// already installed.
pub fn init(default_level: &str) -> crate::Result<()> {
    let filter = match std::env::var(LOG_ENV) {
        Ok(directives) => EnvFilter::try_new(directives)?,
        Err(_) => EnvFilter::try_new(default_level)?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}
