//! Process-wide tracing subscriber.

use crate::core::config::LogConfig;
use crate::core::error::HiveError;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a tracing filter directive.
pub const LOG_ENV: &str = "HIVE_LOG";

/// Installs the global subscriber. Logs go to stderr so command output on stdout
/// stays machine-readable. Fails if a subscriber is already installed.
pub fn init_tracing(cfg: &LogConfig) -> Result<(), HiveError> {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .map_err(|e| HiveError::ConfigError(format!("invalid log filter: {e}")))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = if cfg.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| HiveError::ConfigError(format!("install tracing subscriber: {e}")))
}
