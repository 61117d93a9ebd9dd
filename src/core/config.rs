//! `hive.toml` loading. Every section is optional; a missing file means defaults.

use crate::core::db;
use crate::core::error::HiveError;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Config file name looked up in the hive root.
pub const CONFIG_FILE: &str = "hive.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HiveConfig {
    pub store: StoreConfig,
    pub rate_limits: RateLimitConfig,
    pub log: LogConfig,
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Database path. Relative paths resolve against the hive root.
    pub path: PathBuf,
    pub busy_timeout_secs: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(db::DB_NAME),
            busy_timeout_secs: db::DEFAULT_BUSY_TIMEOUT_SECS,
        }
    }
}

/// Per-identity request budgets. A value of 0 disables that class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub posts_per_hour: u32,
    pub replies_per_hour: u32,
    pub writes_per_day: u32,
    pub reads_per_minute: u32,
    pub searches_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            posts_per_hour: 20,
            replies_per_hour: 60,
            writes_per_day: 500,
            reads_per_minute: 600,
            searches_per_minute: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive; `HIVE_LOG` overrides it.
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Where the one-time admin credential is written.
    pub key_out: PathBuf,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            key_out: PathBuf::from("admin.key"),
        }
    }
}

impl HiveConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, HiveError> {
        toml::from_str(raw).map_err(|e| HiveError::ConfigError(e.to_string()))
    }

    /// Loads `explicit`, else `$HIVE_CONFIG`, else `<root>/hive.toml` when present.
    /// `$HIVE_DB` overrides the store path afterwards.
    pub fn load(root: &Path, explicit: Option<&Path>) -> Result<Self, HiveError> {
        let candidate = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => env::var_os("HIVE_CONFIG")
                .map(PathBuf::from)
                .or_else(|| Some(root.join(CONFIG_FILE))),
        };

        let mut config = match candidate {
            Some(path) if path.exists() => {
                let content = fs::read_to_string(&path).map_err(HiveError::IoError)?;
                Self::from_toml_str(&content).map_err(|e| {
                    HiveError::ConfigError(format!("{}: {}", path.display(), e))
                })?
            }
            Some(path) if explicit.is_some() => {
                return Err(HiveError::ConfigError(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            _ => HiveConfig::default(),
        };

        if let Some(db_override) = env::var_os("HIVE_DB") {
            config.store.path = PathBuf::from(db_override);
        }
        Ok(config)
    }

    /// Absolute database path for this config under `root`.
    pub fn db_path(&self, root: &Path) -> PathBuf {
        if self.store.path.is_absolute() {
            self.store.path.clone()
        } else {
            root.join(&self.store.path)
        }
    }

    pub fn key_out_path(&self, root: &Path) -> PathBuf {
        if self.bootstrap.key_out.is_absolute() {
            self.bootstrap.key_out.clone()
        } else {
            root.join(&self.bootstrap.key_out)
        }
    }
}
