use std::collections::HashMap;
use std::{env, fs, path::Path};

use serde::Deserialize;

use crate::ingest::SyncLimits;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Shared secret for verifying bearer tokens minted by the account
    /// service. This server never issues tokens itself.
    pub jwt_secret: String,
    #[serde(default)]
    pub listen_port: Option<u16>,
    #[serde(default)]
    pub dev_cors_origin: Option<String>,
    #[serde(default)]
    pub sync: SyncConfig,
    /// package/app name -> display name overrides for reports.
    #[serde(default)]
    pub friendly_names: HashMap<String, String>,
}

/// Ingestion and rule bounds. These used to be scattered constants in the
/// handlers; keeping them in config makes tests and deployments explicit
/// about the thresholds they run with.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub max_entry_duration_secs: i64,
    pub max_reported_errors: usize,
    pub default_daily_limit_minutes: i32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_entry_duration_secs: 86400,
            max_reported_errors: 10,
            default_daily_limit_minutes: 120,
        }
    }
}

impl SyncConfig {
    pub fn limits(&self) -> SyncLimits {
        SyncLimits {
            max_entry_duration_secs: self.max_entry_duration_secs,
            max_reported_errors: self.max_reported_errors,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Yaml(e) => write!(f, "YAML error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        ConfigError::Yaml(value)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load_from_path(path)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(&path)?;
        let cfg: AppConfig = serde_yaml::from_str(&text)?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_sync_defaults() {
        let cfg: AppConfig = serde_yaml::from_str("jwt_secret: s3cret\n").unwrap();
        assert_eq!(cfg.sync.max_entry_duration_secs, 86400);
        assert_eq!(cfg.sync.max_reported_errors, 10);
        assert_eq!(cfg.sync.default_daily_limit_minutes, 120);
        assert!(cfg.friendly_names.is_empty());
        assert!(cfg.listen_port.is_none());
    }

    #[test]
    fn sync_section_overrides_defaults() {
        let cfg: AppConfig = serde_yaml::from_str(
            "jwt_secret: s3cret\nsync:\n  max_reported_errors: 3\nfriendly_names:\n  com.example: Example\n",
        )
        .unwrap();
        assert_eq!(cfg.sync.max_reported_errors, 3);
        assert_eq!(cfg.sync.max_entry_duration_secs, 86400);
        assert_eq!(cfg.friendly_names["com.example"], "Example");
    }
}
