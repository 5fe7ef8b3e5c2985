//! Configuration loading for the driver terminal client.
//!
//! All fields are required unless explicitly marked optional. No defaults.

use fieldops_client::{BackendConfig, LocationConfig, RealtimeConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TuiConfig {
    pub backend: BackendConfig,
    pub realtime: RealtimeConfig,
    pub session_path: PathBuf,
    pub log_path: PathBuf,
    pub refresh_interval_ms: u64,
    /// Fixed position reported on arrival. Without it, arrivals are refused.
    pub location: Option<LocationConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or FIELDOPS_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Section(#[from] fieldops_client::ConfigError),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl TuiConfig {
    /// Load from `--config <path>` (or `--config=<path>`), then `FIELDOPS_CONFIG`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = path_from_args(std::env::args().skip(1))
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backend.validate()?;
        self.realtime.validate()?;
        if let Some(location) = &self.location {
            location.validate()?;
        }
        if self.refresh_interval_ms == 0 {
            return Err(invalid("refresh_interval_ms", "must be > 0"));
        }
        for (field, path) in [("session_path", &self.session_path), ("log_path", &self.log_path)] {
            if path.as_os_str().is_empty() {
                return Err(invalid(field, "must not be empty"));
            }
        }
        if self.session_path == self.log_path {
            return Err(invalid("log_path", "must differ from session_path"));
        }
        Ok(())
    }
}

const CONFIG_ENV: &str = "FIELDOPS_CONFIG";

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

fn path_from_args(mut args: impl Iterator<Item = String>) -> Option<PathBuf> {
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_config_path_flag_forms() {
        assert_eq!(
            path_from_args(args(&["--config", "a.toml"])),
            Some(PathBuf::from("a.toml"))
        );
        assert_eq!(
            path_from_args(args(&["-v", "--config=b.toml"])),
            Some(PathBuf::from("b.toml"))
        );
        assert_eq!(path_from_args(args(&["--config"])), None);
        assert_eq!(path_from_args(args(&[])), None);
    }
}
