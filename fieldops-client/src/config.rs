//! Backend and realtime configuration.
//!
//! All fields are required unless explicitly marked optional. No defaults.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Project base URL, e.g. `https://abc.supabase.co`.
    pub url: String,
    pub anon_key: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RealtimeConfig {
    pub heartbeat_ms: u64,
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

impl BackendConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(invalid("backend.url", "must not be empty"));
        }
        if !url.starts_with("https://") && !url.starts_with("http://") {
            return Err(invalid("backend.url", "must start with http:// or https://"));
        }
        if self.anon_key.trim().is_empty() {
            return Err(invalid("backend.anon_key", "must not be empty"));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("backend.request_timeout_ms", "must be > 0"));
        }
        Ok(())
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim().trim_end_matches('/')
    }

    /// Realtime websocket endpoint derived from the base URL.
    pub fn realtime_url(&self) -> String {
        let base = self.base_url();
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            ws_base, self.anon_key
        )
    }
}

impl RealtimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_ms == 0 {
            return Err(invalid("realtime.heartbeat_ms", "must be > 0"));
        }
        if self.reconnect.initial_ms == 0 {
            return Err(invalid("realtime.reconnect.initial_ms", "must be > 0"));
        }
        if self.reconnect.max_ms < self.reconnect.initial_ms {
            return Err(invalid("realtime.reconnect.max_ms", "must be >= initial_ms"));
        }
        if self.reconnect.multiplier < 1.0 {
            return Err(invalid("realtime.reconnect.multiplier", "must be >= 1.0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(url: &str) -> BackendConfig {
        BackendConfig {
            url: url.to_string(),
            anon_key: "anon".to_string(),
            request_timeout_ms: 10_000,
        }
    }

    fn realtime() -> RealtimeConfig {
        RealtimeConfig {
            heartbeat_ms: 30_000,
            reconnect: ReconnectConfig {
                initial_ms: 500,
                max_ms: 30_000,
                multiplier: 2.0,
                jitter_ms: 250,
            },
        }
    }

    #[test]
    fn test_backend_parses_from_toml() {
        let config: BackendConfig = toml::from_str(
            r#"
            url = "https://abc.supabase.co/"
            anon_key = "anon"
            request_timeout_ms = 5000
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.base_url(), "https://abc.supabase.co");
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result: Result<BackendConfig, _> = toml::from_str(
            r#"
            url = "https://abc.supabase.co"
            anon_key = "anon"
            request_timeout_ms = 5000
            service_key = "nope"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_backend_validation() {
        assert!(backend("").validate().is_err());
        assert!(backend("abc.supabase.co").validate().is_err());
        let mut config = backend("https://abc.supabase.co");
        config.request_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "backend.request_timeout_ms", .. })
        ));
    }

    #[test]
    fn test_realtime_url() {
        assert_eq!(
            backend("https://abc.supabase.co/").realtime_url(),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
        assert!(backend("http://localhost:54321")
            .realtime_url()
            .starts_with("ws://localhost:54321/realtime"));
    }

    #[test]
    fn test_reconnect_validation() {
        realtime().validate().unwrap();
        let mut config = realtime();
        config.reconnect.max_ms = 100;
        assert!(config.validate().is_err());
        let mut config = realtime();
        config.reconnect.multiplier = 0.5;
        assert!(config.validate().is_err());
    }
}
