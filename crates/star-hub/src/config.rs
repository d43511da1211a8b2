//! Hub configuration (spec.md §6).
//!
//! Mirrors the teacher's hand-rolled TOML loader: an all-`Option` raw struct
//! parsed with `deny_unknown_fields`, defaulted in a second pass, then
//! overridden from `STAR_<UPPER_OPTION>` environment variables.

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidEnvOverride { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HubConfig {
    pub host: String,
    pub port: u16,
    pub enable_auth: bool,
    pub enable_validation: bool,
    pub max_connections: usize,
    pub heartbeat_interval_s: u64,
    pub session_timeout_s: u64,
    pub max_frame_bytes: usize,
    pub send_queue_depth: usize,
    pub log_level: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8765,
            enable_auth: false,
            enable_validation: true,
            max_connections: 1000,
            heartbeat_interval_s: 30,
            session_timeout_s: 60,
            max_frame_bytes: 1024 * 1024,
            send_queue_depth: 1024,
            log_level: "INFO".to_owned(),
        }
    }
}

/// The raw shape accepted from a TOML document. Every field optional so a
/// caller can specify only the options they want to override; unknown keys
/// are rejected rather than silently ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHubConfig {
    host: Option<String>,
    port: Option<u16>,
    enable_auth: Option<bool>,
    enable_validation: Option<bool>,
    max_connections: Option<usize>,
    heartbeat_interval_s: Option<u64>,
    session_timeout_s: Option<u64>,
    max_frame_bytes: Option<usize>,
    send_queue_depth: Option<usize>,
    log_level: Option<String>,
}

impl HubConfig {
    /// Parse a TOML document, defaulting any option it omits.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawHubConfig = toml::from_str(text)?;
        let defaults = Self::default();
        Ok(Self {
            host: raw.host.unwrap_or(defaults.host),
            port: raw.port.unwrap_or(defaults.port),
            enable_auth: raw.enable_auth.unwrap_or(defaults.enable_auth),
            enable_validation: raw.enable_validation.unwrap_or(defaults.enable_validation),
            max_connections: raw.max_connections.unwrap_or(defaults.max_connections),
            heartbeat_interval_s: raw
                .heartbeat_interval_s
                .unwrap_or(defaults.heartbeat_interval_s),
            session_timeout_s: raw.session_timeout_s.unwrap_or(defaults.session_timeout_s),
            max_frame_bytes: raw.max_frame_bytes.unwrap_or(defaults.max_frame_bytes),
            send_queue_depth: raw.send_queue_depth.unwrap_or(defaults.send_queue_depth),
            log_level: raw.log_level.unwrap_or(defaults.log_level),
        })
    }

    /// Apply any `STAR_<UPPER_OPTION>` environment variable that's set,
    /// following the teacher's `LOG_LEVEL`/`BIND_ADDR`/`DATABASE_URL`
    /// env-var precedent, generalized to a single systematic prefix.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("STAR_HOST") {
            self.host = v;
        }
        if let Some(v) = parse_env("STAR_PORT")? {
            self.port = v;
        }
        if let Some(v) = parse_env("STAR_ENABLE_AUTH")? {
            self.enable_auth = v;
        }
        if let Some(v) = parse_env("STAR_ENABLE_VALIDATION")? {
            self.enable_validation = v;
        }
        if let Some(v) = parse_env("STAR_MAX_CONNECTIONS")? {
            self.max_connections = v;
        }
        if let Some(v) = parse_env("STAR_HEARTBEAT_INTERVAL_S")? {
            self.heartbeat_interval_s = v;
        }
        if let Some(v) = parse_env("STAR_SESSION_TIMEOUT_S")? {
            self.session_timeout_s = v;
        }
        if let Some(v) = parse_env("STAR_MAX_FRAME_BYTES")? {
            self.max_frame_bytes = v;
        }
        if let Some(v) = parse_env("STAR_SEND_QUEUE_DEPTH")? {
            self.send_queue_depth = v;
        }
        if let Ok(v) = std::env::var("STAR_LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.heartbeat_interval_s)
    }

    pub fn session_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.session_timeout_s)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_owned(), value }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable mutation must be serialised across tests in this
    // module; tests run in threads within one process.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_match_the_documented_table() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 8765);
        assert!(!cfg.enable_auth);
        assert!(cfg.enable_validation);
        assert_eq!(cfg.max_connections, 1000);
        assert_eq!(cfg.heartbeat_interval_s, 30);
        assert_eq!(cfg.session_timeout_s, 60);
        assert_eq!(cfg.max_frame_bytes, 1_048_576);
        assert_eq!(cfg.send_queue_depth, 1024);
        assert_eq!(cfg.log_level, "INFO");
    }

    #[test]
    fn partial_toml_only_overrides_named_fields() {
        let cfg = HubConfig::from_toml_str("port = 9000\nenable_auth = true\n").unwrap();
        assert_eq!(cfg.port, 9000);
        assert!(cfg.enable_auth);
        assert_eq!(cfg.host, "0.0.0.0");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(HubConfig::from_toml_str("bogus_option = 1\n").is_err());
    }

    #[test]
    fn env_override_wins_over_toml_and_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("STAR_PORT", "9999");
        let mut cfg = HubConfig::from_toml_str("port = 9000\n").unwrap();
        cfg.apply_env_overrides().unwrap();
        assert_eq!(cfg.port, 9999);
        std::env::remove_var("STAR_PORT");
    }

    #[test]
    fn invalid_env_override_is_reported() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("STAR_PORT", "not-a-number");
        let mut cfg = HubConfig::default();
        assert!(cfg.apply_env_overrides().is_err());
        std::env::remove_var("STAR_PORT");
    }
}
