//! Process-wide configuration, layered env → file → defaults.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// A single ICE server entry (STUN or TURN).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

/// Settings shared by the signaling client, peer manager, and lifecycle
/// manager. Defaults match the values documented for each component.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub signaling_url: String,
    pub ice_servers: Vec<IceServerConfig>,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub connection_timeout_ms: u64,
    pub keep_alive_interval_ms: u64,
    pub terminal_queue_cap: usize,
    pub notification_queue_cap: usize,
    pub ping_sample_cap: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signaling_url: "wss://remoshell-signaling.workers.dev".to_string(),
            ice_servers: vec![
                IceServerConfig {
                    urls: vec!["stun:stun.l.google.com:19302".to_string()],
                    username: None,
                    credential: None,
                },
                IceServerConfig {
                    urls: vec!["stun:global.stun.twilio.com:3478".to_string()],
                    username: None,
                    credential: None,
                },
            ],
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: 5,
            connection_timeout_ms: 10_000,
            keep_alive_interval_ms: 30_000,
            terminal_queue_cap: 100,
            notification_queue_cap: 50,
            ping_sample_cap: 100,
        }
    }
}

impl Config {
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    /// Load configuration: start from defaults, overlay a TOML file if
    /// `path` is given and exists, then overlay `REMOSHELL_*` environment
    /// variables.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = path {
            if std::path::Path::new(path).exists() {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_string(),
                    source,
                })?;
                config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.to_string(),
                    source,
                })?;
            }
        }

        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("REMOSHELL_SIGNALING_URL") {
            self.signaling_url = v;
        }
        if let Ok(v) = std::env::var("REMOSHELL_RECONNECT_BASE_DELAY_MS") {
            self.reconnect_base_delay_ms = parse_env("REMOSHELL_RECONNECT_BASE_DELAY_MS", &v)?;
        }
        if let Ok(v) = std::env::var("REMOSHELL_RECONNECT_MAX_DELAY_MS") {
            self.reconnect_max_delay_ms = parse_env("REMOSHELL_RECONNECT_MAX_DELAY_MS", &v)?;
        }
        if let Ok(v) = std::env::var("REMOSHELL_MAX_RECONNECT_ATTEMPTS") {
            self.max_reconnect_attempts = parse_env("REMOSHELL_MAX_RECONNECT_ATTEMPTS", &v)?;
        }
        if let Ok(v) = std::env::var("REMOSHELL_CONNECTION_TIMEOUT_MS") {
            self.connection_timeout_ms = parse_env("REMOSHELL_CONNECTION_TIMEOUT_MS", &v)?;
        }
        if let Ok(v) = std::env::var("REMOSHELL_KEEP_ALIVE_INTERVAL_MS") {
            self.keep_alive_interval_ms = parse_env("REMOSHELL_KEEP_ALIVE_INTERVAL_MS", &v)?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.connection_timeout_ms, 10_000);
        assert_eq!(config.terminal_queue_cap, 100);
        assert_eq!(config.notification_queue_cap, 50);
        assert_eq!(config.ice_servers.len(), 2);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load(Some("/nonexistent/remoshell.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn env_var_overrides_default() {
        std::env::set_var("REMOSHELL_MAX_RECONNECT_ATTEMPTS", "9");
        let config = Config::load(None).unwrap();
        assert_eq!(config.max_reconnect_attempts, 9);
        std::env::remove_var("REMOSHELL_MAX_RECONNECT_ATTEMPTS");
    }
}
