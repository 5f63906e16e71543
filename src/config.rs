//! Configuration loading and persistence.
//!
//! Handles reading and writing the client configuration file and resolving
//! the backend WebSocket endpoint. Every field can be overridden with a
//! `LINGCHAT_*` environment variable.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

use crate::constants;
use crate::env::Environment;
use crate::narrative::queue::ClearPolicy;
use crate::transport::TransportSettings;

/// Name of the configuration file inside the config directory.
const CONFIG_FILE_NAME: &str = "config.json";

/// Configuration for the LingChat client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Explicit backend URL (development override), e.g. `http://10.0.0.2:8764`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_url: Option<String>,
    /// Backend host used in development when no override is set.
    pub backend_bind_addr: String,
    /// Backend port used in development when no override is set.
    pub backend_port: u16,
    /// Origin used in production.
    pub origin: String,
    /// Reconnect attempts allowed after the connection drops.
    pub max_reconnect_attempts: u32,
    /// Delay in milliseconds before each reconnect attempt.
    pub reconnect_delay_ms: u64,
    /// Startup window in milliseconds during which connection errors stay quiet.
    pub grace_period_ms: u64,
    /// What happens to an in-flight hold when the presentation queue is cleared.
    pub clear_policy: ClearPolicy,
    /// Display name used for lines the player authors.
    pub user_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: None,
            backend_bind_addr: constants::DEFAULT_BACKEND_BIND_ADDR.to_string(),
            backend_port: constants::DEFAULT_BACKEND_PORT,
            origin: constants::DEFAULT_PRODUCTION_ORIGIN.to_string(),
            max_reconnect_attempts: constants::DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay_ms: constants::DEFAULT_RECONNECT_DELAY.as_millis() as u64,
            grace_period_ms: constants::DEFAULT_GRACE_PERIOD.as_millis() as u64,
            clear_policy: ClearPolicy::default(),
            user_name: "Player".to_string(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `LINGCHAT_CONFIG_DIR` env var: explicit override
    /// 2. `LINGCHAT_ENV=test`: a `lingchat-test` directory under the system temp dir
    /// 3. Default: platform config dir (e.g. `~/.config/lingchat`)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("LINGCHAT_CONFIG_DIR") {
            PathBuf::from(dir)
        } else if crate::env::is_test_mode() {
            std::env::temp_dir().join("lingchat-test")
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("lingchat")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing or unreadable file falls back to defaults.
    pub fn load() -> Result<Self> {
        let dir = Self::config_dir()?;
        let mut config = Self::load_from_dir(&dir).unwrap_or_else(|e| {
            log::debug!("Using default config: {e:#}");
            Self::default()
        });
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads `config.json` from `dir` without applying overrides.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            anyhow::bail!("Config file not found at {}", config_path.display());
        }
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    /// Persists the configuration into the default config directory.
    pub fn save(&self) -> Result<()> {
        self.save_to_dir(&Self::config_dir()?)
    }

    /// Persists the configuration as `config.json` inside `dir`.
    pub fn save_to_dir(&self, dir: &Path) -> Result<()> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", config_path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `LINGCHAT_*` overrides read through `lookup`.
    ///
    /// Values that fail to parse are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("LINGCHAT_BACKEND_URL") {
            self.backend_url = Some(url);
        }

        if let Some(addr) = lookup("LINGCHAT_BACKEND_BIND_ADDR") {
            self.backend_bind_addr = addr;
        }

        if let Some(port) = lookup("LINGCHAT_BACKEND_PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.backend_port = port,
                Err(_) => log::warn!("Ignoring invalid LINGCHAT_BACKEND_PORT={port}"),
            }
        }

        if let Some(origin) = lookup("LINGCHAT_ORIGIN") {
            self.origin = origin;
        }

        if let Some(attempts) = lookup("LINGCHAT_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(attempts) = attempts.parse::<u32>() {
                self.max_reconnect_attempts = attempts;
            }
        }

        if let Some(delay) = lookup("LINGCHAT_RECONNECT_DELAY_MS") {
            if let Ok(delay) = delay.parse::<u64>() {
                self.reconnect_delay_ms = delay;
            }
        }

        if let Some(grace) = lookup("LINGCHAT_GRACE_PERIOD_MS") {
            if let Ok(grace) = grace.parse::<u64>() {
                self.grace_period_ms = grace;
            }
        }

        if let Some(policy) = lookup("LINGCHAT_CLEAR_POLICY") {
            match policy.parse::<ClearPolicy>() {
                Ok(policy) => self.clear_policy = policy,
                Err(e) => log::warn!("Ignoring LINGCHAT_CLEAR_POLICY: {e}"),
            }
        }

        if let Some(name) = lookup("LINGCHAT_USER_NAME") {
            self.user_name = name;
        }
    }

    /// Backend base URL (scheme, host and port, no path).
    ///
    /// Development resolves the override URL first (ignored unless it is an
    /// `http(s)` URL), then `http://{bind_addr}:{port}`. Production uses the
    /// configured origin.
    pub fn backend_base_url(&self, env: Environment) -> String {
        if !env.uses_local_backend() {
            return self.origin.trim_end_matches('/').to_string();
        }

        if let Some(url) = self.backend_url.as_deref() {
            if let Some(origin) = origin_of(url) {
                return origin;
            }
            log::warn!("Invalid backend URL override: {url}");
        }

        format!("http://{}:{}", self.backend_bind_addr, self.backend_port)
    }

    /// WebSocket endpoint derived from [`Self::backend_base_url`].
    pub fn websocket_url(&self, env: Environment) -> String {
        format!(
            "{}{}",
            crate::ws::http_to_ws_scheme(&self.backend_base_url(env)),
            constants::WEBSOCKET_PATH
        )
    }

    /// Transport timing derived from this configuration.
    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            grace_period: Duration::from_millis(self.grace_period_ms),
        }
    }
}

/// Extract `scheme://host[:port]` from an `http(s)` URL.
fn origin_of(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    if scheme != "http" && scheme != "https" {
        return None;
    }
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if authority.is_empty() {
        return None;
    }
    Some(format!("{scheme}://{authority}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.backend_bind_addr, "localhost");
        assert_eq!(config.backend_port, 8764);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay_ms, 3000);
        assert_eq!(config.grace_period_ms, 3000);
        assert_eq!(config.clear_policy, ClearPolicy::Abort);
    }

    #[test]
    fn test_development_websocket_url_uses_bind_addr() {
        let config = Config::default();
        assert_eq!(
            config.websocket_url(Environment::Development),
            "ws://localhost:8764/ws"
        );
    }

    #[test]
    fn test_development_override_keeps_only_origin() {
        let config = Config {
            backend_url: Some("https://10.0.0.2:9000/some/page?x=1".to_string()),
            ..Config::default()
        };
        assert_eq!(
            config.websocket_url(Environment::Development),
            "wss://10.0.0.2:9000/ws"
        );
    }

    #[test]
    fn test_invalid_override_falls_back() {
        let config = Config {
            backend_url: Some("not-a-url".to_string()),
            backend_port: 9999,
            ..Config::default()
        };
        assert_eq!(
            config.backend_base_url(Environment::Development),
            "http://localhost:9999"
        );
    }

    #[test]
    fn test_production_uses_origin() {
        let config = Config {
            origin: "https://chat.example.com/".to_string(),
            backend_url: Some("http://ignored:1".to_string()),
            ..Config::default()
        };
        assert_eq!(
            config.websocket_url(Environment::Production),
            "wss://chat.example.com/ws"
        );
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[
            ("LINGCHAT_BACKEND_PORT", "9000"),
            ("LINGCHAT_MAX_RECONNECT_ATTEMPTS", "2"),
            ("LINGCHAT_RECONNECT_DELAY_MS", "100"),
            ("LINGCHAT_CLEAR_POLICY", "drain"),
            ("LINGCHAT_USER_NAME", "Ling"),
        ]));
        assert_eq!(config.backend_port, 9000);
        assert_eq!(config.max_reconnect_attempts, 2);
        assert_eq!(config.reconnect_delay_ms, 100);
        assert_eq!(config.clear_policy, ClearPolicy::Drain);
        assert_eq!(config.user_name, "Ling");
    }

    #[test]
    fn test_apply_overrides_ignores_garbage() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[
            ("LINGCHAT_BACKEND_PORT", "not-a-port"),
            ("LINGCHAT_CLEAR_POLICY", "sometimes"),
        ]));
        assert_eq!(config.backend_port, 8764);
        assert_eq!(config.clear_policy, ClearPolicy::Abort);
    }

    #[test]
    fn test_transport_settings() {
        let config = Config {
            reconnect_delay_ms: 250,
            grace_period_ms: 1000,
            max_reconnect_attempts: 3,
            ..Config::default()
        };
        let settings = config.transport_settings();
        assert_eq!(settings.reconnect_delay, Duration::from_millis(250));
        assert_eq!(settings.grace_period, Duration::from_secs(1));
        assert_eq!(settings.max_reconnect_attempts, 3);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            user_name: "Tester".to_string(),
            clear_policy: ClearPolicy::Drain,
            ..Config::default()
        };
        config.save_to_dir(dir.path()).unwrap();

        let loaded = Config::load_from_dir(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), r#"{"backend_port": 1234}"#).unwrap();

        let loaded = Config::load_from_dir(dir.path()).unwrap();
        assert_eq!(loaded.backend_port, 1234);
        assert_eq!(loaded.max_reconnect_attempts, 5);
    }

    #[test]
    fn test_load_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_from_dir(dir.path()).is_err());
    }
}
