//! Client configuration: endpoint and reconnection bounds.
//!
//! Loaded from a RON file (explicit path, or `<config dir>/huddle/config.ron`)
//! and then overridden from the environment. Every field has a default, so an
//! empty file (or no file at all) yields a working local-dev config.
//!
//! ```ron
//! (
//!     endpoint: "ws://chat.example.com:3000",
//!     connect_timeout_ms: 5000,
//!     reconnect: (
//!         enabled: true,
//!         delay_ms: 1000,
//!         max_attempts: 5,
//!         backoff: Exponential(max_delay_ms: 30000),
//!     ),
//! )
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{CONFIG_FILE_NAME, CONNECT_TIMEOUT, DEFAULT_ENDPOINT, ENDPOINT_ENV_VAR};
use crate::reconnect::ReconnectPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("endpoint must be a ws://, wss://, http:// or https:// origin, got {0:?}")]
    InvalidEndpoint(String),
}

/// Everything a session needs besides credentials and a transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base endpoint origin of the messaging backend.
    pub endpoint: String,
    /// Upper bound for one handshake attempt.
    pub connect_timeout_ms: u64,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout_ms: CONNECT_TIMEOUT.as_millis() as u64,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Config pointing at a specific endpoint, defaults elsewhere.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Default config file location (`$XDG_CONFIG_HOME/huddle/config.ron` on Linux).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("huddle").join(CONFIG_FILE_NAME))
    }

    /// Load config, then apply environment overrides.
    ///
    /// An explicit `path` must exist. With no path, a missing default file
    /// just means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron(&content)
    }

    pub fn from_ron(content: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(content)?)
    }

    /// Apply overrides from a key lookup (the process environment in `load`).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = lookup(ENDPOINT_ENV_VAR).filter(|e| !e.is_empty()) {
            tracing::debug!(%endpoint, "endpoint overridden from environment");
            self.endpoint = endpoint;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.websocket_url().map(|_| ())
    }

    /// The endpoint as a WebSocket URL (`http` → `ws`, `https` → `wss`).
    pub fn websocket_url(&self) -> Result<String, ConfigError> {
        websocket_url(&self.endpoint)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Normalize an endpoint origin to a WebSocket URL.
pub fn websocket_url(endpoint: &str) -> Result<String, ConfigError> {
    let endpoint = endpoint.trim();
    let (scheme, rest) = endpoint
        .split_once("://")
        .ok_or_else(|| ConfigError::InvalidEndpoint(endpoint.to_string()))?;
    let scheme = match scheme.to_ascii_lowercase().as_str() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        _ => return Err(ConfigError::InvalidEndpoint(endpoint.to_string())),
    };
    if rest.is_empty() || rest.starts_with('/') {
        return Err(ConfigError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok(format!("{scheme}://{rest}"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconnect::Backoff;
    use std::io::Write;

    #[test]
    fn test_empty_ron_is_default() {
        let config = ClientConfig::from_ron("()").unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_partial_ron_keeps_other_defaults() {
        let config = ClientConfig::from_ron(
            r#"(endpoint: "wss://chat.example.com", reconnect: (max_attempts: 2))"#,
        )
        .unwrap();
        assert_eq!(config.endpoint, "wss://chat.example.com");
        assert_eq!(config.reconnect.max_attempts, 2);
        assert!(config.reconnect.enabled);
        assert_eq!(config.connect_timeout(), CONNECT_TIMEOUT);
    }

    #[test]
    fn test_exponential_backoff_from_ron() {
        let config = ClientConfig::from_ron(
            "(reconnect: (delay_ms: 50, backoff: Exponential(max_delay_ms: 400)))",
        )
        .unwrap();
        assert_eq!(config.reconnect.delay(), Duration::from_millis(50));
        assert_eq!(
            config.reconnect.backoff,
            Backoff::Exponential { max_delay_ms: 400 }
        );
    }

    #[test]
    fn test_bad_ron_is_parse_error() {
        assert!(matches!(
            ClientConfig::from_ron("(endpoint: 42)"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"(endpoint: "http://10.0.0.5:3000")"#).unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.websocket_url().unwrap(), "ws://10.0.0.5:3000");
    }

    #[test]
    fn test_missing_explicit_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.ron");
        assert!(matches!(
            ClientConfig::load(Some(&missing)),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_env_override() {
        let mut config = ClientConfig::default();
        config.apply_overrides(|key| {
            (key == ENDPOINT_ENV_VAR).then(|| "wss://override.example.com".to_string())
        });
        assert_eq!(config.endpoint, "wss://override.example.com");
    }

    #[test]
    fn test_empty_env_override_ignored() {
        let mut config = ClientConfig::default();
        config.apply_overrides(|_| Some(String::new()));
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_websocket_url_normalization() {
        assert_eq!(websocket_url("https://a.example").unwrap(), "wss://a.example");
        assert_eq!(websocket_url("ws://localhost:3000").unwrap(), "ws://localhost:3000");
        assert_eq!(websocket_url("HTTP://host/path").unwrap(), "ws://host/path");
        assert!(websocket_url("localhost:3000").is_err());
        assert!(websocket_url("ftp://host").is_err());
        assert!(websocket_url("ws://").is_err());
    }
}
