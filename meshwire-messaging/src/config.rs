//! Messaging configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via MESHWIRE_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Messaging service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Server bind port; defaults to the node's return address port.
    pub port: Option<u16>,
    /// Bind interfaces; empty means `0.0.0.0`.
    pub interfaces: Vec<String>,
    /// TLS configuration.
    pub tls: TlsConfig,
}

impl MessagingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, then applies environment variable
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = if let Ok(path) = std::env::var("MESHWIRE_CONFIG") {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: MessagingConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("MESHWIRE_PORT") {
            if let Ok(parsed) = port.parse() {
                self.port = Some(parsed);
            }
        }
        if let Ok(interfaces) = std::env::var("MESHWIRE_INTERFACES") {
            self.interfaces = interfaces
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        self.tls.apply_env_overrides();
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }
}

/// TLS configuration for both sides of every connection.
///
/// The key store is a PEM bundle holding the node's private key and
/// certificate chain; the trust store is a PEM bundle of CA certificates
/// every peer must chain to. Peer authentication is mutual whenever TLS is
/// enabled. The password options are accepted so existing config files keep
/// parsing, but PEM stores are read unencrypted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub key_store: Option<PathBuf>,
    pub key_store_password: Option<String>,
    pub trust_store: Option<PathBuf>,
    pub trust_store_password: Option<String>,
}

impl TlsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_store = Some(path.into());
        self.enabled = true;
        self
    }

    pub fn with_trust_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.trust_store = Some(path.into());
        self.enabled = true;
        self
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("MESHWIRE_TLS_ENABLED") {
            self.enabled = matches!(enabled.as_str(), "1" | "true" | "yes");
        }
        if let Ok(path) = std::env::var("MESHWIRE_TLS_KEY_STORE") {
            self.key_store = Some(path.into());
        }
        if let Ok(password) = std::env::var("MESHWIRE_TLS_KEY_STORE_PASSWORD") {
            self.key_store_password = Some(password);
        }
        if let Ok(path) = std::env::var("MESHWIRE_TLS_TRUST_STORE") {
            self.trust_store = Some(path.into());
        }
        if let Ok(password) = std::env::var("MESHWIRE_TLS_TRUST_STORE_PASSWORD") {
            self.trust_store_password = Some(password);
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("cannot parse config file {0}: {1}")]
    Parse(PathBuf, String),
}
