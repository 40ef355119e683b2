//! Proxy configuration.
//!
//! Configuration is resolved in the following order (later overrides
//! earlier):
//! 1. Default values
//! 2. YAML config file (if specified via MONGOTAP_CONFIG)
//! 3. Environment variables
//! 4. Command-line flags (applied by the binary)

use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Top-level proxy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Listener TLS configuration.
    pub tls: TlsConfig,
}

impl Config {
    /// Loads configuration from file if MONGOTAP_CONFIG is set, then applies
    /// environment variable overrides.
    pub fn load() -> Result<Self, ServerError> {
        let mut config = match std::env::var("MONGOTAP_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ServerError::Config(format!("cannot parse {:?}: {}", path, e)))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.tls.apply_env_overrides();
    }

    /// Validates the configuration before startup.
    pub fn validate(&self) -> Result<(), ServerError> {
        self.network.listen_addr()?;
        if let Some(ref pem) = self.tls.pem_path {
            if !pem.exists() {
                return Err(ServerError::Config(format!(
                    "TLS PEM file {:?} does not exist",
                    pem
                )));
            }
        }
        Ok(())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to listen on for incoming client connections.
    pub listen_addr: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: format!("0.0.0.0:{}", mongotap_protocol::DEFAULT_PORT),
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("MONGOTAP_LISTEN") {
            if !addr.is_empty() {
                self.listen_addr = addr;
            }
        }
    }

    /// Parses the configured listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listen_addr.parse().map_err(|_| {
            ServerError::Config(format!("invalid listen address {:?}", self.listen_addr))
        })
    }
}

/// Listener TLS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Combined PEM file with the server certificate chain and private key.
    /// TLS is enabled when set.
    pub pem_path: Option<PathBuf>,
}

impl TlsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("MONGOTAP_TLS_PEM") {
            if !path.is_empty() {
                self.pem_path = Some(PathBuf::from(path));
            }
        }
    }

    pub fn enabled(&self) -> bool {
        self.pem_path.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.network.listen_addr, "0.0.0.0:37017");
        assert!(!config.tls.enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_listen_addr_parsing() {
        let mut config = Config::default();
        config.network.listen_addr = "127.0.0.1:4000".to_string();
        assert_eq!(
            config.network.listen_addr().unwrap(),
            "127.0.0.1:4000".parse::<SocketAddr>().unwrap()
        );

        config.network.listen_addr = "not an address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"network:\n  listen_addr: \"127.0.0.1:9000\"\n")
            .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.network.listen_addr, "127.0.0.1:9000");
        // Unspecified sections keep their defaults.
        assert!(!config.tls.enabled());
    }

    #[test]
    fn test_from_file_rejects_bad_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"network: [not a map").unwrap();
        assert!(Config::from_file(file.path()).is_err());
    }

    #[test]
    fn test_validate_missing_pem() {
        let mut config = Config::default();
        config.tls.pem_path = Some(PathBuf::from("/nonexistent/server.pem"));
        assert!(config.validate().is_err());
    }
}
