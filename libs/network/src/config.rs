//! # Remoting Server Configuration
//!
//! Loaded from TOML at startup. Every section has defaults, so a file only
//! needs the values it changes.
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0:4447"
//! max_connections = 1024
//! handshake_timeout_ms = 5000
//!
//! [transport]
//! max_message_size = 16777216   # 16MB per message
//! buffer_size = 65536
//! nodelay = true
//! connect_timeout = 5000
//!
//! [workers]
//! max_workers = 64              # concurrent blocking bean calls
//!
//! [compression]
//! max_inflated_size = 16777216  # cap for inbound compressed messages
//! ```

use crate::executor::WorkerPoolConfig;
use crate::transport::TcpNetworkConfig;
use crate::{RemotingError, Result};
use codec::DEFAULT_MAX_INFLATED_SIZE;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Main server configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RemotingConfig {
    pub server: ServerSettings,
    pub transport: TcpNetworkConfig,
    pub workers: WorkerPoolConfig,
    pub compression: CompressionSettings,
}

/// Listener settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address the TCP listener binds to
    pub bind_address: String,
    /// Connections served at once; further accepts wait
    pub max_connections: usize,
    /// Time a client has to answer the greeting
    pub handshake_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:4447".to_string(),
            max_connections: 1024,
            handshake_timeout_ms: 5000,
        }
    }
}

/// Inbound compression limits
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionSettings {
    /// Largest message a compressed message may inflate to
    pub max_inflated_size: usize,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            max_inflated_size: DEFAULT_MAX_INFLATED_SIZE,
        }
    }
}

impl RemotingConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RemotingError::configuration(
                format!("Failed to read config file {}: {}", path.display(), e),
                None,
            )
        })?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| {
            RemotingError::configuration(format!("Failed to parse config: {}", e), None)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would otherwise fail at runtime
    pub fn validate(&self) -> Result<()> {
        self.bind_address()?;

        if self.server.max_connections == 0 {
            return Err(RemotingError::configuration(
                "max_connections must be at least 1",
                Some("server.max_connections"),
            ));
        }
        if self.server.handshake_timeout_ms == 0 {
            return Err(RemotingError::configuration(
                "handshake_timeout_ms must be positive",
                Some("server.handshake_timeout_ms"),
            ));
        }
        if self.transport.max_message_size == 0 || self.transport.max_message_size > u32::MAX as usize {
            return Err(RemotingError::configuration(
                "max_message_size must fit the 4-byte length prefix",
                Some("transport.max_message_size"),
            ));
        }
        if self.workers.max_workers == 0 {
            return Err(RemotingError::configuration(
                "max_workers must be at least 1",
                Some("workers.max_workers"),
            ));
        }
        if self.compression.max_inflated_size == 0 {
            return Err(RemotingError::configuration(
                "max_inflated_size must be positive",
                Some("compression.max_inflated_size"),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> Result<SocketAddr> {
        self.server.bind_address.parse().map_err(|e| {
            RemotingError::configuration(
                format!("Invalid bind address '{}': {}", self.server.bind_address, e),
                Some("server.bind_address"),
            )
        })
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.server.handshake_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = RemotingConfig::default();
        config.validate().unwrap();
        assert_eq!(config.bind_address().unwrap().port(), 4447);
        assert_eq!(config.workers.max_workers, 64);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
bind_address = "0.0.0.0:14447"

[workers]
max_workers = 8
"#
        )
        .unwrap();

        let config = RemotingConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:14447");
        assert_eq!(config.server.max_connections, 1024);
        assert_eq!(config.workers.max_workers, 8);
        assert_eq!(config.transport.max_message_size, codec::DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(config.handshake_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = RemotingConfig::from_toml("[server]\nbind_address = \"not an address\"").unwrap_err();
        assert!(matches!(err, RemotingError::Configuration { field: Some(ref f), .. } if f == "server.bind_address"));

        let err = RemotingConfig::from_toml("[workers]\nmax_workers = 0").unwrap_err();
        assert!(matches!(err, RemotingError::Configuration { .. }));

        let err = RemotingConfig::from_toml("[server\n").unwrap_err();
        assert!(matches!(err, RemotingError::Configuration { field: None, .. }));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            RemotingConfig::from_file("/nonexistent/remoting.toml"),
            Err(RemotingError::Configuration { .. })
        ));
    }
}
