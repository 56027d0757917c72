//! Server configuration with validation.
//!
//! Loaded from an optional JSON file and overridden by command-line
//! flags; every section has workable defaults for a standalone server.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default management protocol port.
pub const DEFAULT_MANAGEMENT_PORT: u16 = 9990;
/// Default HTTP API port.
pub const DEFAULT_HTTP_PORT: u16 = 9991;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("management and http endpoints must use different ports")]
    DuplicatePorts,

    #[error("the server name must not be empty")]
    EmptyName,

    #[error("invalid domain controller address {0:?}")]
    InvalidDomainController(String),

    #[error("cannot read configuration {0}: {1}")]
    Unreadable(PathBuf, std::io::Error),

    #[error("malformed configuration {0}: {1}")]
    Malformed(PathBuf, String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// This server's name; used as the host id when joining a domain.
    pub name: String,
    /// Management wire protocol endpoint.
    pub management: EndpointConfig,
    /// HTTP/JSON gateway endpoint.
    pub http: EndpointConfig,
    /// Where the model is persisted; in-memory only when unset.
    pub model_path: Option<PathBuf>,
    /// Domain controller to register with (`host:port`); standalone
    /// when unset.
    pub domain_controller: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    pub enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            name: "castellan".to_string(),
            management: EndpointConfig {
                bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port: DEFAULT_MANAGEMENT_PORT,
                enabled: true,
            },
            http: EndpointConfig {
                bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port: DEFAULT_HTTP_PORT,
                enabled: true,
            },
            model_path: None,
            domain_controller: None,
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            enabled: true,
        }
    }
}

impl EndpointConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

impl ServerConfig {
    /// Loads from a JSON file; absent path means defaults.
    pub fn load(path: Option<&PathBuf>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(ServerConfig::default());
        };
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Unreadable(path.clone(), e))?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Malformed(path.clone(), e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.management.enabled && self.http.enabled && self.management.port == self.http.port
        {
            return Err(ConfigError::DuplicatePorts);
        }
        if let Some(domain) = &self.domain_controller {
            self.domain_controller_addr()
                .ok_or_else(|| ConfigError::InvalidDomainController(domain.clone()))?;
        }
        Ok(())
    }

    /// The parsed domain controller address, if configured.
    pub fn domain_controller_addr(&self) -> Option<SocketAddr> {
        self.domain_controller
            .as_ref()
            .and_then(|text| text.parse().ok())
    }
}
