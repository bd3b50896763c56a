use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TunnelError};

/// Listener port of the tunnel client (plaintext side).
pub const CLIENT_TUNNEL_PORT: u16 = 2345;
/// Listener port of the tunnel server (encrypted side).
pub const SERVER_TUNNEL_PORT: u16 = 2346;
/// Port the tunnel server forwards to by default.
pub const SERVICE_PORT: u16 = 1234;

/// Which end of the tunnel this process is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Accepts plaintext clients and dials the tunnel server
    Client,
    /// Accepts tunnel connections and dials the backend service
    Server,
}

impl Role {
    pub fn default_listen(self) -> SocketAddr {
        match self {
            Role::Client => SocketAddr::from(([127, 0, 0, 1], CLIENT_TUNNEL_PORT)),
            Role::Server => SocketAddr::from(([0, 0, 0, 0], SERVER_TUNNEL_PORT)),
        }
    }
}

/// How a channel's two directions are protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CipherMode {
    /// Both directions encrypted with independent keystreams
    #[default]
    Symmetric,
    /// Wire-compatible with older peers: only server-to-client traffic is encrypted
    Legacy,
}

/// Top-level tunnel configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub secret: String,
    pub role: Role,
    /// Address dialed for every accepted connection: the tunnel server for
    /// clients, the backend service for servers
    pub endpoint: String,
    /// Falls back to the role's default port when absent
    #[serde(default)]
    pub listen: Option<SocketAddr>,
    #[serde(default)]
    pub cipher_mode: CipherMode,
}

impl TunnelConfig {
    pub fn new(secret: impl Into<String>, role: Role, endpoint: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            role,
            endpoint: endpoint.into(),
            listen: None,
            cipher_mode: CipherMode::default(),
        }
    }

    pub fn with_listen(mut self, listen: SocketAddr) -> Self {
        self.listen = Some(listen);
        self
    }

    pub fn with_cipher_mode(mut self, mode: CipherMode) -> Self {
        self.cipher_mode = mode;
        self
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen.unwrap_or_else(|| self.role.default_listen())
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| TunnelError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.secret.is_empty() {
            return Err(TunnelError::config("secret cannot be empty"));
        }
        if self.endpoint.is_empty() {
            return Err(TunnelError::config("endpoint cannot be empty"));
        }
        if !self.endpoint.contains(':') {
            return Err(TunnelError::config(format!(
                "endpoint `{}` must be host:port",
                self.endpoint
            )));
        }
        Ok(())
    }
}

// The secret stays out of logs.
impl std::fmt::Debug for TunnelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelConfig")
            .field("role", &self.role)
            .field("endpoint", &self.endpoint)
            .field("listen", &self.listen_addr())
            .field("cipher_mode", &self.cipher_mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let config = TunnelConfig::from_toml_str(
            r#"
            secret = "abc"
            role = "client"
            endpoint = "relay.example:2346"
            "#,
        )
        .unwrap();
        assert_eq!(config.role, Role::Client);
        assert_eq!(config.cipher_mode, CipherMode::Symmetric);
        assert_eq!(config.listen_addr().port(), CLIENT_TUNNEL_PORT);
    }

    #[test]
    fn parses_full_toml() {
        let config = TunnelConfig::from_toml_str(
            r#"
            secret = "abc"
            role = "server"
            endpoint = "localhost:1234"
            listen = "127.0.0.1:9000"
            cipher_mode = "legacy"
            "#,
        )
        .unwrap();
        assert_eq!(config.role, Role::Server);
        assert_eq!(config.cipher_mode, CipherMode::Legacy);
        assert_eq!(config.listen_addr(), "127.0.0.1:9000".parse().unwrap());
    }

    #[test]
    fn rejects_empty_secret_and_bad_endpoint() {
        let err = TunnelConfig::from_toml_str(
            r#"
            secret = ""
            role = "server"
            endpoint = "localhost:1234"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, TunnelError::Config(_)));

        assert!(TunnelConfig::new("abc", Role::Client, "no-port").validate().is_err());
        assert!(TunnelConfig::from_toml_str("role = \"sideways\"").is_err());
    }

    #[test]
    fn debug_output_hides_secret() {
        let config = TunnelConfig::new("hunter2", Role::Client, "localhost:2346");
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
