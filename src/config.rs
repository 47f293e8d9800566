//! Configuration types for the relay

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the relay process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// TCP port for the source (screen capture) signaling listener
    pub source_port: u16,

    /// TCP port for the sink (viewer) signaling listener
    pub sink_port: u16,

    /// TURN server the relay advertises to every peer connection
    pub turn: TurnServerConfig,

    /// Log file appended in addition to stderr output (None disables it)
    pub log_file: Option<PathBuf>,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn:<host>:<port>?transport=tcp)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            source_port: 9002,
            sink_port: 9003,
            turn: TurnServerConfig::default(),
            log_file: Some(PathBuf::from("relay.log")),
        }
    }
}

impl Default for TurnServerConfig {
    fn default() -> Self {
        Self {
            url: "turn:127.0.0.1:3478?transport=tcp".to_string(),
            username: "user".to_string(),
            credential: "root".to_string(),
        }
    }
}

impl RelayConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - either listener port is zero
    /// - the source and sink listeners share a port
    /// - the TURN URL is not a turn:// or turns:// URL
    /// - the TURN credentials are empty
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.source_port == 0 || self.sink_port == 0 {
            return Err(Error::InvalidConfig(
                "listener ports must be non-zero".to_string(),
            ));
        }

        if self.source_port == self.sink_port {
            return Err(Error::InvalidConfig(format!(
                "source and sink listeners must use distinct ports, both got {}",
                self.source_port
            )));
        }

        if !self.turn.url.starts_with("turn:") && !self.turn.url.starts_with("turns:") {
            return Err(Error::InvalidConfig(format!(
                "TURN URL must start with turn: or turns:, got {}",
                self.turn.url
            )));
        }

        if self.turn.username.is_empty() || self.turn.credential.is_empty() {
            return Err(Error::InvalidConfig(
                "TURN username and credential must be set".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.source_port, 9002);
        assert_eq!(config.sink_port, 9003);
    }

    #[test]
    fn test_shared_port_fails() {
        let mut config = RelayConfig::default();
        config.sink_port = config.source_port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_port_fails() {
        let mut config = RelayConfig::default();
        config.source_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_turn_url_fails() {
        let mut config = RelayConfig::default();
        config.turn.url = "http://example.com:3478".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_turn_credential_fails() {
        let mut config = RelayConfig::default();
        config.turn.credential.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = RelayConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: RelayConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.source_port, deserialized.source_port);
        assert_eq!(config.turn.url, deserialized.turn.url);
    }
}
