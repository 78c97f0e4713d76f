//! Client configuration, built from the command line in `main`

use shared::config::Ports;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("frame duration must be greater than zero")]
    ZeroFrame,
    #[error("handshake timeout must be greater than zero")]
    ZeroHandshakeTimeout,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_address: IpAddr,
    pub ports: Ports,
    /// Target duration of one predicted frame
    pub frame: Duration,
    /// How long to wait for the server to open the command stream
    pub handshake_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ports: Ports::default(),
            frame: Duration::from_millis(16),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame.is_zero() {
            return Err(ConfigError::ZeroFrame);
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::ZeroHandshakeTimeout);
        }
        Ok(())
    }

    pub fn connect_address(&self) -> SocketAddr {
        SocketAddr::new(self.server_address, self.ports.connection())
    }

    /// Where input snapshots are sent.
    pub fn updates_address(&self) -> SocketAddr {
        SocketAddr::new(self.server_address, self.ports.client_updates())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_addresses_follow_port_layout() {
        let config = ClientConfig {
            ports: Ports::new(30000),
            ..ClientConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.connect_address().port(), 30000);
        assert_eq!(config.updates_address().port(), 30001);
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let config = ClientConfig {
            frame: Duration::ZERO,
            ..ClientConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroFrame));

        let config = ClientConfig {
            handshake_timeout: Duration::ZERO,
            ..ClientConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroHandshakeTimeout));
    }
}
