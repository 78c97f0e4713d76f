//! Server configuration, built from the command line in `main`

use shared::arena::{Arena, ArenaError, DEFAULT_MAP};
use shared::config::{Ports, MAX_PLAYER_SLOTS};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("tick duration must be greater than zero")]
    ZeroTick,
    #[error("timeout must be greater than zero")]
    ZeroTimeout,
    #[error("max players {0} is outside the available player slots")]
    PlayerCount(usize),
    #[error("base port {0} leaves no room for the per-player ports of {1} players")]
    PortRange(u16, usize),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the connect and input sockets are bound to
    pub bind_address: IpAddr,
    pub ports: Ports,
    /// Target duration of one simulation tick
    pub tick: Duration,
    /// How long a connected client may stay silent before eviction
    pub timeout: Duration,
    /// Map file; the built-in map is used when absent
    pub map_path: Option<PathBuf>,
    pub max_players: usize,
    /// Pause before a batch of guaranteed commands is flushed
    pub reliable_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            ports: Ports::default(),
            tick: Duration::from_millis(33),
            timeout: Duration::from_secs(5),
            map_path: None,
            max_players: 16,
            reliable_delay: Duration::from_millis(250),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick.is_zero() {
            return Err(ConfigError::ZeroTick);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_players == 0 || self.max_players > MAX_PLAYER_SLOTS {
            return Err(ConfigError::PlayerCount(self.max_players));
        }
        if !self.ports.fits(self.max_players) {
            return Err(ConfigError::PortRange(self.ports.base, self.max_players));
        }
        Ok(())
    }

    /// Number of silent ticks after which a client is evicted.
    pub fn ticks_to_timeout(&self) -> u32 {
        let ticks = self.timeout.as_secs_f64() / self.tick.as_secs_f64();
        (ticks.ceil() as u32).max(1)
    }

    pub fn load_arena(&self) -> Result<Arena, ArenaError> {
        match &self.map_path {
            Some(path) => Arena::load(path),
            None => DEFAULT_MAP.parse(),
        }
    }
}
