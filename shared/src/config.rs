//! Port layout shared by server and client
//!
//! Four ports derive from one base. The two per-player ports are shifted by the
//! player ID so several clients can run on one host without colliding.

use crate::PlayerId;

/// Default base port for the connect handshake.
pub const DEFAULT_BASE_PORT: u16 = 23545;

/// Offset of the server→client unreliable port.
pub const SERVER_UPDATES_OFFSET: u16 = 2;

/// Offset of the server→client reliable port.
pub const RELIABLE_UPDATES_OFFSET: u16 = 102;

/// Number of player IDs that fit between the two per-player port ranges.
pub const MAX_PLAYER_SLOTS: usize = (RELIABLE_UPDATES_OFFSET - SERVER_UPDATES_OFFSET) as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ports {
    pub base: u16,
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_PORT,
        }
    }
}

impl Ports {
    pub fn new(base: u16) -> Self {
        Self { base }
    }

    /// Reliable port the server accepts new connections on.
    pub fn connection(&self) -> u16 {
        self.base
    }

    /// Unreliable port the server receives input snapshots on.
    pub fn client_updates(&self) -> u16 {
        self.base.wrapping_add(1)
    }

    /// Unreliable port a client receives state snapshots on.
    pub fn server_updates(&self, player_id: PlayerId) -> u16 {
        self.offset_port(SERVER_UPDATES_OFFSET, player_id)
    }

    /// Reliable port a client accepts the guaranteed-command stream on.
    pub fn reliable_server_updates(&self, player_id: PlayerId) -> u16 {
        self.offset_port(RELIABLE_UPDATES_OFFSET, player_id)
    }

    fn offset_port(&self, offset: u16, player_id: PlayerId) -> u16 {
        self.base
            .wrapping_add(offset)
            .wrapping_add(player_id.max(0) as u16)
    }

    /// True when every derived port for `max_players` IDs fits into `u16`.
    pub fn fits(&self, max_players: usize) -> bool {
        let highest = self.base as usize + RELIABLE_UPDATES_OFFSET as usize + max_players;
        max_players <= MAX_PLAYER_SLOTS && highest <= u16::MAX as usize
    }
}
