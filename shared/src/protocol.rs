//! Wire commands and handshake payloads
//!
//! Every wire command starts with a one-byte discriminant. Commands whose loss
//! would desynchronise clients are flagged `guaranteed_exec` and travel on the
//! reliable stream; the rest ride datagrams and are superseded next tick.
//!
//! Server→client envelopes carry the last input ID the server processed for
//! the receiving client:
//!
//! ```text
//! datagram:  i32 last_processed | u8 kind | fields...
//! reliable:  i32 last_processed | u8 update_type (1) | u8 kind | fields...
//! ```

use crate::arena::{Arena, CellType};
use crate::codec::{self, CodecError, WireReader, WireWriter};
use crate::command::{EngineCommand, PlayerState, PressedKeys};
use crate::world::{Player, ShieldPickup};
use crate::{PickupId, PlayerId};
use glam::{Vec2, Vec3};
use std::collections::BTreeMap;

/// Update type tag of a reliable envelope carrying a command.
pub const UPDATE_TYPE_COMMAND: u8 = 1;

/// Encoded size of a [`ClientUpdate`].
pub const CLIENT_UPDATE_SIZE: usize = 4 + 4 + 1 + 1 + 1 + 4 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandKind {
    PlayersState = 0,
    PlayerConnected = 1,
    PlayerDisconnected = 2,
    PlayerFire = 3,
    PlayerDeath = 4,
    RespawnPickups = 5,
    UseShieldPickup = 6,
    PlayerMove = 7,
    PlayerAimTurret = 8,
}

impl TryFrom<u8> for CommandKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => CommandKind::PlayersState,
            1 => CommandKind::PlayerConnected,
            2 => CommandKind::PlayerDisconnected,
            3 => CommandKind::PlayerFire,
            4 => CommandKind::PlayerDeath,
            5 => CommandKind::RespawnPickups,
            6 => CommandKind::UseShieldPickup,
            7 => CommandKind::PlayerMove,
            8 => CommandKind::PlayerAimTurret,
            other => return Err(CodecError::UnknownCommand(other)),
        })
    }
}

/// Serializable counterpart of [`EngineCommand`], one variant each.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerCommand {
    PlayersState(Vec<PlayerState>),
    PlayerConnected {
        id: PlayerId,
        color: Vec3,
        position: Vec3,
    },
    PlayerDisconnected {
        id: PlayerId,
    },
    PlayerFire {
        id: PlayerId,
        direction: Vec2,
    },
    PlayerDeath {
        killed: PlayerId,
        killer: PlayerId,
        respawn: Vec3,
    },
    RespawnPickups,
    UseShieldPickup {
        player: PlayerId,
        pickup: PickupId,
    },
    PlayerMove {
        id: PlayerId,
        keys: PressedKeys,
        dt: f64,
    },
    PlayerAimTurret {
        id: PlayerId,
        angle: f32,
    },
}

impl ServerCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            ServerCommand::PlayersState(_) => CommandKind::PlayersState,
            ServerCommand::PlayerConnected { .. } => CommandKind::PlayerConnected,
            ServerCommand::PlayerDisconnected { .. } => CommandKind::PlayerDisconnected,
            ServerCommand::PlayerFire { .. } => CommandKind::PlayerFire,
            ServerCommand::PlayerDeath { .. } => CommandKind::PlayerDeath,
            ServerCommand::RespawnPickups => CommandKind::RespawnPickups,
            ServerCommand::UseShieldPickup { .. } => CommandKind::UseShieldPickup,
            ServerCommand::PlayerMove { .. } => CommandKind::PlayerMove,
            ServerCommand::PlayerAimTurret { .. } => CommandKind::PlayerAimTurret,
        }
    }

    /// Whether the command must go over the reliable channel.
    pub fn guaranteed_exec(&self) -> bool {
        matches!(
            self,
            ServerCommand::PlayerConnected { .. }
                | ServerCommand::PlayerDisconnected { .. }
                | ServerCommand::PlayerDeath { .. }
                | ServerCommand::RespawnPickups
                | ServerCommand::UseShieldPickup { .. }
        )
    }

    pub fn encode_into(&self, w: &mut WireWriter) {
        w.put_u8(self.kind() as u8);
        match self {
            ServerCommand::PlayersState(states) => {
                w.put_i32(states.len() as i32);
                for s in states {
                    w.put_i32(s.id)
                        .put_vec3(s.position)
                        .put_vec3(s.velocity)
                        .put_f32(s.tank_angle)
                        .put_f32(s.turret_angle)
                        .put_f64(s.fire_cooldown)
                        .put_f32(s.health)
                        .put_f32(s.shield);
                }
            }
            ServerCommand::PlayerConnected {
                id,
                color,
                position,
            } => {
                w.put_i32(*id).put_vec3(*color).put_vec3(*position);
            }
            ServerCommand::PlayerDisconnected { id } => {
                w.put_i32(*id);
            }
            ServerCommand::PlayerFire { id, direction } => {
                w.put_i32(*id).put_vec2(*direction);
            }
            ServerCommand::PlayerDeath {
                killed,
                killer,
                respawn,
            } => {
                w.put_i32(*killed).put_i32(*killer).put_vec3(*respawn);
            }
            ServerCommand::RespawnPickups => {}
            ServerCommand::UseShieldPickup { player, pickup } => {
                w.put_i32(*player).put_i32(*pickup);
            }
            ServerCommand::PlayerMove { id, keys, dt } => {
                w.put_i32(*id).put_u8(keys.bits()).put_f64(*dt);
            }
            ServerCommand::PlayerAimTurret { id, angle } => {
                w.put_i32(*id).put_f32(*angle);
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.encode_into(&mut w);
        w.finish()
    }

    pub fn decode_from(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let kind = CommandKind::try_from(r.get_u8()?)?;
        Ok(match kind {
            CommandKind::PlayersState => {
                let count = r.get_len()?;
                let mut states = Vec::with_capacity(count.min(r.remaining()));
                for _ in 0..count {
                    states.push(PlayerState {
                        id: r.get_i32()?,
                        position: r.get_vec3()?,
                        velocity: r.get_vec3()?,
                        tank_angle: r.get_f32()?,
                        turret_angle: r.get_f32()?,
                        fire_cooldown: r.get_f64()?,
                        health: r.get_f32()?,
                        shield: r.get_f32()?,
                    });
                }
                ServerCommand::PlayersState(states)
            }
            CommandKind::PlayerConnected => ServerCommand::PlayerConnected {
                id: r.get_i32()?,
                color: r.get_vec3()?,
                position: r.get_vec3()?,
            },
            CommandKind::PlayerDisconnected => ServerCommand::PlayerDisconnected {
                id: r.get_i32()?,
            },
            CommandKind::PlayerFire => ServerCommand::PlayerFire {
                id: r.get_i32()?,
                direction: r.get_vec2()?,
            },
            CommandKind::PlayerDeath => ServerCommand::PlayerDeath {
                killed: r.get_i32()?,
                killer: r.get_i32()?,
                respawn: r.get_vec3()?,
            },
            CommandKind::RespawnPickups => ServerCommand::RespawnPickups,
            CommandKind::UseShieldPickup => ServerCommand::UseShieldPickup {
                player: r.get_i32()?,
                pickup: r.get_i32()?,
            },
            CommandKind::PlayerMove => ServerCommand::PlayerMove {
                id: r.get_i32()?,
                keys: PressedKeys::from_bits_truncate(r.get_u8()?),
                dt: r.get_f64()?,
            },
            CommandKind::PlayerAimTurret => ServerCommand::PlayerAimTurret {
                id: r.get_i32()?,
                angle: r.get_f32()?,
            },
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = WireReader::new(bytes);
        let command = Self::decode_from(&mut r)?;
        r.finish()?;
        Ok(command)
    }

    /// Simulation command with the same effect.
    pub fn translate(&self) -> EngineCommand {
        match self.clone() {
            ServerCommand::PlayersState(states) => EngineCommand::PlayersState(states),
            ServerCommand::PlayerConnected {
                id,
                color,
                position,
            } => EngineCommand::PlayerConnected {
                id,
                color,
                position,
            },
            ServerCommand::PlayerDisconnected { id } => EngineCommand::PlayerDisconnected { id },
            ServerCommand::PlayerFire { id, direction } => {
                EngineCommand::PlayerFire { id, direction }
            }
            ServerCommand::PlayerDeath {
                killed,
                killer,
                respawn,
            } => EngineCommand::PlayerDeath {
                killed,
                killer,
                respawn,
            },
            ServerCommand::RespawnPickups => EngineCommand::RespawnPickups,
            ServerCommand::UseShieldPickup { player, pickup } => {
                EngineCommand::UseShieldPickup { player, pickup }
            }
            ServerCommand::PlayerMove { id, keys, dt } => EngineCommand::PlayerMove { id, keys, dt },
            ServerCommand::PlayerAimTurret { id, angle } => {
                EngineCommand::PlayerAimTurret { id, angle }
            }
        }
    }
}

/// A command addressed to one client, with that client's input ack.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerMessage {
    pub last_processed_update: i32,
    pub command: ServerCommand,
}

impl ServerMessage {
    pub fn new(last_processed_update: i32, command: ServerCommand) -> Self {
        Self {
            last_processed_update,
            command,
        }
    }

    pub fn encode_datagram(&self) -> Vec<u8> {
        frame_datagram(self.last_processed_update, &self.command.encode())
    }

    pub fn decode_datagram(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = WireReader::new(bytes);
        let last_processed_update = r.get_i32()?;
        let command = ServerCommand::decode_from(&mut r)?;
        r.finish()?;
        Ok(Self::new(last_processed_update, command))
    }

    /// Payload of a reliable message; framing adds the length prefix.
    pub fn encode_reliable(&self) -> Vec<u8> {
        frame_reliable(self.last_processed_update, &self.command.encode())
    }

    pub fn decode_reliable(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = WireReader::new(bytes);
        let last_processed_update = r.get_i32()?;
        match r.get_u8()? {
            UPDATE_TYPE_COMMAND => {}
            other => return Err(CodecError::UnknownUpdateType(other)),
        }
        let command = ServerCommand::decode_from(&mut r)?;
        r.finish()?;
        Ok(Self::new(last_processed_update, command))
    }
}

/// Wraps an already encoded command into a datagram envelope. Lets a
/// broadcast encode each command once for all recipients.
pub fn frame_datagram(last_processed_update: i32, encoded_command: &[u8]) -> Vec<u8> {
    codec::prepend_i32(last_processed_update, encoded_command)
}

/// Wraps an already encoded command into a reliable envelope payload.
pub fn frame_reliable(last_processed_update: i32, encoded_command: &[u8]) -> Vec<u8> {
    let mut w = WireWriter::with_capacity(5 + encoded_command.len());
    w.put_i32(last_processed_update)
        .put_u8(UPDATE_TYPE_COMMAND)
        .put_bytes(encoded_command);
    w.finish()
}

/// Input snapshot a client sends once per frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientUpdate {
    pub id: i32,
    pub player_id: PlayerId,
    pub keys: PressedKeys,
    pub left_mouse: bool,
    pub right_mouse: bool,
    pub turret_angle: f32,
    pub dt: f64,
}

impl ClientUpdate {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(CLIENT_UPDATE_SIZE);
        w.put_i32(self.id)
            .put_i32(self.player_id)
            .put_u8(self.keys.bits())
            .put_bool(self.left_mouse)
            .put_bool(self.right_mouse)
            .put_f32(self.turret_angle)
            .put_f64(self.dt);
        w.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = WireReader::new(bytes);
        let update = Self {
            id: r.get_i32()?,
            player_id: r.get_i32()?,
            keys: PressedKeys::from_bits_truncate(r.get_u8()?),
            left_mouse: r.get_bool()?,
            right_mouse: r.get_bool()?,
            turret_angle: r.get_f32()?,
            dt: r.get_f64()?,
        };
        r.finish()?;
        if !update.turret_angle.is_finite() {
            return Err(CodecError::NonFinite("turret angle"));
        }
        if !update.dt.is_finite() {
            return Err(CodecError::NonFinite("delta time"));
        }
        Ok(update)
    }

    /// False when the angle or frame time is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.turret_angle.is_finite() && self.dt.is_finite()
    }

    /// Unit vector the turret points along.
    pub fn aim_direction(&self) -> Vec2 {
        Vec2::from_angle(self.turret_angle)
    }

    pub fn movement_command(&self) -> EngineCommand {
        EngineCommand::PlayerMove {
            id: self.player_id,
            keys: self.keys,
            dt: self.dt,
        }
    }

    pub fn aim_command(&self) -> EngineCommand {
        EngineCommand::PlayerAimTurret {
            id: self.player_id,
            angle: self.turret_angle,
        }
    }

    /// Commands a client predicts locally for this update.
    pub fn predicted_commands(&self) -> [EngineCommand; 2] {
        [self.movement_command(), self.aim_command()]
    }
}

/// First handshake message: the assigned ID and the arena.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectingStaticData {
    pub player_id: PlayerId,
    pub arena: Arena,
}

impl ConnectingStaticData {
    pub fn encode(&self) -> Vec<u8> {
        let cells = self.arena.cells();
        let mut w = WireWriter::with_capacity(4 + cells.len());
        w.put_i32(self.player_id);
        for &cell in cells {
            w.put_u8(cell as u8);
        }
        w.finish()
    }

    /// The arena size is implied by the payload length.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = WireReader::new(bytes);
        let player_id = r.get_i32()?;
        let raw = r.rest();
        let size = (raw.len() as f64).sqrt().round() as usize;
        if size == 0 || size * size != raw.len() {
            return Err(CodecError::NonSquareArena(raw.len()));
        }
        let cells = raw
            .iter()
            .map(|&b| CellType::try_from(b).map_err(CodecError::InvalidCellType))
            .collect::<Result<Vec<_>, _>>()?;
        let arena =
            Arena::from_cells(size, cells).map_err(|_| CodecError::NonSquareArena(raw.len()))?;
        Ok(Self { player_id, arena })
    }
}

/// Second handshake message: everything a late joiner needs to catch up.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectingDynamicData {
    pub players: BTreeMap<PlayerId, Player>,
    pub pickups: BTreeMap<PickupId, ShieldPickup>,
}

impl ConnectingDynamicData {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_i32(self.players.len() as i32)
            .put_i32(self.pickups.len() as i32);
        for p in self.players.values() {
            w.put_i32(p.id)
                .put_vec3(p.position)
                .put_vec3(p.color)
                .put_i32(p.kills)
                .put_i32(p.deaths);
        }
        for (&id, pickup) in &self.pickups {
            w.put_i32(id)
                .put_vec3(pickup.position)
                .put_bool(pickup.active);
        }
        w.finish()
    }

    /// Players come back at full health; the next snapshot fills in the rest.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = WireReader::new(bytes);
        let player_count = r.get_len()?;
        let pickup_count = r.get_len()?;

        let mut players = BTreeMap::new();
        for _ in 0..player_count {
            let id = r.get_i32()?;
            let position = r.get_vec3()?;
            let color = r.get_vec3()?;
            let mut player = Player::new(id, position, color);
            player.kills = r.get_i32()?;
            player.deaths = r.get_i32()?;
            players.insert(id, player);
        }

        let mut pickups = BTreeMap::new();
        for _ in 0..pickup_count {
            let id = r.get_i32()?;
            let position = r.get_vec3()?;
            let active = r.get_bool()?;
            pickups.insert(id, ShieldPickup::new(position, active));
        }
        r.finish()?;
        Ok(Self { players, pickups })
    }
}
