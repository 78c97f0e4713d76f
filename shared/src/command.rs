//! Simulation commands, the only way the world is mutated
//!
//! A command naming a player that is no longer in the world is a no-op, since
//! connects and disconnects can race with in-flight input.

use crate::physics;
use crate::world::{Player, TankShell, World};
use crate::{
    PickupId, PlayerId, ACCELERATION, FIRE_COOLDOWN, MAX_CLIENT_DT, MAX_HEALTH, MAX_SHIELD,
    MAX_SPEED, PICKUP_SHIELD_BONUS, PLAYER_RADIUS, SHIELD_REGEN_CAP,
};
use bitflags::bitflags;
use glam::{Vec2, Vec3};

bitflags! {
    /// Movement keys held during a client frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PressedKeys: u8 {
        const W = 1 << 1;
        const A = 1 << 2;
        const S = 1 << 3;
        const D = 1 << 4;
    }
}

impl PressedKeys {
    /// Unnormalised direction on the ground plane. W is +y, D is +x.
    pub fn direction(self) -> Vec2 {
        let mut dir = Vec2::ZERO;
        if self.contains(PressedKeys::W) {
            dir.y += 1.0;
        }
        if self.contains(PressedKeys::S) {
            dir.y -= 1.0;
        }
        if self.contains(PressedKeys::D) {
            dir.x += 1.0;
        }
        if self.contains(PressedKeys::A) {
            dir.x -= 1.0;
        }
        dir
    }
}

/// Authoritative per-player state carried by a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerState {
    pub id: PlayerId,
    pub position: Vec3,
    pub velocity: Vec3,
    pub tank_angle: f32,
    pub turret_angle: f32,
    pub fire_cooldown: f64,
    pub health: f32,
    pub shield: f32,
}

impl PlayerState {
    pub fn of(player: &Player) -> Self {
        Self {
            id: player.id,
            position: player.position,
            velocity: player.velocity,
            tank_angle: player.tank_angle,
            turret_angle: player.turret_angle,
            fire_cooldown: player.fire_cooldown,
            health: player.health,
            shield: player.shield,
        }
    }

    fn overwrite(&self, player: &mut Player) {
        player.position = self.position;
        player.velocity = self.velocity;
        player.tank_angle = self.tank_angle;
        player.turret_angle = self.turret_angle;
        player.fire_cooldown = self.fire_cooldown;
        player.health = self.health;
        player.shield = self.shield;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    PlayersState(Vec<PlayerState>),
    PlayerConnected {
        id: PlayerId,
        color: Vec3,
        position: Vec3,
    },
    PlayerDisconnected {
        id: PlayerId,
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
}

impl EngineCommand {
    pub fn apply(&self, world: &mut World) {
        match self {
            EngineCommand::PlayersState(states) => {
                for state in states {
                    if let Some(player) = world.players.get_mut(&state.id) {
                        state.overwrite(player);
                    }
                }
            }
            EngineCommand::PlayerConnected {
                id,
                color,
                position,
            } => {
                world
                    .players
                    .insert(*id, Player::new(*id, *position, *color));
            }
            EngineCommand::PlayerDisconnected { id } => {
                world.players.remove(id);
            }
            EngineCommand::PlayerMove { id, keys, dt } => {
                if let Some(player) = world.players.get_mut(id) {
                    if player.is_alive() {
                        accelerate(player, *keys, client_dt(*dt));
                        physics::resolve_player_walls(&world.arena, player);
                    }
                }
            }
            EngineCommand::PlayerAimTurret { id, angle } => {
                if let Some(player) = world.players.get_mut(id) {
                    if angle.is_finite() {
                        player.turret_angle = *angle;
                    }
                }
            }
            EngineCommand::PlayerFire { id, direction } => {
                let Some(player) = world.players.get_mut(id) else {
                    return;
                };
                let direction = direction.normalize_or_zero();
                if direction == Vec2::ZERO || !player.is_alive() {
                    return;
                }
                player.fire_cooldown = FIRE_COOLDOWN;
                let muzzle = player.ground_position() + direction * PLAYER_RADIUS;
                world.shells.push(TankShell::new(*id, direction, muzzle));
            }
            EngineCommand::PlayerDeath {
                killed,
                killer,
                respawn,
            } => {
                if let Some(player) = world.players.get_mut(killed) {
                    player.deaths += 1;
                    player.position = *respawn;
                    player.velocity = Vec3::ZERO;
                    player.health = MAX_HEALTH;
                    player.shield = SHIELD_REGEN_CAP;
                    player.fire_cooldown = 0.0;
                }
                if killer != killed {
                    if let Some(player) = world.players.get_mut(killer) {
                        player.kills += 1;
                    }
                }
            }
            EngineCommand::RespawnPickups => {
                for pickup in world.pickups.values_mut() {
                    pickup.active = true;
                }
            }
            EngineCommand::UseShieldPickup { player, pickup } => {
                let (Some(p), Some(pk)) = (
                    world.players.get_mut(player),
                    world.pickups.get_mut(pickup),
                ) else {
                    return;
                };
                if pk.active {
                    pk.active = false;
                    p.shield = (p.shield + PICKUP_SHIELD_BONUS).min(MAX_SHIELD);
                }
            }
        }
    }
}

/// Client frame time as used for movement: clamped, and zero when not finite.
fn client_dt(dt: f64) -> f32 {
    if dt.is_finite() {
        dt.clamp(0.0, MAX_CLIENT_DT) as f32
    } else {
        0.0
    }
}

/// Velocity update and position integration for one move command.
fn accelerate(player: &mut Player, keys: PressedKeys, dt: f32) {
    let dir = keys.direction();
    let mut velocity = player.velocity.truncate();

    if dir != Vec2::ZERO {
        velocity += dir.normalize() * ACCELERATION * dt;
        velocity = velocity.clamp_length_max(MAX_SPEED);
    } else {
        let speed = velocity.length();
        let slowed = (speed - ACCELERATION * dt).max(0.0);
        velocity = if speed > 0.0 {
            velocity * (slowed / speed)
        } else {
            Vec2::ZERO
        };
    }

    player.velocity = velocity.extend(0.0);
    player.position += player.velocity * dt;
    if velocity.length_squared() > 1e-6 {
        player.tank_angle = velocity.y.atan2(velocity.x);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use assert_approx_eq::assert_approx_eq;

    fn world_with_player() -> World {
        let mut world = World::new("######\n#S...#\n#....#\n#..B.#\n#....#\n######\n".parse::<Arena>().unwrap());
        EngineCommand::PlayerConnected {
            id: 3,
            color: Vec3::new(1.0, 0.0, 0.0),
            position: Vec3::new(2.5, 2.5, 0.0),
        }
        .apply(&mut world);
        world
    }

    #[test]
    fn test_pressed_keys_direction() {
        assert_eq!((PressedKeys::W | PressedKeys::D).direction(), Vec2::new(1.0, 1.0));
        assert_eq!((PressedKeys::W | PressedKeys::S).direction(), Vec2::ZERO);
        assert_eq!(PressedKeys::from_bits_truncate(0xFF), PressedKeys::all());
    }

    #[test]
    fn test_connect_and_disconnect() {
        let mut world = world_with_player();
        assert_eq!(world.players.len(), 1);
        assert_eq!(world.players[&3].color, Vec3::new(1.0, 0.0, 0.0));

        EngineCommand::PlayerDisconnected { id: 3 }.apply(&mut world);
        assert!(world.players.is_empty());
    }

    #[test]
    fn test_commands_for_missing_player_are_noops() {
        let mut world = world_with_player();
        let before = world.clone();
        for cmd in [
            EngineCommand::PlayerMove {
                id: 9,
                keys: PressedKeys::W,
                dt: 0.05,
            },
            EngineCommand::PlayerAimTurret { id: 9, angle: 1.0 },
            EngineCommand::PlayerFire {
                id: 9,
                direction: Vec2::X,
            },
            EngineCommand::PlayerDisconnected { id: 9 },
            EngineCommand::UseShieldPickup { player: 9, pickup: 0 },
        ] {
            cmd.apply(&mut world);
        }
        assert_eq!(world, before);
    }

    #[test]
    fn test_move_accelerates_and_integrates() {
        let mut world = world_with_player();
        EngineCommand::PlayerMove {
            id: 3,
            keys: PressedKeys::D,
            dt: 0.1,
        }
        .apply(&mut world);

        let player = &world.players[&3];
        assert_approx_eq!(player.velocity.x, ACCELERATION * 0.1, 1e-5);
        assert_approx_eq!(player.position.x, 2.5 + ACCELERATION * 0.01, 1e-5);
        assert_approx_eq!(player.tank_angle, 0.0, 1e-5);
    }

    #[test]
    fn test_move_speed_is_capped_and_decays() {
        let mut world = world_with_player();
        for _ in 0..20 {
            EngineCommand::PlayerMove {
                id: 3,
                keys: PressedKeys::W,
                dt: 0.01,
            }
            .apply(&mut world);
        }
        for _ in 0..10 {
            EngineCommand::PlayerMove {
                id: 3,
                keys: PressedKeys::W,
                dt: 1.0,
            }
            .apply(&mut world);
        }
        assert!(world.players[&3].velocity.length() <= MAX_SPEED + 1e-5);

        for _ in 0..100 {
            EngineCommand::PlayerMove {
                id: 3,
                keys: PressedKeys::empty(),
                dt: 0.05,
            }
            .apply(&mut world);
        }
        assert_eq!(world.players[&3].velocity, Vec3::ZERO);
    }

    #[test]
    fn test_non_finite_input_leaves_player_untouched() {
        let mut world = world_with_player();
        let before = world.players[&3].clone();
        for dt in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            EngineCommand::PlayerMove {
                id: 3,
                keys: PressedKeys::W | PressedKeys::D,
                dt,
            }
            .apply(&mut world);
        }
        EngineCommand::PlayerAimTurret {
            id: 3,
            angle: f32::NAN,
        }
        .apply(&mut world);

        let player = &world.players[&3];
        assert_eq!(player.position, before.position);
        assert_eq!(player.turret_angle, before.turret_angle);
        assert!(player.velocity.is_finite());
    }

    #[test]
    fn test_fire_spawns_shell_and_starts_cooldown() {
        let mut world = world_with_player();
        EngineCommand::PlayerFire {
            id: 3,
            direction: Vec2::new(0.0, 2.0),
        }
        .apply(&mut world);

        assert_eq!(world.shells.len(), 1);
        assert_eq!(world.shells[0].owner, 3);
        assert_eq!(world.shells[0].direction, Vec2::Y);
        assert_eq!(world.players[&3].fire_cooldown, FIRE_COOLDOWN);
    }

    #[test]
    fn test_snapshot_is_idempotent() {
        let mut world = world_with_player();
        let mut state = PlayerState::of(&world.players[&3]);
        state.position = Vec3::new(3.0, 3.5, 0.0);
        state.health = 42.0;
        let snapshot = EngineCommand::PlayersState(vec![state]);

        snapshot.apply(&mut world);
        let once = world.clone();
        snapshot.apply(&mut world);
        assert_eq!(world, once);
        assert_eq!(world.players[&3].health, 42.0);
    }

    #[test]
    fn test_death_respawns_and_counts() {
        let mut world = world_with_player();
        EngineCommand::PlayerConnected {
            id: 4,
            color: Vec3::ONE,
            position: Vec3::new(4.5, 4.5, 0.0),
        }
        .apply(&mut world);
        world.players.get_mut(&3).unwrap().health = -5.0;

        EngineCommand::PlayerDeath {
            killed: 3,
            killer: 4,
            respawn: Vec3::new(1.5, 1.5, 0.0),
        }
        .apply(&mut world);

        let killed = &world.players[&3];
        assert_eq!(killed.deaths, 1);
        assert_eq!(killed.health, MAX_HEALTH);
        assert_eq!(killed.position, Vec3::new(1.5, 1.5, 0.0));
        assert_eq!(world.players[&4].kills, 1);
    }

    #[test]
    fn test_shield_pickup_only_when_active() {
        let mut world = world_with_player();
        let use_pickup = EngineCommand::UseShieldPickup { player: 3, pickup: 0 };

        use_pickup.apply(&mut world);
        let shield = world.players[&3].shield;
        assert!(!world.pickups[&0].active);
        assert_eq!(shield, (SHIELD_REGEN_CAP + PICKUP_SHIELD_BONUS).min(MAX_SHIELD));

        use_pickup.apply(&mut world);
        assert_eq!(world.players[&3].shield, shield);

        EngineCommand::RespawnPickups.apply(&mut world);
        assert!(world.pickups[&0].active);
    }
}
