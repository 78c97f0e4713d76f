use crate::arena::{Arena, CellType};
use crate::engine::EngineError;
use crate::{PickupId, PlayerId, MAX_HEALTH, SHIELD_REGEN_CAP};
use glam::{Vec2, Vec3};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub position: Vec3,
    pub velocity: Vec3,
    pub color: Vec3,
    /// Heading of the hull in radians, follows the velocity.
    pub tank_angle: f32,
    /// Heading of the turret in radians, follows the aim.
    pub turret_angle: f32,
    pub health: f32,
    pub shield: f32,
    /// Seconds until the next shot is allowed.
    pub fire_cooldown: f64,
    pub kills: i32,
    pub deaths: i32,
}

impl Player {
    pub fn new(id: PlayerId, position: Vec3, color: Vec3) -> Self {
        Self {
            id,
            position,
            velocity: Vec3::ZERO,
            color,
            tank_angle: 0.0,
            turret_angle: 0.0,
            health: MAX_HEALTH,
            shield: SHIELD_REGEN_CAP,
            fire_cooldown: 0.0,
            kills: 0,
            deaths: 0,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0.0
    }

    /// Position on the ground plane, where all collisions happen.
    pub fn ground_position(&self) -> Vec2 {
        self.position.truncate()
    }

    pub fn can_fire(&self) -> bool {
        self.is_alive() && self.fire_cooldown <= 0.0
    }

    /// Shield absorbs damage first, the rest goes to health. Returns true only
    /// on the hit that takes health from positive to zero or below.
    pub fn take_damage(&mut self, amount: f32) -> bool {
        if !self.is_alive() {
            return false;
        }
        let absorbed = amount.min(self.shield);
        self.shield -= absorbed;
        self.health -= amount - absorbed;
        !self.is_alive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TankShell {
    pub owner: PlayerId,
    /// Unit vector of travel.
    pub direction: Vec2,
    pub position: Vec2,
}

impl TankShell {
    pub fn new(owner: PlayerId, direction: Vec2, position: Vec2) -> Self {
        Self {
            owner,
            direction,
            position,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShieldPickup {
    pub position: Vec3,
    pub active: bool,
}

impl ShieldPickup {
    pub fn new(position: Vec3, active: bool) -> Self {
        Self { position, active }
    }
}

/// Aggregate root of the simulation. Only commands mutate it.
#[derive(Debug, Clone, PartialEq)]
pub struct World {
    pub arena: Arena,
    pub players: BTreeMap<PlayerId, Player>,
    pub shells: Vec<TankShell>,
    pub pickups: BTreeMap<PickupId, ShieldPickup>,
}

impl World {
    /// New world with one active pickup on every bonus cell.
    pub fn new(arena: Arena) -> Self {
        let pickups = arena
            .positions_of(CellType::Bonus)
            .enumerate()
            .map(|(i, (x, y))| (i as PickupId, ShieldPickup::new(Arena::cell_center(x, y), true)))
            .collect();
        Self {
            arena,
            players: BTreeMap::new(),
            shells: Vec::new(),
            pickups,
        }
    }

    /// World rebuilt from handshake data on the client.
    pub fn with_state(
        arena: Arena,
        players: BTreeMap<PlayerId, Player>,
        pickups: BTreeMap<PickupId, ShieldPickup>,
    ) -> Self {
        Self {
            arena,
            players,
            shells: Vec::new(),
            pickups,
        }
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    /// Spawn cells not currently occupied by a live player, row-major.
    pub fn empty_spawn_points(&self) -> Vec<(usize, usize)> {
        let occupied: Vec<(i64, i64)> = self
            .players
            .values()
            .filter(|p| p.is_alive())
            .map(|p| Arena::cell_of(p.ground_position()))
            .collect();

        self.arena
            .spawn_points()
            .iter()
            .copied()
            .filter(|&(x, y)| !occupied.contains(&(x as i64, y as i64)))
            .collect()
    }

    /// First free spawn point; fails only when every spawn cell is occupied.
    pub fn get_empty_spawn_point(&self) -> Result<Vec3, EngineError> {
        self.empty_spawn_points()
            .first()
            .map(|&(x, y)| Arena::cell_center(x, y))
            .ok_or(EngineError::NoSpawnPoints)
    }
}
