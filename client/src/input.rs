//! Input snapshots: where they come from and how they are numbered

use shared::command::PressedKeys;
use shared::protocol::ClientUpdate;
use shared::world::World;
use shared::{PlayerId, MAX_CLIENT_DT};
use std::f32::consts::TAU;

/// Controls held during one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InputSample {
    pub keys: PressedKeys,
    pub turret_angle: f32,
    pub fire: bool,
    pub secondary: bool,
}

/// Anything that can drive a player: a keyboard, a bot, a replay.
pub trait InputSource {
    fn sample(&mut self, world: &World, player_id: PlayerId, dt: f64) -> InputSample;
}

/// Bot that drives in a square, sweeps its turret and keeps the trigger down.
#[derive(Debug, Clone)]
pub struct ScriptedInput {
    leg_duration: f64,
    turret_speed: f32,
    elapsed: f64,
    turret_angle: f32,
}

impl ScriptedInput {
    const LEGS: [PressedKeys; 4] = [PressedKeys::W, PressedKeys::D, PressedKeys::S, PressedKeys::A];

    pub fn new(leg_duration: f64, turret_speed: f32) -> Self {
        Self {
            leg_duration,
            turret_speed,
            elapsed: 0.0,
            turret_angle: 0.0,
        }
    }
}

impl Default for ScriptedInput {
    fn default() -> Self {
        Self::new(1.5, 1.0)
    }
}

impl InputSource for ScriptedInput {
    fn sample(&mut self, world: &World, player_id: PlayerId, dt: f64) -> InputSample {
        self.elapsed += dt;
        self.turret_angle = (self.turret_angle + self.turret_speed * dt as f32).rem_euclid(TAU);

        let leg = (self.elapsed / self.leg_duration) as usize % Self::LEGS.len();
        let alive = world.player(player_id).is_some_and(|p| p.is_alive());
        InputSample {
            keys: if alive { Self::LEGS[leg] } else { PressedKeys::empty() },
            turret_angle: self.turret_angle,
            fire: alive,
            secondary: false,
        }
    }
}

/// Turns samples into numbered input snapshots.
pub struct InputManager {
    next_update_id: i32,
}

impl InputManager {
    pub fn new() -> Self {
        Self { next_update_id: 1 }
    }

    pub fn next_update(&mut self, player_id: PlayerId, sample: InputSample, dt: f64) -> ClientUpdate {
        let id = self.next_update_id;
        self.next_update_id += 1;
        ClientUpdate {
            id,
            player_id,
            keys: sample.keys,
            left_mouse: sample.fire,
            right_mouse: sample.secondary,
            turret_angle: sample.turret_angle,
            dt: dt.clamp(0.0, MAX_CLIENT_DT),
        }
    }
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new()
    }
}
