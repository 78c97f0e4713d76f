//! Fixed-step simulation shared by the server and the predicting client

use crate::command::EngineCommand;
use crate::physics::{self, Kill};
use crate::world::World;
use crate::{
    PickupId, PlayerId, MAX_SHIELD, PICKUP_RADIUS, PLAYER_RADIUS, SHELL_SPEED, SHIELD_REGEN_CAP,
    SHIELD_REGEN_RATE,
};
use glam::Vec3;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("no empty spawn points left in the arena")]
    NoSpawnPoints,
}

/// What a physics step observed but did not act on.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StepEvents {
    pub kills: Vec<Kill>,
    /// Player standing on an active pickup it can use.
    pub pickups: Vec<(PlayerId, PickupId)>,
}

#[derive(Debug, Clone)]
pub struct Engine {
    world: World,
}

impl Engine {
    pub fn new(world: World) -> Self {
        Self { world }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn execute(&mut self, command: &EngineCommand) {
        command.apply(&mut self.world);
    }

    pub fn execute_all<'a>(&mut self, commands: impl IntoIterator<Item = &'a EngineCommand>) {
        for command in commands {
            command.apply(&mut self.world);
        }
    }

    pub fn get_empty_spawn_point(&self) -> Result<Vec3, EngineError> {
        self.world.get_empty_spawn_point()
    }

    /// Advances the world by `dt` seconds.
    pub fn step(&mut self, dt: f64) -> StepEvents {
        let World {
            arena,
            players,
            shells,
            pickups,
        } = &mut self.world;
        let dtf = dt as f32;

        for player in players.values_mut().filter(|p| p.is_alive()) {
            if player.shield < SHIELD_REGEN_CAP {
                player.shield = (player.shield + SHIELD_REGEN_RATE * dtf).min(SHIELD_REGEN_CAP);
            }
            player.fire_cooldown = (player.fire_cooldown - dt).max(0.0);
        }

        for shell in shells.iter_mut() {
            shell.position += shell.direction * SHELL_SPEED * dtf;
        }

        for player in players.values_mut().filter(|p| p.is_alive()) {
            physics::resolve_player_walls(arena, player);
        }
        physics::resolve_player_collisions(players);
        let kills = physics::resolve_shell_collisions(arena, players, shells);

        let reach = PLAYER_RADIUS + PICKUP_RADIUS;
        let pickups = pickups
            .iter()
            .filter(|(_, pickup)| pickup.active)
            .filter_map(|(&pickup_id, pickup)| {
                players
                    .values()
                    .find(|p| {
                        p.is_alive()
                            && p.shield < MAX_SHIELD
                            && p.ground_position().distance(pickup.position.truncate()) <= reach
                    })
                    .map(|p| (p.id, pickup_id))
            })
            .collect();

        StepEvents { kills, pickups }
    }

    /// Applies a batch of commands and then steps, as the client does for
    /// every predicted frame.
    pub fn update<'a>(
        &mut self,
        commands: impl IntoIterator<Item = &'a EngineCommand>,
        dt: f64,
    ) -> StepEvents {
        self.execute_all(commands);
        self.step(dt)
    }
}
