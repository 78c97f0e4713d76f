use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use shared::arena::Arena;
use shared::command::{EngineCommand, PlayerState};
use shared::engine::{Engine, EngineError};
use shared::physics::Kill;
use shared::protocol::{ClientUpdate, ConnectingDynamicData, ServerCommand};
use shared::world::World;
use shared::{PlayerId, PICKUP_RESPAWN_INTERVAL};
use glam::Vec3;
use std::collections::{BTreeSet, VecDeque};

/// Authoritative match state: the engine plus the rules that decide which
/// commands get issued.
///
/// Every command issued is applied to the engine immediately and queued in
/// the outbox for broadcast at the end of the tick.
#[derive(Debug)]
pub struct GameState {
    pub tick: u64,
    engine: Engine,
    rng: StdRng,
    pending_deaths: VecDeque<Kill>,
    pickup_timer: f64,
    outbox: Vec<ServerCommand>,
}

impl GameState {
    pub fn new(arena: Arena) -> Self {
        Self::with_rng(arena, StdRng::from_entropy())
    }

    pub fn with_seed(arena: Arena, seed: u64) -> Self {
        Self::with_rng(arena, StdRng::seed_from_u64(seed))
    }

    fn with_rng(arena: Arena, rng: StdRng) -> Self {
        Self {
            tick: 0,
            engine: Engine::new(World::new(arena)),
            rng,
            pending_deaths: VecDeque::new(),
            pickup_timer: 0.0,
            outbox: Vec::new(),
        }
    }

    pub fn world(&self) -> &World {
        self.engine.world()
    }

    fn issue(&mut self, command: ServerCommand) {
        self.engine.execute(&command.translate());
        self.outbox.push(command);
    }

    /// Guaranteed and effect commands issued since the last call.
    pub fn take_outbox(&mut self) -> Vec<ServerCommand> {
        std::mem::take(&mut self.outbox)
    }

    fn random_spawn_point(&mut self) -> Result<Vec3, EngineError> {
        let free = self.engine.world().empty_spawn_points();
        let &(x, y) = free.choose(&mut self.rng).ok_or(EngineError::NoSpawnPoints)?;
        Ok(Arena::cell_center(x, y))
    }

    /// Places a new player on a random free spawn point.
    pub fn spawn_player(&mut self, id: PlayerId) -> Result<(), EngineError> {
        let position = self.random_spawn_point()?;
        let color = Vec3::new(
            self.rng.gen_range(0.2..1.0),
            self.rng.gen_range(0.2..1.0),
            self.rng.gen_range(0.2..1.0),
        );
        info!("Player {} spawned at ({:.1}, {:.1})", id, position.x, position.y);
        self.issue(ServerCommand::PlayerConnected {
            id,
            color,
            position,
        });
        Ok(())
    }

    pub fn remove_player(&mut self, id: PlayerId) {
        if self.engine.world().player(id).is_none() {
            return;
        }
        self.pending_deaths
            .retain(|kill| kill.killed != id);
        self.issue(ServerCommand::PlayerDisconnected { id });
        info!("Removed player {}", id);
    }

    /// Snapshot a newly connected client starts from.
    pub fn dynamic_data(&self) -> ConnectingDynamicData {
        let world = self.engine.world();
        ConnectingDynamicData {
            players: world.players.clone(),
            pickups: world.pickups.clone(),
        }
    }

    /// Turns input snapshots into simulation commands and applies them.
    ///
    /// A player fires at most once per tick and only once its cooldown has run
    /// out. Cooldowns count down with the server tick, never with the
    /// client-reported frame time.
    pub fn apply_updates(&mut self, updates: &[ClientUpdate]) {
        let mut commands = Vec::with_capacity(updates.len() * 2);
        let mut fired = BTreeSet::new();

        for update in updates {
            let Some(player) = self.engine.world().player(update.player_id) else {
                continue;
            };
            if !update.is_finite() {
                warn!("Ignoring non-finite update {} from player {}", update.id, update.player_id);
                continue;
            }
            let can_fire = player.can_fire();
            commands.extend(update.predicted_commands());

            if update.left_mouse && can_fire && fired.insert(update.player_id) {
                let direction = update.aim_direction();
                commands.push(EngineCommand::PlayerFire {
                    id: update.player_id,
                    direction,
                });
                self.outbox.push(ServerCommand::PlayerFire {
                    id: update.player_id,
                    direction,
                });
            }
        }

        self.engine.execute_all(&commands);
    }

    /// Advances physics and turns what it observed into commands.
    pub fn step(&mut self, dt: f64) {
        self.tick += 1;
        self.pickup_timer += dt;
        if self.pickup_timer >= PICKUP_RESPAWN_INTERVAL {
            self.pickup_timer -= PICKUP_RESPAWN_INTERVAL;
            if self.engine.world().pickups.values().any(|p| !p.active) {
                debug!("Respawning shield pickups");
                self.issue(ServerCommand::RespawnPickups);
            }
        }

        let events = self.engine.step(dt);
        for (player, pickup) in events.pickups {
            self.issue(ServerCommand::UseShieldPickup { player, pickup });
        }
        for kill in events.kills {
            info!("Player {} was destroyed by player {}", kill.killed, kill.killer);
            self.pending_deaths.push_back(kill);
        }
    }

    /// Respawns destroyed players. A death that finds no free spawn point
    /// stays queued for the next tick.
    pub fn process_deaths(&mut self) {
        while let Some(kill) = self.pending_deaths.front().copied() {
            if self.engine.world().player(kill.killed).is_none() {
                self.pending_deaths.pop_front();
                continue;
            }
            let respawn = match self.random_spawn_point() {
                Ok(position) => position,
                Err(e) => {
                    warn!("Cannot respawn player {} yet: {}", kill.killed, e);
                    break;
                }
            };
            self.pending_deaths.pop_front();
            self.issue(ServerCommand::PlayerDeath {
                killed: kill.killed,
                killer: kill.killer,
                respawn,
            });
        }
    }

    pub fn pending_deaths(&self) -> usize {
        self.pending_deaths.len()
    }

    /// Full state of every player, sent unreliably each tick.
    pub fn snapshot(&self) -> ServerCommand {
        ServerCommand::PlayersState(
            self.engine
                .world()
                .players
                .values()
                .map(PlayerState::of)
                .collect(),
        )
    }
}
