//! Fixed-tick authoritative loop tying the connection manager to the game

use crate::client_manager::ClientManager;
use crate::config::{ConfigError, ServerConfig};
use crate::game::GameState;
use log::{debug, error, info, warn};
use shared::arena::ArenaError;
use std::future::Future;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};

/// How often the loop logs its state at debug level.
const STATS_INTERVAL_TICKS: u64 = 300;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to load arena: {0}")]
    Arena(#[from] ArenaError),
    #[error("failed to bind server sockets: {0}")]
    Io(#[from] io::Error),
}

/// Fixed-timestep pacing. A tick that overruns its budget leaves a debt that
/// shortens the following pauses until it is repaid.
#[derive(Debug, Clone)]
pub struct TickPacer {
    tick: Duration,
    debt: Duration,
}

impl TickPacer {
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            debt: Duration::ZERO,
        }
    }

    /// Pause before the next tick, given the time spent since the previous
    /// pause was supposed to end.
    pub fn sleep_for(&mut self, spent: Duration) -> Duration {
        let used = spent + self.debt;
        match self.tick.checked_sub(used) {
            Some(pause) => {
                self.debt = Duration::ZERO;
                pause
            }
            None => {
                self.debt = used - self.tick;
                Duration::ZERO
            }
        }
    }

    pub fn debt(&self) -> Duration {
        self.debt
    }
}

/// Authoritative server: owns the roster and the world and advances both one
/// tick at a time.
pub struct Server {
    config: ServerConfig,
    clients: ClientManager,
    game: GameState,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let arena = config.load_arena()?;
        let clients = ClientManager::bind(&config, arena.clone()).await?;
        Ok(Self {
            config,
            clients,
            game: GameState::new(arena),
        })
    }

    pub fn game(&self) -> &GameState {
        &self.game
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    /// Runs one authoritative tick.
    pub async fn tick(&mut self) {
        let dt = self.config.tick.as_secs_f64();

        let mut gone = self.clients.evict_idle().await;
        gone.extend(self.clients.take_closed().await);
        for id in gone {
            self.game.remove_player(id);
        }

        for ready in self.clients.take_ready_clients() {
            // Taken before the spawn, the new player learns about itself
            // through the PlayerConnected broadcast
            let world = self.game.dynamic_data();
            match self.game.spawn_player(ready.id) {
                Ok(()) => self.clients.promote(ready, &world),
                Err(e) => {
                    warn!("Deferring client {}: {}", ready.id, e);
                    self.clients.defer(ready);
                }
            }
        }

        let updates = self.clients.poll_client_updates();
        self.game.apply_updates(&updates);
        self.game.step(dt);
        self.game.process_deaths();

        let mut commands = self.game.take_outbox();
        commands.push(self.game.snapshot());
        self.clients.broadcast(&commands);

        if self.game.tick % STATS_INTERVAL_TICKS == 0 {
            let world = self.game.world();
            debug!(
                "Tick {}: {} clients, {} shells, {} pending deaths",
                self.game.tick,
                self.clients.len(),
                world.shells.len(),
                self.game.pending_deaths()
            );
        }
    }

    /// Ticks until `shutdown` completes, then drops every connection.
    pub async fn run_until<F: Future<Output = ()>>(&mut self, shutdown: F) {
        tokio::pin!(shutdown);
        let mut pacer = TickPacer::new(self.config.tick);
        let mut mark = Instant::now();
        info!(
            "Server running at {:.1} ticks per second",
            1.0 / self.config.tick.as_secs_f64()
        );

        loop {
            self.tick().await;

            let pause = pacer.sleep_for(mark.elapsed());
            if pause.is_zero() && pacer.debt() > self.config.tick {
                debug!("Tick {} behind by {:?}", self.game.tick, pacer.debt());
            }
            mark = Instant::now() + pause;

            tokio::select! {
                _ = &mut shutdown => break,
                _ = sleep(pause) => {}
            }
        }

        info!("Server shutting down after {} ticks", self.game.tick);
        self.clients.shutdown();
    }

    /// Ticks until Ctrl+C.
    pub async fn run(&mut self) {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
    }
}
