use crate::config::ClientConfig;
use crate::connection::{ConnectionError, ServerConnection};
use crate::game::ClientGameState;
use crate::input::{InputManager, InputSource};
use log::{debug, info};
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// How often the run loop logs a summary of the world.
const SUMMARY_INTERVAL: Duration = Duration::from_secs(1);

/// Why the run loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Shutdown,
    ServerClosed,
    Evicted,
}

/// Predicting client: one input snapshot, prediction and reconciliation per
/// frame.
pub struct Client<I: InputSource> {
    connection: ServerConnection,
    game: ClientGameState,
    input: I,
    inputs: InputManager,
    frame: Duration,
    frames: u64,
}

impl<I: InputSource> Client<I> {
    pub async fn connect(config: &ClientConfig, input: I) -> Result<Self, ConnectionError> {
        let (connection, world) = ServerConnection::connect(config).await?;
        let game = ClientGameState::new(connection.player_id(), world);
        Ok(Self {
            connection,
            game,
            input,
            inputs: InputManager::new(),
            frame: config.frame,
            frames: 0,
        })
    }

    pub fn game(&self) -> &ClientGameState {
        &self.game
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Runs one frame of `dt` seconds.
    pub fn frame(&mut self, dt: f64) {
        let player_id = self.game.player_id();
        let sample = self.input.sample(self.game.world(), player_id, dt);
        let update = self.inputs.next_update(player_id, sample, dt);

        self.game.predict(&update);
        if let Err(e) = self.connection.send_update(&update) {
            debug!("Input {} not sent: {}", update.id, e);
        }

        self.game.step(dt);
        self.game.reconcile(self.connection.poll_messages());
        self.frames += 1;
    }

    fn stop_reason(&mut self) -> Option<StopReason> {
        if !self.game.is_evicted() && !self.connection.is_connected() {
            // The last messages before the close may include our own disconnect
            self.game.reconcile(self.connection.poll_messages());
        }
        if self.game.is_evicted() {
            Some(StopReason::Evicted)
        } else if !self.connection.is_connected() {
            Some(StopReason::ServerClosed)
        } else {
            None
        }
    }

    fn log_summary(&self) {
        let world = self.game.world();
        match self.game.local_player() {
            Some(player) => info!(
                "Frame {}: {} players, {} shells, at ({:.2}, {:.2}) health {:.0} shield {:.0}, {}/{} kills/deaths",
                self.frames,
                world.players.len(),
                world.shells.len(),
                player.position.x,
                player.position.y,
                player.health,
                player.shield,
                player.kills,
                player.deaths
            ),
            None => info!(
                "Frame {}: {} players, waiting to spawn",
                self.frames,
                world.players.len()
            ),
        }
    }

    /// Runs frames until `shutdown` completes or the server goes away.
    pub async fn run_until<F: Future<Output = ()>>(&mut self, shutdown: F) -> StopReason {
        tokio::pin!(shutdown);
        let mut frames = interval(self.frame);
        frames.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_frame = Instant::now();
        let mut last_summary = Instant::now();

        let reason = loop {
            tokio::select! {
                _ = &mut shutdown => break StopReason::Shutdown,
                _ = frames.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_frame).as_secs_f64();
                    last_frame = now;

                    self.frame(dt);
                    if let Some(reason) = self.stop_reason() {
                        break reason;
                    }
                    if last_summary.elapsed() >= SUMMARY_INTERVAL {
                        self.log_summary();
                        last_summary = now;
                    }
                }
            }
        };

        info!("Client stopped after {} frames: {:?}", self.frames, reason);
        reason
    }
}
