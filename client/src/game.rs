use log::{debug, info};
use shared::command::EngineCommand;
use shared::engine::Engine;
use shared::protocol::{ClientUpdate, ServerCommand, ServerMessage};
use shared::world::{Player, World};
use shared::PlayerId;
use std::collections::VecDeque;

/// Locally predicted commands of one input snapshot, kept until the server
/// acknowledges it.
#[derive(Debug, Clone)]
struct PendingPrediction {
    update_id: i32,
    commands: [EngineCommand; 2],
}

/// Client copy of the world: server truth as of the last acknowledged input,
/// plus every input the server has not confirmed yet.
#[derive(Debug)]
pub struct ClientGameState {
    player_id: PlayerId,
    engine: Engine,
    pending: VecDeque<PendingPrediction>,
    last_acknowledged: i32,
    evicted: bool,
}

impl ClientGameState {
    pub fn new(player_id: PlayerId, world: World) -> Self {
        Self {
            player_id,
            engine: Engine::new(world),
            pending: VecDeque::new(),
            last_acknowledged: 0,
            evicted: false,
        }
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    pub fn world(&self) -> &World {
        self.engine.world()
    }

    pub fn local_player(&self) -> Option<&Player> {
        self.engine.world().player(self.player_id)
    }

    pub fn last_acknowledged(&self) -> i32 {
        self.last_acknowledged
    }

    pub fn pending_predictions(&self) -> usize {
        self.pending.len()
    }

    /// True once the server announced this player's disconnect.
    pub fn is_evicted(&self) -> bool {
        self.evicted
    }

    /// Applies the player's own input immediately and remembers it for replay.
    pub fn predict(&mut self, update: &ClientUpdate) {
        let commands = update.predicted_commands();
        self.engine.execute_all(&commands);
        self.pending.push_back(PendingPrediction {
            update_id: update.id,
            commands,
        });
    }

    /// Advances shells, collisions and timers by one frame.
    pub fn step(&mut self, dt: f64) {
        // Kills and pickups are the server's call, it reports them as commands
        self.engine.step(dt);
    }

    /// Applies authoritative messages, drops the predictions they confirm and
    /// replays the rest on top.
    pub fn reconcile(&mut self, messages: Vec<ServerMessage>) {
        if messages.is_empty() {
            return;
        }

        for message in &messages {
            self.last_acknowledged = self.last_acknowledged.max(message.last_processed_update);
            self.apply(&message.command);
        }

        while self
            .pending
            .front()
            .is_some_and(|p| p.update_id <= self.last_acknowledged)
        {
            self.pending.pop_front();
        }

        for prediction in &self.pending {
            self.engine.execute_all(&prediction.commands);
        }
    }

    fn apply(&mut self, command: &ServerCommand) {
        match command {
            ServerCommand::PlayerConnected { id, .. } => info!("Player {} joined", id),
            ServerCommand::PlayerDisconnected { id } if *id == self.player_id => {
                info!("Server dropped this client");
                self.evicted = true;
            }
            ServerCommand::PlayerDisconnected { id } => info!("Player {} left", id),
            ServerCommand::PlayerDeath { killed, killer, .. } => {
                info!("Player {} destroyed player {}", killer, killed)
            }
            ServerCommand::PlayersState(_) => {}
            other => debug!("Applying {:?}", other.kind()),
        }
        self.engine.execute(&command.translate());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use glam::Vec3;
    use shared::arena::Arena;
    use shared::command::{PlayerState, PressedKeys};
    use std::collections::BTreeMap;

    fn test_world() -> World {
        let arena: Arena = "########\n#S.....#\n#......#\n#......#\n#......#\n#......#\n#.....S#\n########\n"
            .parse()
            .unwrap();
        let player = Player::new(1, Vec3::new(3.5, 3.5, 0.0), Vec3::ONE);
        World::with_state(arena, BTreeMap::from([(1, player)]), BTreeMap::new())
    }

    fn update(id: i32) -> ClientUpdate {
        ClientUpdate {
            id,
            player_id: 1,
            keys: PressedKeys::D,
            left_mouse: false,
            right_mouse: false,
            turret_angle: 0.25,
            dt: 0.05,
        }
    }

    fn snapshot(ack: i32, state: PlayerState) -> ServerMessage {
        ServerMessage::new(ack, ServerCommand::PlayersState(vec![state]))
    }

    #[test]
    fn test_prediction_applies_immediately() {
        let mut game = ClientGameState::new(1, test_world());
        game.predict(&update(1));

        let player = game.local_player().unwrap();
        assert!(player.position.x > 3.5);
        assert_approx_eq!(player.turret_angle, 0.25);
        assert_eq!(game.pending_predictions(), 1);
    }

    #[test]
    fn test_reconcile_replays_only_unconfirmed_predictions() {
        let mut game = ClientGameState::new(1, test_world());
        let authoritative = PlayerState::of(game.local_player().unwrap());
        for id in [5, 6, 7] {
            game.predict(&update(id));
        }

        game.reconcile(vec![snapshot(6, authoritative)]);
        assert_eq!(game.pending_predictions(), 1);
        assert_eq!(game.last_acknowledged(), 6);

        // Server truth plus a single replayed move
        let mut expected = ClientGameState::new(1, test_world());
        expected.predict(&update(7));
        let replayed = game.local_player().unwrap();
        let single = expected.local_player().unwrap();
        assert_approx_eq!(replayed.position.x, single.position.x);
        assert_approx_eq!(replayed.velocity.x, single.velocity.x);
    }

    #[test]
    fn test_reconcile_without_messages_changes_nothing() {
        let mut game = ClientGameState::new(1, test_world());
        game.predict(&update(1));
        let before = game.world().clone();

        game.reconcile(Vec::new());
        assert_eq!(game.world(), &before);
        assert_eq!(game.pending_predictions(), 1);
    }

    #[test]
    fn test_out_of_order_ack_never_regresses() {
        let mut game = ClientGameState::new(1, test_world());
        let state = PlayerState::of(game.local_player().unwrap());
        game.reconcile(vec![snapshot(9, state), snapshot(4, state)]);
        assert_eq!(game.last_acknowledged(), 9);
    }

    #[test]
    fn test_guaranteed_commands_update_roster() {
        let mut game = ClientGameState::new(1, test_world());
        game.reconcile(vec![ServerMessage::new(
            0,
            ServerCommand::PlayerConnected {
                id: 2,
                color: Vec3::X,
                position: Vec3::new(1.5, 1.5, 0.0),
            },
        )]);
        assert!(game.world().player(2).is_some());
        assert!(!game.is_evicted());

        game.reconcile(vec![ServerMessage::new(
            0,
            ServerCommand::PlayerDisconnected { id: 1 },
        )]);
        assert!(game.local_player().is_none());
        assert!(game.is_evicted());
    }
}
