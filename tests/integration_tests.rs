//! Integration tests for the networked tank arena
//!
//! These run a real server tick loop and real clients over localhost.

use client::config::ClientConfig;
use client::input::{InputSample, InputSource, ScriptedInput};
use client::network::{Client, StopReason};
use server::config::ServerConfig;
use server::network::Server;
use shared::config::Ports;
use shared::world::World;
use shared::PlayerId;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const TICK: Duration = Duration::from_millis(10);
const RELIABLE_DELAY: Duration = Duration::from_millis(5);
const FRAME: Duration = Duration::from_millis(10);
/// Frames to wait when nothing tighter is expected.
const PATIENCE: usize = 200;

/// Input source that never touches the controls.
struct Idle;

impl InputSource for Idle {
    fn sample(&mut self, _world: &World, _player_id: PlayerId, _dt: f64) -> InputSample {
        InputSample::default()
    }
}

struct RunningServer {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Server>,
}

impl RunningServer {
    async fn start(config: ServerConfig) -> Self {
        let mut server = Server::new(config).await.unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            server
                .run_until(async {
                    let _ = stopped.await;
                })
                .await;
            server
        });
        Self { stop, handle }
    }

    async fn stop(self) -> Server {
        let _ = self.stop.send(());
        self.handle.await.unwrap()
    }
}

fn server_config(base: u16) -> ServerConfig {
    ServerConfig {
        bind_address: LOCALHOST,
        ports: Ports::new(base),
        tick: TICK,
        timeout: Duration::from_millis(500),
        max_players: 4,
        reliable_delay: RELIABLE_DELAY,
        ..ServerConfig::default()
    }
}

fn client_config(base: u16) -> ClientConfig {
    ClientConfig {
        server_address: LOCALHOST,
        ports: Ports::new(base),
        frame: FRAME,
        ..ClientConfig::default()
    }
}

/// Runs up to `limit` frames on every client until `done` holds.
async fn run_frames<I: InputSource>(
    clients: &mut [&mut Client<I>],
    limit: usize,
    mut done: impl FnMut(&[&mut Client<I>]) -> bool,
) -> bool {
    for _ in 0..limit {
        for client in clients.iter_mut() {
            client.frame(FRAME.as_secs_f64());
        }
        if done(clients) {
            return true;
        }
        sleep(FRAME).await;
    }
    false
}

/// END-TO-END SCENARIOS
mod end_to_end_tests {
    use super::*;

    /// Connect, receive an empty roster, then see exactly ourselves after
    /// promotion
    #[tokio::test]
    async fn client_joins_and_sees_itself() {
        let base = 42000;
        let server = RunningServer::start(server_config(base)).await;

        let mut client = Client::connect(&client_config(base), Idle).await.unwrap();
        assert!(client.game().world().players.is_empty());
        let id = client.game().player_id();
        assert_eq!(id, 0);

        // Promotion happens on the next tick and the connect command only
        // waits out the reliable pacing delay
        let limit = ((TICK * 5 + RELIABLE_DELAY).as_millis() / FRAME.as_millis()) as usize + 1;
        let joined = run_frames(&mut [&mut client], limit, |clients| {
            clients[0].game().world().players.len() == 1
        })
        .await;
        assert!(joined);
        let world = client.game().world();
        assert_eq!(world.players.keys().copied().collect::<Vec<_>>(), vec![id]);

        let server = server.stop().await;
        assert!(server.game().world().player(id).is_some());
    }

    /// Two clients end up with the same roster, and one leaving is seen by
    /// the other
    #[tokio::test]
    async fn clients_see_each_other_join_and_leave() {
        let base = 42200;
        let server = RunningServer::start(server_config(base)).await;

        let mut first = Client::connect(&client_config(base), ScriptedInput::default())
            .await
            .unwrap();
        let mut second = Client::connect(&client_config(base), ScriptedInput::default())
            .await
            .unwrap();
        assert_ne!(first.game().player_id(), second.game().player_id());

        let both = run_frames(&mut [&mut first, &mut second], PATIENCE, |clients| {
            clients
                .iter()
                .all(|c| c.game().world().players.len() == 2)
        })
        .await;
        assert!(both);

        let gone = first.game().player_id();
        drop(first);
        let left = run_frames(&mut [&mut second], PATIENCE, |clients| {
            clients[0].game().world().player(gone).is_none()
        })
        .await;
        assert!(left);

        let server = server.stop().await;
        assert!(server.game().world().player(gone).is_none());
        assert_eq!(server.clients().len(), 1);
    }

    /// Moving input is predicted at once and confirmed by the server
    #[tokio::test]
    async fn predicted_movement_is_acknowledged() {
        let base = 42400;
        let server = RunningServer::start(server_config(base)).await;

        let mut client = Client::connect(&client_config(base), ScriptedInput::new(10.0, 0.5))
            .await
            .unwrap();
        let joined = run_frames(&mut [&mut client], PATIENCE, |clients| {
            clients[0].game().local_player().is_some()
        })
        .await;
        assert!(joined);
        let start = client.game().local_player().unwrap().position;

        let acknowledged = run_frames(&mut [&mut client], PATIENCE, |clients| {
            clients[0].game().last_acknowledged() > 10
        })
        .await;
        assert!(acknowledged);

        let player = client.game().local_player().unwrap();
        assert!(player.position.distance(start) > 0.0);
        // Only the inputs the server has not processed yet remain queued
        assert!((client.game().pending_predictions() as u64) < client.frames());

        server.stop().await;
    }
}

/// LIFECYCLE EDGE CASES
mod lifecycle_tests {
    use super::*;
    use shared::protocol::ConnectingStaticData;
    use shared::transport;
    use tokio::net::{TcpListener, TcpStream};

    /// A client that finishes the handshake but never sends input is
    /// evicted, and the others are told
    #[tokio::test]
    async fn silent_client_is_evicted() {
        let base = 42600;
        let ports = Ports::new(base);
        let server = RunningServer::start(server_config(base)).await;

        let mut stream = TcpStream::connect((LOCALHOST, ports.connection()))
            .await
            .unwrap();
        let payload = transport::receive_message(&mut stream).await.unwrap();
        let silent = ConnectingStaticData::decode(&payload).unwrap().player_id;
        let commands = TcpListener::bind((LOCALHOST, ports.reliable_server_updates(silent)))
            .await
            .unwrap();
        transport::send_ack(&mut stream).await.unwrap();
        let (_command_stream, _) = commands.accept().await.unwrap();
        transport::receive_message(&mut stream).await.unwrap();

        let mut watcher = Client::connect(&client_config(base), Idle).await.unwrap();
        let seen = run_frames(&mut [&mut watcher], PATIENCE, |clients| {
            clients[0].game().world().player(silent).is_some()
        })
        .await;
        assert!(seen);

        let evicted = run_frames(&mut [&mut watcher], PATIENCE, |clients| {
            clients[0].game().world().player(silent).is_none()
        })
        .await;
        assert!(evicted);
        assert!(watcher.game().local_player().is_some());

        server.stop().await;
    }

    /// A client that stops sending input gets its own disconnect before the
    /// server closes its command stream
    #[tokio::test]
    async fn idle_client_learns_it_was_evicted() {
        let base = 42800;
        let server = RunningServer::start(server_config(base)).await;

        let mut client = Client::connect(&client_config(base), Idle).await.unwrap();
        sleep(Duration::from_millis(1500)).await;

        let reason = timeout(
            Duration::from_secs(3),
            client.run_until(std::future::pending::<()>()),
        )
        .await
        .unwrap();
        assert_eq!(reason, StopReason::Evicted);
        assert!(client.game().is_evicted());

        let server = server.stop().await;
        assert!(server.clients().is_empty());
    }
}
