//! Client side of the connect handshake and the two inbound channels

use crate::config::{ClientConfig, ConfigError};
use log::{debug, info, warn};
use shared::codec::CodecError;
use shared::protocol::{ClientUpdate, ConnectingDynamicData, ConnectingStaticData, ServerMessage};
use shared::transport::{self, TransportError};
use shared::world::World;
use shared::PlayerId;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("malformed handshake data: {0}")]
    Codec(#[from] CodecError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("server did not open the command stream within {0:?}")]
    Timeout(Duration),
}

/// An established connection to the server.
///
/// Both inbound channels are read by background tasks and buffered until
/// [`ServerConnection::poll_messages`] drains them. Dropping the connection
/// closes the command stream, which the server treats as a disconnect.
pub struct ServerConnection {
    player_id: PlayerId,
    updates_addr: SocketAddr,
    socket: Arc<UdpSocket>,
    messages_rx: mpsc::UnboundedReceiver<ServerMessage>,
    _commands_writer: OwnedWriteHalf,
    active: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerConnection {
    /// Runs the connect handshake and returns the connection together with
    /// the world as the server described it.
    pub async fn connect(config: &ClientConfig) -> Result<(Self, World), ConnectionError> {
        config.validate()?;
        let mut stream = TcpStream::connect(config.connect_address()).await?;
        stream.set_nodelay(true)?;

        let payload = transport::receive_message(&mut stream).await?;
        let ConnectingStaticData { player_id, arena } = ConnectingStaticData::decode(&payload)?;
        info!(
            "Assigned player {} on a {}x{} arena",
            player_id,
            arena.size(),
            arena.size()
        );

        // Both listeners must exist before the ACK, the server answers it by
        // dialing the command port and streaming state to the datagram port
        let local_ip = stream.local_addr()?.ip();
        let socket = UdpSocket::bind((local_ip, config.ports.server_updates(player_id))).await?;
        let listener =
            TcpListener::bind((local_ip, config.ports.reliable_server_updates(player_id))).await?;
        transport::send_ack(&mut stream).await?;

        let (commands, from) = timeout(config.handshake_timeout, listener.accept())
            .await
            .map_err(|_| ConnectionError::Timeout(config.handshake_timeout))??;
        commands.set_nodelay(true)?;
        debug!("Command stream opened by {}", from);

        let payload = transport::receive_message(&mut stream).await?;
        let dynamic = ConnectingDynamicData::decode(&payload)?;
        stream.shutdown().await?;
        info!(
            "Joined a world with {} players and {} pickups",
            dynamic.players.len(),
            dynamic.pickups.len()
        );
        let world = World::with_state(arena, dynamic.players, dynamic.pickups);

        let socket = Arc::new(socket);
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));
        let closed = Arc::new(AtomicBool::new(false));
        let (reader, writer) = commands.into_split();
        let tasks = vec![
            tokio::spawn(receive_datagrams(
                Arc::clone(&socket),
                messages_tx.clone(),
                Arc::clone(&active),
            )),
            tokio::spawn(receive_commands(
                reader,
                messages_tx,
                Arc::clone(&active),
                Arc::clone(&closed),
            )),
        ];

        Ok((
            Self {
                player_id,
                updates_addr: config.updates_address(),
                socket,
                messages_rx,
                _commands_writer: writer,
                active,
                closed,
                tasks,
            },
            world,
        ))
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    /// False once the server closed the command stream or broke protocol on it.
    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Fire-and-forget send of one input snapshot.
    pub fn send_update(&self, update: &ClientUpdate) -> Result<(), TransportError> {
        transport::try_send_datagram(&self.socket, self.updates_addr, &update.encode())
    }

    /// Messages received on either channel since the last call.
    pub fn poll_messages(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.messages_rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Relaxed);
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn receive_datagrams(
    socket: Arc<UdpSocket>,
    messages_tx: mpsc::UnboundedSender<ServerMessage>,
    active: Arc<AtomicBool>,
) {
    while active.load(Ordering::Relaxed) {
        match transport::receive_datagram(&socket).await {
            Ok((bytes, from)) => match ServerMessage::decode_datagram(&bytes) {
                Ok(message) => {
                    if messages_tx.send(message).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Dropping malformed datagram from {}: {}", from, e),
            },
            Err(e) => {
                debug!("Error receiving datagram: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

/// Reads guaranteed commands until the stream ends. A malformed message
/// ends the connection.
async fn receive_commands(
    mut reader: OwnedReadHalf,
    messages_tx: mpsc::UnboundedSender<ServerMessage>,
    active: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
) {
    while active.load(Ordering::Relaxed) {
        let received = match transport::receive_message(&mut reader).await {
            Ok(payload) => ServerMessage::decode_reliable(&payload).map_err(TransportError::from),
            Err(e) => Err(e),
        };
        match received {
            Ok(message) => {
                if messages_tx.send(message).is_err() {
                    break;
                }
            }
            Err(TransportError::ConnectionClosed) => {
                info!("Server closed the command stream");
                break;
            }
            Err(e) => {
                warn!("Command stream failed: {}", e);
                break;
            }
        }
    }
    closed.store(true, Ordering::Release);
}
