//! Connection lifecycle and fan-out for the authoritative server
//!
//! Every connection moves through *connecting → ready → connected →
//! disconnected*. Socket work happens on background tasks that only publish
//! into channels; the tick loop is the single consumer and drains each
//! channel once per tick, so the roster is never touched concurrently.
//!
//! - Connecting: the accept task assigns the lowest free player ID, sends the
//!   arena and waits for the ACK byte.
//! - Ready: the handshake task dials the client's reliable command port and
//!   queues the client for promotion.
//! - Connected: at the next tick boundary the world snapshot goes out on the
//!   handshake stream and the client joins the roster.
//! - Disconnected: eviction after `ticks_to_timeout` silent ticks, or the
//!   client closing its reliable stream.

use crate::config::ServerConfig;
use log::{debug, error, info, warn};
use shared::arena::Arena;
use shared::config::Ports;
use shared::protocol::{
    self, ClientUpdate, ConnectingDynamicData, ConnectingStaticData, ServerCommand,
};
use shared::transport::{self, TransportError};
use shared::PlayerId;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};

/// Hands out the lowest player ID not currently in use.
#[derive(Debug)]
pub struct IdPool {
    capacity: usize,
    in_use: BTreeSet<PlayerId>,
}

impl IdPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            in_use: BTreeSet::new(),
        }
    }

    pub fn acquire(&mut self) -> Option<PlayerId> {
        let id = (0..self.capacity as PlayerId).find(|id| !self.in_use.contains(id))?;
        self.in_use.insert(id);
        Some(id)
    }

    pub fn release(&mut self, id: PlayerId) -> bool {
        self.in_use.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.in_use.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_use.is_empty()
    }
}

/// A client that acknowledged the arena and waits for promotion.
#[derive(Debug)]
pub struct ReadyClient {
    pub id: PlayerId,
    handshake: TcpStream,
    reliable: TcpStream,
    udp_addr: SocketAddr,
}

/// A client in the roster.
///
/// Dropping it aborts the tasks serving its sockets.
#[derive(Debug)]
pub struct ConnectedClient {
    pub id: PlayerId,
    /// Where state datagrams for this client go
    pub udp_addr: SocketAddr,
    /// Highest input ID processed for this client, echoed in every message
    pub last_processed_update: i32,
    /// Distinguishes this connection from a later one reusing the same ID
    session: u64,
    idle_ticks: u32,
    reliable_tx: mpsc::UnboundedSender<Vec<u8>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConnectedClient {
    /// Resets the idle counter. Returns false for an update that is not newer
    /// than the last one processed.
    fn touch(&mut self, update_id: i32) -> bool {
        self.idle_ticks = 0;
        if update_id <= self.last_processed_update {
            return false;
        }
        self.last_processed_update = update_id;
        true
    }

    /// Queues a last guaranteed message and lets the writer flush it. The
    /// command stream closes once the queue is drained.
    fn retire(mut self, farewell: &ServerCommand) {
        let message = protocol::frame_reliable(self.last_processed_update, &farewell.encode());
        if self.reliable_tx.send(message).is_ok() {
            // Detach instead of abort
            self.tasks.clear();
        }
    }

    /// Counts one silent tick; true once `limit` is reached.
    fn tick_idle(&mut self, limit: u32) -> bool {
        self.idle_ticks += 1;
        self.idle_ticks >= limit
    }
}

impl Drop for ConnectedClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[derive(Clone)]
struct HandshakeContext {
    ports: Ports,
    /// Limit for a connecting client to reach the ready state
    timeout: Duration,
    arena: Arc<Arena>,
    ids: Arc<Mutex<IdPool>>,
    ready_tx: mpsc::UnboundedSender<ReadyClient>,
}

pub struct ClientManager {
    ticks_to_timeout: u32,
    reliable_delay: Duration,
    /// Receives input datagrams and sends state datagrams
    socket: Arc<UdpSocket>,
    clients: BTreeMap<PlayerId, ConnectedClient>,
    ids: Arc<Mutex<IdPool>>,
    /// Ready clients that could not be placed yet, retried first next tick
    deferred: Vec<ReadyClient>,
    ready_rx: mpsc::UnboundedReceiver<ReadyClient>,
    updates_rx: mpsc::UnboundedReceiver<(SocketAddr, ClientUpdate)>,
    closed_tx: mpsc::UnboundedSender<(PlayerId, u64)>,
    closed_rx: mpsc::UnboundedReceiver<(PlayerId, u64)>,
    next_session: u64,
    active: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ClientManager {
    /// Binds the connect listener and the input socket and starts serving them.
    pub async fn bind(config: &ServerConfig, arena: Arena) -> io::Result<Self> {
        let ports = config.ports;
        let listener = TcpListener::bind((config.bind_address, ports.connection())).await?;
        let socket = Arc::new(UdpSocket::bind((config.bind_address, ports.client_updates())).await?);
        info!(
            "Accepting connections on {}, inputs on {}",
            listener.local_addr()?,
            socket.local_addr()?
        );

        let ids = Arc::new(Mutex::new(IdPool::new(config.max_players)));
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));

        let context = HandshakeContext {
            ports,
            timeout: config.timeout,
            arena: Arc::new(arena),
            ids: Arc::clone(&ids),
            ready_tx,
        };
        let tasks = vec![
            tokio::spawn(accept_connections(listener, context, Arc::clone(&active))),
            tokio::spawn(receive_updates(
                Arc::clone(&socket),
                updates_tx,
                Arc::clone(&active),
            )),
        ];

        Ok(Self {
            ticks_to_timeout: config.ticks_to_timeout(),
            reliable_delay: config.reliable_delay,
            socket,
            clients: BTreeMap::new(),
            ids,
            deferred: Vec::new(),
            ready_rx,
            updates_rx,
            closed_tx,
            closed_rx,
            next_session: 0,
            active,
            tasks,
        })
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.clients.contains_key(&id)
    }

    pub fn last_processed_update(&self, id: PlayerId) -> Option<i32> {
        self.clients.get(&id).map(|c| c.last_processed_update)
    }

    /// Counts a silent tick for every client and evicts those that reached
    /// the timeout. Returns the evicted IDs.
    pub async fn evict_idle(&mut self) -> Vec<PlayerId> {
        let limit = self.ticks_to_timeout;
        let idle: Vec<PlayerId> = self
            .clients
            .values_mut()
            .filter_map(|client| client.tick_idle(limit).then_some(client.id))
            .collect();

        for &id in &idle {
            info!("Client {} timed out after {} ticks", id, limit);
            if let Some(client) = self.clients.remove(&id) {
                client.retire(&ServerCommand::PlayerDisconnected { id });
                self.ids.lock().await.release(id);
            }
        }
        idle
    }

    /// Removes clients whose reliable stream was closed by the peer.
    pub async fn take_closed(&mut self) -> Vec<PlayerId> {
        let mut closed = Vec::new();
        while let Ok((id, session)) = self.closed_rx.try_recv() {
            let current = self.clients.get(&id).is_some_and(|c| c.session == session);
            if current && !closed.contains(&id) {
                closed.push(id);
            }
        }
        for &id in &closed {
            self.remove(id).await;
        }
        closed
    }

    /// Drops a client and frees its ID. False if it was not in the roster.
    pub async fn remove(&mut self, id: PlayerId) -> bool {
        if self.clients.remove(&id).is_none() {
            return false;
        }
        self.ids.lock().await.release(id);
        info!("Client {} disconnected", id);
        true
    }

    /// Clients that became ready since the last call, deferred ones first.
    pub fn take_ready_clients(&mut self) -> Vec<ReadyClient> {
        let mut ready = std::mem::take(&mut self.deferred);
        while let Ok(client) = self.ready_rx.try_recv() {
            ready.push(client);
        }
        ready
    }

    /// Keeps a ready client queued for the next tick.
    pub fn defer(&mut self, client: ReadyClient) {
        self.deferred.push(client);
    }

    /// Sends the world snapshot and moves the client into the roster.
    pub fn promote(&mut self, ready: ReadyClient, world: &ConnectingDynamicData) {
        let ReadyClient {
            id,
            handshake,
            reliable,
            udp_addr,
        } = ready;
        let session = self.next_session;
        self.next_session += 1;

        let (reliable_tx, reliable_rx) = mpsc::unbounded_channel();
        let tasks = vec![
            tokio::spawn(finish_handshake(id, handshake, world.encode())),
            tokio::spawn(write_reliable(
                id,
                session,
                reliable,
                reliable_rx,
                self.reliable_delay,
                self.closed_tx.clone(),
            )),
        ];

        info!("Client {} connected, state goes to {}", id, udp_addr);
        self.clients.insert(
            id,
            ConnectedClient {
                id,
                udp_addr,
                last_processed_update: 0,
                session,
                idle_ticks: 0,
                reliable_tx,
                tasks,
            },
        );
    }

    /// Input snapshots received since the last call, in arrival order.
    ///
    /// Any snapshot from a client resets its timeout. Snapshots from an address
    /// other than the client's, and stale ones, are dropped.
    pub fn poll_client_updates(&mut self) -> Vec<ClientUpdate> {
        let mut updates = Vec::new();
        while let Ok((from, update)) = self.updates_rx.try_recv() {
            match self.clients.get_mut(&update.player_id) {
                Some(client) if client.udp_addr.ip() == from.ip() => {
                    if client.touch(update.id) {
                        updates.push(update);
                    }
                }
                Some(_) => warn!(
                    "Dropping update for client {} from unexpected address {}",
                    update.player_id, from
                ),
                None => debug!("Dropping update for unknown client {}", update.player_id),
            }
        }
        updates
    }

    /// Sends every command to every connected client.
    pub fn broadcast(&self, commands: &[ServerCommand]) {
        for command in commands {
            let encoded = command.encode();
            let guaranteed = command.guaranteed_exec();
            for client in self.clients.values() {
                self.deliver(client, &encoded, guaranteed);
            }
        }
    }

    fn deliver(&self, client: &ConnectedClient, encoded: &[u8], guaranteed: bool) {
        let ack = client.last_processed_update;
        if guaranteed {
            if client
                .reliable_tx
                .send(protocol::frame_reliable(ack, encoded))
                .is_err()
            {
                debug!("Reliable writer for client {} is gone", client.id);
            }
        } else if let Err(e) = transport::try_send_datagram(
            &self.socket,
            client.udp_addr,
            &protocol::frame_datagram(ack, encoded),
        ) {
            debug!("Dropped datagram to client {}: {}", client.id, e);
        }
    }

    /// Stops all background work and drops every connection.
    pub fn shutdown(&mut self) {
        self.active.store(false, Ordering::Relaxed);
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.deferred.clear();
        self.clients.clear();
        info!("Client manager shut down");
    }
}

impl Drop for ClientManager {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Relaxed);
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Accepts connections and runs one supervised handshake task per client.
async fn accept_connections(
    listener: TcpListener,
    context: HandshakeContext,
    active: Arc<AtomicBool>,
) {
    let mut handshakes = JoinSet::new();

    while active.load(Ordering::Relaxed) {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let Some(id) = context.ids.lock().await.acquire() else {
                        warn!("Server full, refusing connection from {}", peer);
                        continue;
                    };
                    info!("Client {} connecting from {}", id, peer);

                    let context = context.clone();
                    handshakes.spawn(async move {
                        let limit = context.timeout;
                        match tokio::time::timeout(limit, handshake(stream, peer, id, &context)).await {
                            Ok(Ok(())) => return,
                            Ok(Err(e)) => {
                                warn!("Handshake with client {} at {} failed: {}", id, peer, e)
                            }
                            Err(_) => warn!(
                                "Client {} at {} did not finish the handshake within {:?}",
                                id, peer, limit
                            ),
                        }
                        context.ids.lock().await.release(id);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },
            Some(joined) = handshakes.join_next(), if !handshakes.is_empty() => {
                if let Err(e) = joined {
                    error!("Handshake task failed: {}", e);
                }
            }
        }
    }
}

async fn handshake(
    mut stream: TcpStream,
    peer: SocketAddr,
    id: PlayerId,
    context: &HandshakeContext,
) -> Result<(), TransportError> {
    stream.set_nodelay(true)?;
    let static_data = ConnectingStaticData {
        player_id: id,
        arena: (*context.arena).clone(),
    };
    transport::send_message(&mut stream, &static_data.encode()).await?;
    transport::receive_ack(&mut stream).await?;

    let reliable_addr = SocketAddr::new(peer.ip(), context.ports.reliable_server_updates(id));
    let reliable = TcpStream::connect(reliable_addr).await?;
    reliable.set_nodelay(true)?;
    let udp_addr = SocketAddr::new(peer.ip(), context.ports.server_updates(id));
    debug!("Client {} ready, commands go to {}", id, reliable_addr);

    context
        .ready_tx
        .send(ReadyClient {
            id,
            handshake: stream,
            reliable,
            udp_addr,
        })
        .map_err(|_| TransportError::ConnectionClosed)
}

/// Forwards decoded input snapshots to the tick loop.
async fn receive_updates(
    socket: Arc<UdpSocket>,
    updates_tx: mpsc::UnboundedSender<(SocketAddr, ClientUpdate)>,
    active: Arc<AtomicBool>,
) {
    while active.load(Ordering::Relaxed) {
        match transport::receive_datagram(&socket).await {
            Ok((bytes, from)) => match ClientUpdate::decode(&bytes) {
                Ok(update) => {
                    if updates_tx.send((from, update)).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Dropping malformed update from {}: {}", from, e),
            },
            Err(e) => {
                debug!("Error receiving update: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

async fn send_world_snapshot(stream: &mut TcpStream, world: &[u8]) -> Result<(), TransportError> {
    transport::send_message(stream, world).await?;
    stream.shutdown().await?;
    transport::wait_for_close(stream).await
}

/// Sends the world snapshot, half-closes, and waits until the client has
/// read everything and closed its side.
async fn finish_handshake(id: PlayerId, mut stream: TcpStream, world: Vec<u8>) {
    match send_world_snapshot(&mut stream, &world).await {
        Ok(()) => debug!("Client {} received the world snapshot", id),
        Err(e) => warn!("Failed to deliver world snapshot to client {}: {}", id, e),
    }
}

/// Delivers guaranteed commands to one client in batches. The first queued
/// command starts a pacing delay; everything queued by then is flushed in
/// order. The peer closing the stream is reported as a disconnect.
async fn write_reliable(
    id: PlayerId,
    session: u64,
    stream: TcpStream,
    mut commands: mpsc::UnboundedReceiver<Vec<u8>>,
    delay: Duration,
    closed_tx: mpsc::UnboundedSender<(PlayerId, u64)>,
) {
    let (mut reader, mut writer) = stream.into_split();

    loop {
        tokio::select! {
            first = commands.recv() => {
                let Some(first) = first else {
                    return;
                };
                tokio::time::sleep(delay).await;

                let mut batch = vec![first];
                while let Ok(next) = commands.try_recv() {
                    batch.push(next);
                }
                for payload in &batch {
                    if let Err(e) = transport::send_message(&mut writer, payload).await {
                        warn!("Reliable stream to client {} failed: {}", id, e);
                        let _ = closed_tx.send((id, session));
                        return;
                    }
                }
                debug!("Flushed {} guaranteed commands to client {}", batch.len(), id);
            }
            _ = transport::wait_for_close(&mut reader) => {
                info!("Client {} closed its command stream", id);
                let _ = closed_tx.send((id, session));
                return;
            }
        }
    }
}
