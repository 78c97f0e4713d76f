//! # Tank Arena Server Library
//!
//! Authoritative server for the tank arena. It owns the only true copy of the
//! world, advances it at a fixed tick rate and tells every connected client what
//! happened.
//!
//! ## Connection Lifecycle
//!
//! A client connects to the handshake port and receives its player ID and the
//! arena. Once it acknowledges, the server dials back to the client's reliable
//! command port and queues the client as ready. On the next tick boundary the
//! client receives the current world, is added to the roster and a
//! `PlayerConnected` command is broadcast. A client that sends no input for the
//! configured timeout, or closes its command stream, is evicted and a
//! `PlayerDisconnected` command is broadcast.
//!
//! ## Channels
//!
//! Commands that must never be missed (connect, disconnect, death, pickups)
//! travel over each client's reliable stream, batched after a short pacing
//! delay. Player state snapshots and fire effects travel as datagrams, and
//! every outbound message carries the last input ID processed for that client.
//!
//! ## Module Organization
//!
//! ### Config Module (`config`)
//! Explicit server configuration with validation.
//!
//! ### Client Manager Module (`client_manager`)
//! Sockets and per-client state:
//! - Handshake and player ID assignment
//! - Input snapshot intake and acknowledgement tracking
//! - Idle timeout eviction
//! - Reliable and datagram fan-out
//!
//! ### Game Module (`game`)
//! Game rules on top of the shared engine: spawning, firing, pickups, deaths.
//!
//! ### Network Module (`network`)
//! The fixed-tick loop and its pacing.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(ServerConfig::default()).await?;
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod game;
pub mod network;
