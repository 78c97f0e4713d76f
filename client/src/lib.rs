//! # Tank Arena Client Library
//!
//! Client side of the tank arena. The client never waits for the server before
//! showing the result of its own input: it predicts locally and corrects itself
//! whenever authoritative commands arrive.
//!
//! ## Prediction and Reconciliation
//!
//! Every frame the client numbers an input snapshot, applies the movement and
//! aim commands it implies to its own world copy and sends the snapshot to the
//! server. Each server message carries the ID of the last input the server
//! processed for this client. When messages arrive they are applied, the
//! predictions they confirm are dropped and the rest are replayed, so the
//! local world always shows server truth plus unconfirmed input.
//!
//! ## Module Organization
//!
//! ### Config Module (`config`)
//! Server address, port layout and frame timing.
//!
//! ### Connection Module (`connection`)
//! The connect handshake and the background readers for the datagram and
//! command channels.
//!
//! ### Game Module (`game`)
//! Local world, pending predictions and reconciliation.
//!
//! ### Input Module (`input`)
//! The [`input::InputSource`] seam and input snapshot numbering.
//!
//! ### Network Module (`network`)
//! The frame loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::ClientConfig;
//! use client::input::ScriptedInput;
//! use client::network::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::connect(&ClientConfig::default(), ScriptedInput::default()).await?;
//!     client.run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod game;
pub mod input;
pub mod network;
