//! Shared core of the tank arena: wire format, transport helpers and the
//! deterministic simulation both the server and the clients run.

pub mod arena;
pub mod codec;
pub mod command;
pub mod config;
pub mod engine;
pub mod physics;
pub mod protocol;
pub mod transport;
pub mod world;

pub type PlayerId = i32;
pub type PickupId = i32;

// Movement
pub const PLAYER_RADIUS: f32 = 0.4;
pub const MAX_SPEED: f32 = 2.0;
pub const ACCELERATION: f32 = 5.0;
/// Upper bound applied to client-reported frame time.
pub const MAX_CLIENT_DT: f64 = 0.1;

// Combat
pub const MAX_HEALTH: f32 = 100.0;
pub const MAX_SHIELD: f32 = 100.0;
/// Shields regenerate on their own only up to this value; pickups go beyond.
pub const SHIELD_REGEN_CAP: f32 = 50.0;
pub const SHIELD_REGEN_RATE: f32 = 2.0;
pub const FIRE_COOLDOWN: f64 = 1.0;
pub const SHELL_SPEED: f32 = 6.0;
pub const SHELL_HALF_EXTENT: f32 = 0.05;
pub const SHELL_DAMAGE: f32 = 40.0;

// Pickups
pub const PICKUP_RADIUS: f32 = 0.3;
pub const PICKUP_SHIELD_BONUS: f32 = 50.0;
/// Seconds between two respawn-all events.
pub const PICKUP_RESPAWN_INTERVAL: f64 = 20.0;
