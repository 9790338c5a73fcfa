//! Pursuit Sync Library
//!
//! Host-authoritative state synchronization for small casual multiplayer
//! games played over a shared key/value channel. One participant (the host)
//! simulates; everyone else mirrors its snapshots, interpolates remote
//! entities and relays the entity they control.
//!
//! # Layout
//!
//! - `channel` - path-addressable shared state with push subscriptions and disconnect hooks
//! - `game` - world model, simulation authority, position buffers and interpolation
//! - `net` - snapshot broadcaster/receiver and owner-to-host relays
//! - `lobby` - roster, role assignment, entity ownership and the session lifecycle
//! - `session` - the per-participant facade tying it all together

pub mod channel;
pub mod config;
pub mod game;
pub mod lobby;
pub mod metrics;
pub mod net;
pub mod session;
pub mod util;
