//! # Pong Match Server Library
//!
//! This library provides the authoritative server for a two-player networked
//! Pong match. Phones (or any TCP client) act as controllers: they join a
//! side, report readiness and send paddle moves as newline-terminated text
//! frames. The server owns the physics and tells every controller when play
//! starts, stops and who scored.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Ball and paddle positions, collisions and the score live only on the
//! server. A fixed-rate tick (60Hz by default) advances the ball while the
//! match is running.
//!
//! ### Connection Lifecycle
//! At most two controllers are connected at once. When the cap is reached
//! the listener is closed so further connection attempts are refused; as
//! soon as a controller leaves the port is reopened.
//!
//! ### Readiness Coordination
//! The match runs only while every known player has reported ready. Each
//! change of that aggregate produces exactly one `START` or `STOP` broadcast.
//!
//! ## Architecture Design
//!
//! ### Single Owner Event Loop
//! A single task owns all match state and processes connection events,
//! frames, timer expiries and control requests one at a time. Per-connection
//! reader and writer tasks only move bytes; they never touch match state.
//!
//! ### Text Line Protocol
//! Inbound frames (`JOIN:<side>:<name>`, `READY:<0|1>`, `LEAVE:<name>`,
//! `up`, `down`) and outbound commands (`START`, `STOP`, `SCORE:<l>:<r>`,
//! `STATE:<json>`) are defined in the `shared` crate. Malformed frames are
//! dropped without closing the connection.
//!
//! ## Module Organization
//!
//! - `client_manager`: open connections, the player cap and connection-to-player bindings
//! - `config`: scene, physics and server configuration with validation
//! - `controller`: the match controller and its published snapshot
//! - `error`: server error type
//! - `game`: ball, paddles and score of the running match
//! - `lobby`: players and per-side rosters
//! - `network`: TCP listener, connection tasks, tick timer and the control handle
//! - `physics`: vector math, collision and ball integration
//! - `protocol`: applying inbound frames to the match
//! - `readiness`: the edge-triggered all-ready aggregate
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handle = Server::start(ServerConfig::default()).await?;
//!     println!("Waiting for controllers on {}", handle.local_addr());
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.broadcast("Server going away").await?;
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod controller;
pub mod error;
pub mod game;
pub mod lobby;
pub mod network;
pub mod physics;
pub mod protocol;
pub mod readiness;

pub use config::{PhysicsConfig, Scene, ServerConfig};
pub use controller::{MatchController, MatchSnapshot};
pub use error::{ServerError, ServerResult};
pub use network::{Server, ServerHandle};
