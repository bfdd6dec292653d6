//! # Snake Game Server Library
//!
//! This library provides the authoritative server for the two-player networked
//! snake game. It owns the canonical board, negotiates player sessions and
//! broadcasts a state snapshot to every ready player once per tick.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Snakes only move on the server. Clients send direction requests and render
//! whatever the latest `update` snapshot says; there is no client prediction.
//!
//! ### Session Lifecycle
//! A connection becomes a playing session in three steps:
//! - `join` with a display name, answered by `join_response` carrying the
//!   assigned `name#1234` identifier
//! - `name_change` confirming that identifier within the confirm timeout
//! - `ready_for_events` within the ready timeout
//!
//! Peers that miss a deadline, confirm the wrong identifier or send malformed
//! payloads are disconnected. Once two sessions are ready the round starts.
//!
//! ### Round Management
//! A round ends when any snake leaves the board or runs into a body. Everyone
//! receives one `game_over`, the board is reset and the next round starts
//! after the restart delay.
//!
//! ## Architecture Design
//!
//! ### Single-Writer Main Loop
//! One task owns the [`context::ServerContext`] and with it the
//! [`game::SnakeGame`]. Connection and handshake tasks only talk to it through
//! [`network::ServerMessage`]s, so ticks and event handlers never interleave.
//!
//! ### TCP Transport
//! Events travel as length-prefixed bincode envelopes (see
//! `shared::framing`). Each connection gets a reader task and a writer task
//! with a bounded outbound queue.
//!
//! ## Module Organization
//!
//! - `config`: startup configuration and validation
//! - `context`: peer handles, broadcasting, handshake bookkeeping, restarts
//! - `dispatch`: command name to handler table
//! - `error`: error taxonomy
//! - `food`: food placement
//! - `game`: tick loop and round state machine
//! - `handshake`: confirm and ready waits
//! - `network`: accept loop, connection tasks, main loop
//! - `session_manager`: per-player state and the session registry
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     println!("listening on {}", server.local_addr());
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod food;
pub mod game;
pub mod handshake;
pub mod network;
pub mod session_manager;
