//! # Snake Game Client Library
//!
//! Headless client for the snake server. It speaks the same named-event
//! protocol as any graphical client would and mirrors the server's snapshots,
//! but renders nothing.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! Owns the TCP connection:
//! - Frame reading on a background task
//! - The `join` / `name_change` / `ready_for_events` handshake
//! - Direction updates and leaving
//! - A bot loop driven by the game module
//!
//! ### Game Module (`game`)
//! Mirrors the latest `update` snapshot, tracks the round phase and picks
//! bot moves. A dead snake is only reported, never simulated.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//! use shared::{Board, Direction};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::connect("127.0.0.1:6500", Board::default()).await?;
//!     let identifier = client.join("alice").await?;
//!     println!("playing as {}", identifier);
//!
//!     client.send_direction(Direction::Up).await?;
//!     client.run_bot(Some(1)).await?;
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod network;
