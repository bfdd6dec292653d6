//! Error taxonomy for the server.
//!
//! Only [`ServerError`] is fatal. Every other error is scoped to a single
//! connection or a single tick and is logged by the main loop.

use shared::ProtocolError;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Reasons a `join` is refused. The peer is disconnected without any reply.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("room is full ({0} players)")]
    RoomFull(usize),
    #[error("invalid username `{0}`")]
    InvalidUsername(String),
    #[error("peer {0} already has a session")]
    AlreadyJoined(SocketAddr),
}

/// Failures of the identifier-confirmation and readiness waits.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("identifier mismatch: expected `{expected}`, got `{received}`")]
    IdentifierMismatch { expected: String, received: String },
    #[error("no identifier confirmation within {0:?}")]
    ConfirmTimeout(Duration),
    #[error("no ready signal within {0:?}")]
    ReadyTimeout(Duration),
    #[error("handshake cancelled")]
    Cancelled,
    #[error("handshake channel closed")]
    ChannelClosed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
    #[error("game already running")]
    AlreadyRunning,
    #[error("no session for peer {0}")]
    UnknownPlayer(SocketAddr),
}

/// Error returned by an event handler; the main loop decides what happens to the peer.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("join rejected: {0}")]
    Rejected(#[from] JoinError),
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Game(#[from] GameError),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
