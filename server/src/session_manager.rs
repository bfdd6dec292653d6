//! Per-player simulation state and the ordered session registry
//!
//! This module holds the server-side record of every joined player:
//! - Identity (unique identifier, peer address) and handshake progress
//! - Snake state (head position, direction, tail, length, liveness)
//! - Spawn defaults used when a round is reset
//!
//! Sessions are kept in registration order, which is also the order players
//! are moved and collision-checked in each tick.

use crate::error::JoinError;
use log::info;
use shared::{Board, Direction, PlayerData, Position};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::net::SocketAddr;

/// Why a snake died during a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathReason {
    OutOfBounds,
    CollidedWithSelf,
    CollidedWithOther,
}

impl fmt::Display for DeathReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DeathReason::OutOfBounds => "out of bounds",
            DeathReason::CollidedWithSelf => "collided with self",
            DeathReason::CollidedWithOther => "collided with other snake",
        };
        f.write_str(text)
    }
}

/// Server-side authoritative record of one connected player
#[derive(Debug, Clone)]
pub struct PlayerSession {
    /// Display name plus discriminator, unique among sessions
    pub identifier: String,
    /// Network address the session is keyed by
    pub peer: SocketAddr,
    pub position: Position,
    pub direction: Direction,
    /// Direction requested by the client, applied at the start of the next tick
    pub pending_direction: Direction,
    /// Occupied cells, most recent first. `tail[0]` is the head.
    pub tail: VecDeque<Position>,
    pub length: usize,
    pub alive: bool,
    pub name_confirmed: bool,
    pub ready_signal_received: bool,
    pub default_position: Position,
    pub default_direction: Direction,
}

impl PlayerSession {
    pub fn new(
        identifier: String,
        peer: SocketAddr,
        default_position: Position,
        default_direction: Direction,
    ) -> Self {
        let mut session = Self {
            identifier,
            peer,
            position: default_position,
            direction: default_direction,
            pending_direction: default_direction,
            tail: VecDeque::new(),
            length: 1,
            alive: true,
            name_confirmed: false,
            ready_signal_received: false,
            default_position,
            default_direction,
        };
        session.reset();
        session
    }

    /// Puts the snake back on its spawn cell. Handshake flags are kept.
    pub fn reset(&mut self) {
        self.position = self.default_position;
        self.direction = self.default_direction;
        self.pending_direction = self.default_direction;
        self.tail.clear();
        self.tail.push_front(self.default_position);
        self.length = 1;
        self.alive = true;
    }

    pub fn is_ready(&self) -> bool {
        self.name_confirmed && self.ready_signal_received
    }

    pub fn request_direction(&mut self, direction: Direction) {
        self.pending_direction = direction;
    }

    /// Adopts the pending direction unless it would turn the snake back
    /// onto its own neck.
    pub fn apply_pending_direction(&mut self) {
        if self.length > 1 && self.pending_direction == self.direction.opposite() {
            self.pending_direction = self.direction;
            return;
        }
        self.direction = self.pending_direction;
    }

    /// Grows the snake by one cell; the next move skips its tail pop.
    pub fn eat(&mut self) {
        self.length += 1;
    }

    /// Moves the head one cell and drops tail cells beyond `length`.
    pub fn advance(&mut self) {
        self.position = self.position.step(self.direction);
        self.tail.push_front(self.position);
        self.tail.truncate(self.length);
    }

    /// Returns the first collision for the current head, checked against
    /// the board edges, the snake's own body and then the other snake.
    pub fn check_collision(
        &self,
        board: &Board,
        other: Option<&PlayerSession>,
    ) -> Option<DeathReason> {
        if !board.contains(self.position) {
            return Some(DeathReason::OutOfBounds);
        }
        if self.tail.iter().skip(1).any(|pos| *pos == self.position) {
            return Some(DeathReason::CollidedWithSelf);
        }
        if let Some(other) = other {
            if other.tail.iter().any(|pos| *pos == self.position) {
                return Some(DeathReason::CollidedWithOther);
            }
        }
        None
    }

    pub fn to_player_data(&self) -> PlayerData {
        PlayerData {
            identifier: self.identifier.clone(),
            ip_address: self.peer.to_string(),
            position: self.position,
            length: self.length,
            direction: self.direction,
            tail: self.tail.iter().copied().collect(),
            alive: self.alive,
        }
    }
}

/// Ordered registry of player sessions with a fixed capacity
pub struct SessionManager {
    sessions: Vec<PlayerSession>,
    max_players: usize,
}

impl SessionManager {
    pub fn new(max_players: usize) -> Self {
        Self {
            sessions: Vec::with_capacity(max_players),
            max_players,
        }
    }

    /// Spawn cell and direction for a join slot. Slot 0 starts on the left
    /// facing right, slot 1 mirrors it on the right facing left.
    pub fn spawn_point(board: &Board, slot: usize) -> (Position, Direction) {
        let y = board.height / 2 - 1;
        if slot % 2 == 0 {
            (Position::new(5, y), Direction::Right)
        } else {
            (Position::new(board.width - 1 - 5, y), Direction::Left)
        }
    }

    /// First spawn slot not used by a current session
    fn free_slot(&self) -> usize {
        (0..self.max_players)
            .find(|slot| {
                let direction = if slot % 2 == 0 {
                    Direction::Right
                } else {
                    Direction::Left
                };
                !self
                    .sessions
                    .iter()
                    .any(|session| session.default_direction == direction)
            })
            .unwrap_or(self.sessions.len())
    }

    /// Registers a new session, returning a reference to it.
    pub fn add_session(
        &mut self,
        identifier: String,
        peer: SocketAddr,
        board: &Board,
    ) -> Result<&PlayerSession, JoinError> {
        if self.sessions.len() >= self.max_players {
            return Err(JoinError::RoomFull(self.max_players));
        }
        if self.find_by_peer(peer).is_some() {
            return Err(JoinError::AlreadyJoined(peer));
        }

        let (position, direction) = Self::spawn_point(board, self.free_slot());
        info!(
            "Added player {} from {} at {} facing {}",
            identifier, peer, position, direction
        );
        self.sessions
            .push(PlayerSession::new(identifier, peer, position, direction));
        Ok(&self.sessions[self.sessions.len() - 1])
    }

    /// Removes the session registered for `peer`
    pub fn remove_by_peer(&mut self, peer: SocketAddr) -> Option<PlayerSession> {
        let idx = self.sessions.iter().position(|s| s.peer == peer)?;
        let session = self.sessions.remove(idx);
        info!("Removed player {}", session.identifier);
        Some(session)
    }

    pub fn find_by_peer(&self, peer: SocketAddr) -> Option<&PlayerSession> {
        self.sessions.iter().find(|s| s.peer == peer)
    }

    pub fn find_by_peer_mut(&mut self, peer: SocketAddr) -> Option<&mut PlayerSession> {
        self.sessions.iter_mut().find(|s| s.peer == peer)
    }

    pub fn find_by_identifier(&self, identifier: &str) -> Option<&PlayerSession> {
        self.sessions.iter().find(|s| s.identifier == identifier)
    }

    pub fn contains_identifier(&self, identifier: &str) -> bool {
        self.find_by_identifier(identifier).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerSession> {
        self.sessions.iter()
    }

    pub fn as_slice(&self) -> &[PlayerSession] {
        &self.sessions
    }

    pub fn as_mut_slice(&mut self) -> &mut [PlayerSession] {
        &mut self.sessions
    }

    /// Indices of ready sessions in registration order
    pub fn ready_indices(&self) -> Vec<usize> {
        self.sessions
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_ready())
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn ready_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_ready()).count()
    }

    /// Every cell covered by a snake
    pub fn occupied_cells(&self) -> HashSet<Position> {
        self.sessions
            .iter()
            .flat_map(|s| s.tail.iter().copied())
            .collect()
    }

    pub fn reset_all(&mut self) {
        for session in &mut self.sessions {
            session.reset();
        }
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.max_players
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
