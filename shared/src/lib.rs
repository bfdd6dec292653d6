//! Types shared by the snake server and its clients: the board geometry,
//! directions and grid positions, the username policy, and the named-event
//! protocol exchanged over the wire.

pub mod framing;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub const DEFAULT_WINDOW_WIDTH: u32 = 800;
pub const DEFAULT_WINDOW_HEIGHT: u32 = 600;
pub const DEFAULT_CELL_SIZE: u32 = 20;

/// Sessions per round. Collision ordering only has meaning for two snakes.
pub const MAX_PLAYERS: usize = 2;

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 16;
pub const DISCRIMINATOR_LEN: usize = 4;
pub const RESERVED_USERNAME_CHARS: [char; 4] = ['#', '@', ':', '/'];

/// Event command names used on the wire.
pub mod events {
    pub const JOIN: &str = "join";
    pub const JOIN_RESPONSE: &str = "join_response";
    pub const READY_FOR_EVENTS: &str = "ready_for_events";
    pub const PLAYER_CONNECT: &str = "player_connect";
    pub const GAME_STARTED: &str = "game_started";
    pub const UPDATE: &str = "update";
    pub const NAME_CHANGE: &str = "name_change";
    pub const LEAVE: &str = "leave";
    pub const CLIENT_DISCONNECT: &str = "client_disconnect";
    pub const GAME_OVER: &str = "game_over";
}

/// Grid coordinate. Signed so a head can sit one cell past the edge when it dies.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Returns the neighbouring cell one step in `direction`.
    pub fn step(self, direction: Direction) -> Self {
        let (dx, dy) = direction.velocity();
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Unit velocity for one tick of movement
    pub fn velocity(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grid geometry derived from a window size and a cell size.
///
/// Both ends of the connection must agree on the board, so the server sends
/// positions in cells and never in pixels.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Board {
    pub cell_size: u32,
    pub width: i32,
    pub height: i32,
}

impl Board {
    /// Builds a board from pixel dimensions. Returns `None` when the window
    /// does not fit a single cell or the cell size is zero.
    pub fn from_window(window_width: u32, window_height: u32, cell_size: u32) -> Option<Self> {
        if cell_size == 0 {
            return None;
        }
        let width = window_width / cell_size;
        let height = window_height / cell_size;
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self {
            cell_size,
            width: width as i32,
            height: height as i32,
        })
    }

    /// Board measured directly in cells.
    pub fn with_cells(width: i32, height: i32) -> Self {
        Self {
            cell_size: DEFAULT_CELL_SIZE,
            width,
            height,
        }
    }

    pub fn contains(&self, pos: Position) -> bool {
        pos.x >= 0 && pos.x < self.width && pos.y >= 0 && pos.y < self.height
    }

    pub fn cell_count(&self) -> usize {
        (self.width.max(0) as usize) * (self.height.max(0) as usize)
    }

    /// Iterates every cell row by row.
    pub fn cells(&self) -> impl Iterator<Item = Position> + '_ {
        (0..self.height).flat_map(move |y| (0..self.width).map(move |x| Position::new(x, y)))
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::with_cells(
            (DEFAULT_WINDOW_WIDTH / DEFAULT_CELL_SIZE) as i32,
            (DEFAULT_WINDOW_HEIGHT / DEFAULT_CELL_SIZE) as i32,
        )
    }
}

/// Checks a display name before the discriminator is appended.
///
/// Names are 3 to 16 ASCII identifier characters: a letter or underscore
/// followed by letters, digits or underscores. `#` is reserved for the
/// discriminator.
pub fn check_username(name: &str) -> bool {
    let len = name.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return false;
    }
    if name.chars().any(|c| RESERVED_USERNAME_CHARS.contains(&c)) {
        return false;
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Splits `name#1234` into its base name and discriminator.
pub fn split_identifier(identifier: &str) -> Option<(&str, &str)> {
    let (name, discriminator) = identifier.rsplit_once('#')?;
    if discriminator.len() == DISCRIMINATOR_LEN && discriminator.chars().all(|c| c.is_ascii_digit())
    {
        Some((name, discriminator))
    } else {
        None
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode `{command}` payload: {source}")]
    Encode {
        command: String,
        #[source]
        source: bincode::Error,
    },
    #[error("malformed `{command}` payload: {source}")]
    Decode {
        command: String,
        #[source]
        source: bincode::Error,
    },
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
}

/// A named event with an opaque payload, the unit carried by the transport.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub command: String,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// An event that carries no payload
    pub fn empty(command: &str) -> Self {
        Self {
            command: command.to_string(),
            payload: Vec::new(),
        }
    }

    pub fn with_payload<T: Serialize>(command: &str, payload: &T) -> Result<Self, ProtocolError> {
        let payload = bincode::serialize(payload).map_err(|source| ProtocolError::Encode {
            command: command.to_string(),
            source,
        })?;
        Ok(Self {
            command: command.to_string(),
            payload,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        bincode::deserialize(&self.payload).map_err(|source| ProtocolError::Decode {
            command: self.command.clone(),
            source,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(|source| ProtocolError::Encode {
            command: self.command.clone(),
            source,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        bincode::deserialize(bytes).map_err(|source| ProtocolError::Decode {
            command: "<envelope>".to_string(),
            source,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct JoinResponse {
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NameChange {
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct DirectionUpdate {
    pub direction: Direction,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ClientDisconnect {
    pub identifier: String,
}

/// Public view of one player, as broadcast to every peer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PlayerData {
    pub identifier: String,
    pub ip_address: String,
    pub position: Position,
    pub length: usize,
    pub direction: Direction,
    pub tail: Vec<Position>,
    pub alive: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct FoodData {
    pub position: Position,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GameStarted {
    pub players: HashMap<String, Direction>,
    pub round: u32,
}

/// Snapshot broadcast once per tick.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GameUpdate {
    pub players: HashMap<String, PlayerData>,
    pub foods: Vec<FoodData>,
    pub round: u32,
    pub frame: u64,
    pub uptime_seconds: u64,
    pub uptime_changed: bool,
}

/// Events the server sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    JoinResponse(JoinResponse),
    PlayerConnect(Vec<PlayerData>),
    GameStarted(GameStarted),
    Update(GameUpdate),
    ClientDisconnect(ClientDisconnect),
    GameOver(String),
}

impl ServerEvent {
    pub fn command(&self) -> &'static str {
        match self {
            ServerEvent::JoinResponse(_) => events::JOIN_RESPONSE,
            ServerEvent::PlayerConnect(_) => events::PLAYER_CONNECT,
            ServerEvent::GameStarted(_) => events::GAME_STARTED,
            ServerEvent::Update(_) => events::UPDATE,
            ServerEvent::ClientDisconnect(_) => events::CLIENT_DISCONNECT,
            ServerEvent::GameOver(_) => events::GAME_OVER,
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, ProtocolError> {
        let command = self.command();
        match self {
            ServerEvent::JoinResponse(payload) => Envelope::with_payload(command, payload),
            ServerEvent::PlayerConnect(payload) => Envelope::with_payload(command, payload),
            ServerEvent::GameStarted(payload) => Envelope::with_payload(command, payload),
            ServerEvent::Update(payload) => Envelope::with_payload(command, payload),
            ServerEvent::ClientDisconnect(payload) => Envelope::with_payload(command, payload),
            ServerEvent::GameOver(payload) => Envelope::with_payload(command, payload),
        }
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ProtocolError> {
        match envelope.command.as_str() {
            events::JOIN_RESPONSE => Ok(ServerEvent::JoinResponse(envelope.decode()?)),
            events::PLAYER_CONNECT => Ok(ServerEvent::PlayerConnect(envelope.decode()?)),
            events::GAME_STARTED => Ok(ServerEvent::GameStarted(envelope.decode()?)),
            events::UPDATE => Ok(ServerEvent::Update(envelope.decode()?)),
            events::CLIENT_DISCONNECT => Ok(ServerEvent::ClientDisconnect(envelope.decode()?)),
            events::GAME_OVER => Ok(ServerEvent::GameOver(envelope.decode()?)),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

/// Events a client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Join(JoinRequest),
    ReadyForEvents,
    Update(DirectionUpdate),
    NameChange(NameChange),
    Leave,
}

impl ClientEvent {
    pub fn command(&self) -> &'static str {
        match self {
            ClientEvent::Join(_) => events::JOIN,
            ClientEvent::ReadyForEvents => events::READY_FOR_EVENTS,
            ClientEvent::Update(_) => events::UPDATE,
            ClientEvent::NameChange(_) => events::NAME_CHANGE,
            ClientEvent::Leave => events::LEAVE,
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, ProtocolError> {
        let command = self.command();
        match self {
            ClientEvent::Join(payload) => Envelope::with_payload(command, payload),
            ClientEvent::Update(payload) => Envelope::with_payload(command, payload),
            ClientEvent::NameChange(payload) => Envelope::with_payload(command, payload),
            ClientEvent::ReadyForEvents | ClientEvent::Leave => Ok(Envelope::empty(command)),
        }
    }
}
