use crate::error::ServerError;
use shared::{Board, DEFAULT_CELL_SIZE, DEFAULT_WINDOW_HEIGHT, DEFAULT_WINDOW_WIDTH, MAX_PLAYERS};
use std::time::Duration;

/// Immutable inputs the server is started with.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the listener to
    pub host: String,
    /// Port to listen on; 0 picks an ephemeral port
    pub port: u16,
    /// Time between simulation ticks
    pub tick_interval: Duration,
    /// How often the main loop polls the game for a due tick
    pub poll_interval: Duration,
    /// Sessions per round, at most [`MAX_PLAYERS`]
    pub max_players: usize,
    /// Open connections accepted at once, joined or not
    pub max_connections: usize,
    /// Deadline for the peer to confirm its assigned identifier
    pub confirm_timeout: Duration,
    /// Deadline for the `ready_for_events` signal after confirmation
    pub ready_timeout: Duration,
    pub window_width: u32,
    pub window_height: u32,
    pub cell_size: u32,
    /// Number of food items on the board
    pub food_count: usize,
    /// Pause before the next round starts after a game over; zero disables it
    pub restart_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6500,
            tick_interval: Duration::from_millis(100),
            poll_interval: Duration::from_millis(5),
            max_players: MAX_PLAYERS,
            max_connections: 2 * MAX_PLAYERS,
            confirm_timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(10),
            window_width: DEFAULT_WINDOW_WIDTH,
            window_height: DEFAULT_WINDOW_HEIGHT,
            cell_size: DEFAULT_CELL_SIZE,
            food_count: 2,
            restart_delay: Duration::from_secs(3),
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn board(&self) -> Result<Board, ServerError> {
        Board::from_window(self.window_width, self.window_height, self.cell_size).ok_or_else(|| {
            ServerError::InvalidConfig(format!(
                "window {}x{} does not fit cells of size {}",
                self.window_width, self.window_height, self.cell_size
            ))
        })
    }

    /// Rejects configurations the game cannot run with.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.max_players == 0 || self.max_players > MAX_PLAYERS {
            return Err(ServerError::InvalidConfig(format!(
                "max players must be between 1 and {}, got {}",
                MAX_PLAYERS, self.max_players
            )));
        }
        if self.max_connections < self.max_players {
            return Err(ServerError::InvalidConfig(format!(
                "max connections {} is below max players {}",
                self.max_connections, self.max_players
            )));
        }
        if self.tick_interval.is_zero() {
            return Err(ServerError::InvalidConfig(
                "tick interval must be positive".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ServerError::InvalidConfig(
                "poll interval must be positive".to_string(),
            ));
        }

        let board = self.board()?;
        // Spawn points sit five cells in from either side
        if board.width < 12 || board.height < 2 {
            return Err(ServerError::InvalidConfig(format!(
                "board of {}x{} cells is too small",
                board.width, board.height
            )));
        }
        if self.food_count == 0 || self.food_count >= board.cell_count() {
            return Err(ServerError::InvalidConfig(format!(
                "food count {} does not fit the board",
                self.food_count
            )));
        }
        Ok(())
    }
}
