//! Client-side mirror of the authoritative game state.
//!
//! The server is the only source of truth; this module just keeps the latest
//! snapshot and round status so a renderer or a bot can read them.

use log::{info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use shared::{Board, Direction, FoodData, PlayerData, Position, ServerEvent};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    /// No identifier assigned yet
    Connecting,
    /// Joined, waiting for an opponent or the next round
    WaitingForPlayers,
    Playing,
    RoundOver,
}

pub struct ClientGameState {
    board: Board,
    identifier: Option<String>,
    phase: ClientPhase,

    roster: Vec<PlayerData>,
    players: HashMap<String, PlayerData>,
    foods: Vec<FoodData>,
    round: u32,
    frame: u64,
    uptime_seconds: u64,
    last_game_over: Option<String>,
}

impl ClientGameState {
    pub fn new(board: Board) -> Self {
        Self {
            board,
            identifier: None,
            phase: ClientPhase::Connecting,
            roster: Vec::new(),
            players: HashMap::new(),
            foods: Vec::new(),
            round: 0,
            frame: 0,
            uptime_seconds: 0,
            last_game_over: None,
        }
    }

    /// Folds one server event into the mirrored state.
    pub fn apply_event(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::JoinResponse(response) => {
                info!("Joined as {}", response.username);
                self.identifier = Some(response.username.clone());
                self.phase = ClientPhase::WaitingForPlayers;
            }
            ServerEvent::PlayerConnect(roster) => {
                self.roster = roster.clone();
            }
            ServerEvent::GameStarted(started) => {
                info!("Round {} started with {} players", started.round, started.players.len());
                self.round = started.round;
                self.phase = ClientPhase::Playing;
                self.last_game_over = None;
            }
            ServerEvent::Update(update) => {
                let was_alive = self.own_snake().map_or(true, |snake| snake.alive);

                self.players = update.players.clone();
                self.foods = update.foods.clone();
                self.round = update.round;
                self.frame = update.frame;
                self.uptime_seconds = update.uptime_seconds;

                if was_alive && self.own_snake().map_or(false, |snake| !snake.alive) {
                    warn!("Our snake died at {:?}", self.own_snake().map(|s| s.position));
                }
            }
            ServerEvent::ClientDisconnect(disconnect) => {
                info!("{} left the game", disconnect.identifier);
                self.players.remove(&disconnect.identifier);
                self.roster.retain(|p| p.identifier != disconnect.identifier);
                self.phase = ClientPhase::WaitingForPlayers;
            }
            ServerEvent::GameOver(cause) => {
                info!("Game over: {}", cause);
                self.phase = ClientPhase::RoundOver;
                self.last_game_over = Some(cause.clone());
            }
        }
    }

    pub fn own_snake(&self) -> Option<&PlayerData> {
        self.players.get(self.identifier.as_deref()?)
    }

    pub fn opponents(&self) -> impl Iterator<Item = &PlayerData> {
        let own = self.identifier.clone();
        self.players
            .values()
            .filter(move |p| Some(&p.identifier) != own.as_ref())
    }

    /// Greedy bot move: the safe direction that gets closest to the nearest
    /// food. Returns `None` while there is no live snake to steer.
    pub fn choose_direction<R: Rng>(&self, rng: &mut R) -> Option<Direction> {
        let snake = self.own_snake().filter(|s| s.alive)?;
        let head = snake.position;
        let current = snake.direction;

        let blocked: HashSet<Position> = self
            .players
            .values()
            .flat_map(|p| p.tail.iter().copied())
            .collect();
        let target = self
            .foods
            .iter()
            .map(|food| food.position)
            .min_by_key(|pos| manhattan_distance(head, *pos));

        let mut candidates = vec![Direction::Up, Direction::Down, Direction::Left, Direction::Right];
        candidates.retain(|d| *d != current.opposite() || snake.length == 1);
        // Shuffled so ties do not always favour the same turn
        candidates.shuffle(rng);

        let mut best: Option<(Direction, i32)> = None;
        for direction in candidates {
            let next = head.step(direction);
            if !self.board.contains(next) || blocked.contains(&next) {
                continue;
            }

            let mut score = match target {
                Some(food) => -(manhattan_distance(next, food) as i32) * 10,
                None => 0,
            };
            if direction == current {
                score += 1;
            }
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((direction, score));
            }
        }

        Some(best.map_or(current, |(direction, _)| direction))
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    pub fn roster(&self) -> &[PlayerData] {
        &self.roster
    }

    pub fn players(&self) -> &HashMap<String, PlayerData> {
        &self.players
    }

    pub fn foods(&self) -> &[FoodData] {
        &self.foods
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.uptime_seconds
    }

    pub fn last_game_over(&self) -> Option<&str> {
        self.last_game_over.as_deref()
    }
}

fn manhattan_distance(a: Position, b: Position) -> u32 {
    a.x.abs_diff(b.x) + a.y.abs_diff(b.y)
}
