//! Authoritative snake simulation and round state machine.
//!
//! [`SnakeGame`] owns the session registry and the food set. Everything that
//! mutates either goes through its methods, and the server calls them from a
//! single task, so a tick always sees a consistent world.

use crate::error::{GameError, JoinError};
use crate::food::FoodSpawner;
use crate::session_manager::{DeathReason, PlayerSession, SessionManager};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    check_username, Board, Direction, GameStarted, GameUpdate, PlayerData, ServerEvent,
    DISCRIMINATOR_LEN,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Receives events the game wants delivered to every ready peer.
pub trait EventSink {
    fn broadcast(&mut self, event: ServerEvent);
}

impl EventSink for Vec<ServerEvent> {
    fn broadcast(&mut self, event: ServerEvent) {
        self.push(event);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    NotStarted,
    Running,
    Paused,
    Ended,
}

#[derive(Debug, Clone)]
pub struct GameSettings {
    pub board: Board,
    pub tick_interval: Duration,
    pub food_count: usize,
    pub max_players: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Death {
    pub identifier: String,
    pub reason: DeathReason,
}

/// What happened during one executed tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub frame: u64,
    pub deaths: Vec<Death>,
}

impl TickReport {
    pub fn round_over(&self) -> bool {
        !self.deaths.is_empty()
    }
}

pub struct SnakeGame {
    settings: GameSettings,
    sessions: SessionManager,
    food: FoodSpawner,
    rng: StdRng,

    phase: RoundPhase,
    start_time: Option<Instant>,
    last_tick_time: Instant,
    time_until_next_tick: Duration,
    frame_counter: u64,
    round_number: u32,
    uptime: u64,
    uptime_changed: bool,
}

impl SnakeGame {
    pub fn new(settings: GameSettings) -> Self {
        let food = FoodSpawner::new(settings.board, settings.food_count);
        Self::with_parts(settings, food, StdRng::from_entropy())
    }

    /// Deterministic game for tests and benchmarks
    pub fn with_seed(settings: GameSettings, seed: u64) -> Self {
        let food = FoodSpawner::with_seed(settings.board, settings.food_count, seed);
        Self::with_parts(settings, food, StdRng::seed_from_u64(seed.wrapping_add(1)))
    }

    fn with_parts(settings: GameSettings, food: FoodSpawner, rng: StdRng) -> Self {
        Self {
            sessions: SessionManager::new(settings.max_players),
            food,
            rng,
            phase: RoundPhase::NotStarted,
            start_time: None,
            last_tick_time: Instant::now(),
            time_until_next_tick: settings.tick_interval,
            frame_counter: 0,
            round_number: 0,
            uptime: 0,
            uptime_changed: false,
            settings,
        }
    }

    /// Validates `name`, appends a fresh discriminator and registers the
    /// session. Returns the assigned identifier.
    pub fn join(&mut self, peer: SocketAddr, name: &str) -> Result<String, JoinError> {
        if self.sessions.is_full() {
            return Err(JoinError::RoomFull(self.sessions.max_players()));
        }
        if !check_username(name) {
            return Err(JoinError::InvalidUsername(name.to_string()));
        }

        let identifier = loop {
            let candidate = format!("{}#{}", name, self.discriminator());
            if !self.sessions.contains_identifier(&candidate) {
                break candidate;
            }
        };

        self.sessions
            .add_session(identifier, peer, &self.settings.board)
            .map(|session| session.identifier.clone())
    }

    fn discriminator(&mut self) -> String {
        (0..DISCRIMINATOR_LEN)
            .map(|_| char::from(b'0' + self.rng.gen_range(0..10u8)))
            .collect()
    }

    /// Removes the session for `peer`. A running round is paused so the
    /// remaining player keeps its state while waiting for an opponent.
    pub fn remove_player(&mut self, peer: SocketAddr) -> Option<PlayerSession> {
        let session = self.sessions.remove_by_peer(peer)?;
        if self.phase == RoundPhase::Running && session.is_ready() {
            info!("{} left mid-round", session.identifier);
            self.pause();
        }
        Some(session)
    }

    pub fn mark_confirmed(&mut self, peer: SocketAddr) -> Result<(), GameError> {
        let session = self
            .sessions
            .find_by_peer_mut(peer)
            .ok_or(GameError::UnknownPlayer(peer))?;
        session.name_confirmed = true;
        Ok(())
    }

    pub fn mark_ready(&mut self, peer: SocketAddr) -> Result<(), GameError> {
        let session = self
            .sessions
            .find_by_peer_mut(peer)
            .ok_or(GameError::UnknownPlayer(peer))?;
        session.ready_signal_received = true;
        Ok(())
    }

    /// Records a direction request; it takes effect on the next tick.
    pub fn set_direction(&mut self, peer: SocketAddr, direction: Direction) -> Result<(), GameError> {
        match self.sessions.find_by_peer_mut(peer) {
            Some(session) if session.is_ready() => {
                session.request_direction(direction);
                Ok(())
            }
            _ => Err(GameError::UnknownPlayer(peer)),
        }
    }

    /// True when enough ready players are present for a round
    pub fn can_start(&self) -> bool {
        self.sessions.ready_count() >= self.settings.max_players
    }

    /// Starts a fresh round, or resumes a paused one without touching its state.
    pub fn start(&mut self, now: Instant, sink: &mut dyn EventSink) -> Result<(), GameError> {
        if self.phase == RoundPhase::Running {
            return Err(GameError::AlreadyRunning);
        }

        if self.food.is_empty() {
            let occupied = self.sessions.occupied_cells();
            self.food.spawn_all(&occupied);
            self.start_time = Some(now);
            self.uptime = 0;
            self.round_number += 1;
            info!("Starting round {}", self.round_number);
        } else {
            info!("Resuming round {}", self.round_number);
        }

        self.phase = RoundPhase::Running;
        self.last_tick_time = now;
        self.time_until_next_tick = self.settings.tick_interval;

        let players: HashMap<String, Direction> = self
            .sessions
            .iter()
            .filter(|s| s.is_ready())
            .map(|s| (s.identifier.clone(), s.direction))
            .collect();
        sink.broadcast(ServerEvent::GameStarted(GameStarted {
            players,
            round: self.round_number,
        }));
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.phase != RoundPhase::Running {
            return;
        }
        info!("Pausing round {}", self.round_number);
        self.phase = RoundPhase::Paused;
    }

    /// Ends the round and resets it.
    pub fn stop(&mut self) {
        self.pause();
        self.reset();
    }

    /// Clears round-scoped state. Session identities and handshake state survive.
    pub fn reset(&mut self) {
        info!("Resetting game");
        self.phase = RoundPhase::NotStarted;
        self.frame_counter = 0;
        self.start_time = None;
        self.time_until_next_tick = self.settings.tick_interval;
        self.food.clear();
        self.sessions.reset_all();
    }

    /// Called on every host iteration; only does work while running.
    pub fn run(&mut self, now: Instant, sink: &mut dyn EventSink) -> Option<TickReport> {
        if self.phase != RoundPhase::Running {
            return None;
        }
        self.update(now, sink)
    }

    /// Executes at most one tick if the tick interval has elapsed.
    pub fn update(&mut self, now: Instant, sink: &mut dyn EventSink) -> Option<TickReport> {
        if let Some(start) = self.start_time {
            let uptime = now.saturating_duration_since(start).as_secs();
            self.uptime_changed = uptime != self.uptime;
            self.uptime = uptime;
        }

        let elapsed = now.saturating_duration_since(self.last_tick_time);
        self.time_until_next_tick = self.settings.tick_interval.saturating_sub(elapsed);
        if elapsed < self.settings.tick_interval {
            return None;
        }

        self.frame_counter += 1;
        self.last_tick_time += self.settings.tick_interval;

        let deaths = self.tick_players();
        sink.broadcast(ServerEvent::Update(self.snapshot()));

        if self.frame_counter % 60 == 0 {
            debug!(
                "Frame {}: {} players, round {}, next tick in {:?}",
                self.frame_counter,
                self.sessions.len(),
                self.round_number,
                self.time_until_next_tick
            );
        }

        let report = TickReport {
            frame: self.frame_counter,
            deaths,
        };
        if report.round_over() {
            self.end_round(&report.deaths, sink);
        }
        Some(report)
    }

    /// Moves every ready snake once in registration order and collects deaths.
    fn tick_players(&mut self) -> Vec<Death> {
        let active = self.sessions.ready_indices();
        let count = active.len();
        let mut deaths = Vec::new();

        for (k, &idx) in active.iter().enumerate() {
            let mut occupied = self.sessions.occupied_cells();
            occupied.extend(self.food.positions());

            let session = &mut self.sessions.as_mut_slice()[idx];
            session.apply_pending_direction();

            let eaten = self.food.eat_at(session.position, &occupied);
            for _ in 0..eaten {
                info!("{} ate food", session.identifier);
                session.eat();
            }
            session.advance();

            let sessions = self.sessions.as_slice();
            let other_idx = active[(k + count - 1) % count];
            let other = (other_idx != idx).then(|| &sessions[other_idx]);
            if let Some(reason) = sessions[idx].check_collision(&self.settings.board, other) {
                let identifier = sessions[idx].identifier.clone();
                info!("Snake {} died because {}", identifier, reason);
                self.sessions.as_mut_slice()[idx].alive = false;
                deaths.push(Death { identifier, reason });
            }
        }

        if count < self.settings.max_players {
            warn!(
                "Tick {} ran with {} of {} players",
                self.frame_counter, count, self.settings.max_players
            );
        }
        deaths
    }

    /// Reports the deaths to everyone and resets for the next round.
    fn end_round(&mut self, deaths: &[Death], sink: &mut dyn EventSink) {
        self.phase = RoundPhase::Ended;
        let cause = deaths
            .iter()
            .map(|death| format!("{} died because {}", death.identifier, death.reason))
            .collect::<Vec<_>>()
            .join("; ");
        info!("The game has ended! {}", cause);
        sink.broadcast(ServerEvent::GameOver(cause));
        self.reset();
    }

    pub fn snapshot(&self) -> GameUpdate {
        GameUpdate {
            players: self
                .sessions
                .iter()
                .filter(|s| s.is_ready())
                .map(|s| (s.identifier.clone(), s.to_player_data()))
                .collect(),
            foods: self.food.to_data(),
            round: self.round_number,
            frame: self.frame_counter,
            uptime_seconds: self.uptime,
            uptime_changed: self.uptime_changed,
        }
    }

    /// Public data of every ready session, in registration order. Sessions
    /// still in their handshake are left out until they become ready.
    pub fn roster(&self) -> Vec<PlayerData> {
        self.sessions
            .iter()
            .filter(|s| s.is_ready())
            .map(PlayerSession::to_player_data)
            .collect()
    }

    pub fn session(&self, peer: SocketAddr) -> Option<&PlayerSession> {
        self.sessions.find_by_peer(peer)
    }

    pub fn has_identifier(&self, identifier: &str) -> bool {
        self.sessions.contains_identifier(identifier)
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn food(&self) -> &FoodSpawner {
        &self.food
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == RoundPhase::Running
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn round_number(&self) -> u32 {
        self.round_number
    }

    pub fn uptime(&self) -> u64 {
        self.uptime
    }

    pub fn time_until_next_tick(&self) -> Duration {
        self.time_until_next_tick
    }

    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }
}
