//! State owned by the server main loop: the game, a handle per connected
//! peer, and the bookkeeping that ties handshakes and round restarts to them.

use crate::config::ServerConfig;
use crate::error::{HandlerError, HandshakeError};
use crate::game::{EventSink, GameSettings, RoundPhase, SnakeGame};
use crate::handshake::{spawn_handshake, HandshakeSignal, HandshakeTimeouts};
use crate::network::ServerMessage;
use log::{debug, error, info, warn};
use shared::{Board, ClientDisconnect, Envelope, JoinResponse, ServerEvent};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Main-loop side of one connection
#[derive(Debug)]
pub struct PeerHandle {
    outbound: mpsc::Sender<Envelope>,
    cancel: CancellationToken,
    handshake: Option<mpsc::Sender<HandshakeSignal>>,
    ready: bool,
    /// Set until the peer sends `join`
    join_deadline: Option<Instant>,
}

impl PeerHandle {
    pub fn new(outbound: mpsc::Sender<Envelope>, cancel: CancellationToken) -> Self {
        Self {
            outbound,
            cancel,
            handshake: None,
            ready: false,
            join_deadline: None,
        }
    }

    /// Queues one envelope. A peer that cannot keep up is closed instead of
    /// silently missing events; its reader then reports the close.
    fn send(&self, peer: SocketAddr, envelope: Envelope) {
        if self.cancel.is_cancelled() {
            return;
        }
        match self.outbound.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(envelope)) => {
                warn!(
                    "Outbound queue full for {} at `{}`, closing connection",
                    peer, envelope.command
                );
                self.cancel.cancel();
            }
            Err(TrySendError::Closed(_)) => debug!("Connection to {} already closed", peer),
        }
    }
}

/// Delivers game events to every ready peer.
struct Broadcaster<'a> {
    peers: &'a HashMap<SocketAddr, PeerHandle>,
}

impl EventSink for Broadcaster<'_> {
    fn broadcast(&mut self, event: ServerEvent) {
        let envelope = match event.to_envelope() {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("Failed to encode broadcast: {}", e);
                return;
            }
        };
        for (peer, handle) in self.peers.iter().filter(|(_, handle)| handle.ready) {
            handle.send(*peer, envelope.clone());
        }
    }
}

pub struct ServerContext {
    config: ServerConfig,
    game: SnakeGame,
    peers: HashMap<SocketAddr, PeerHandle>,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    restart_at: Option<Instant>,
}

impl ServerContext {
    pub fn new(
        config: ServerConfig,
        board: Board,
        server_tx: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        let game = SnakeGame::new(GameSettings {
            board,
            tick_interval: config.tick_interval,
            food_count: config.food_count,
            max_players: config.max_players,
        });
        Self::with_game(config, game, server_tx)
    }

    pub fn with_game(
        config: ServerConfig,
        game: SnakeGame,
        server_tx: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        Self {
            config,
            game,
            peers: HashMap::new(),
            server_tx,
            restart_at: None,
        }
    }

    /// Tracks a new connection. Returns false and closes it when the
    /// server already holds `max_connections` peers.
    pub fn register_peer(&mut self, peer: SocketAddr, mut handle: PeerHandle) -> bool {
        if self.peers.len() >= self.config.max_connections {
            warn!(
                "Refusing {}: {} connections already open",
                peer,
                self.peers.len()
            );
            handle.cancel.cancel();
            return false;
        }
        info!("Peer {} connected", peer);
        handle.join_deadline = Some(Instant::now() + self.config.confirm_timeout);
        self.peers.insert(peer, handle);
        true
    }

    /// Sends one event to one peer regardless of readiness.
    pub fn send_to(&self, peer: SocketAddr, event: &ServerEvent) -> Result<(), HandlerError> {
        let envelope = event.to_envelope()?;
        if let Some(handle) = self.peers.get(&peer) {
            handle.send(peer, envelope);
        }
        Ok(())
    }

    pub fn broadcast(&self, event: ServerEvent) {
        Broadcaster { peers: &self.peers }.broadcast(event);
    }

    /// Registers a session for `peer` and starts its handshake.
    pub fn join(&mut self, peer: SocketAddr, name: &str) -> Result<(), HandlerError> {
        let identifier = self.game.join(peer, name)?;
        self.send_to(
            peer,
            &ServerEvent::JoinResponse(JoinResponse {
                username: identifier.clone(),
            }),
        )?;
        self.begin_handshake(peer, identifier);
        Ok(())
    }

    fn begin_handshake(&mut self, peer: SocketAddr, identifier: String) {
        let Some(handle) = self.peers.get_mut(&peer) else {
            warn!("No connection for {} while starting its handshake", peer);
            return;
        };
        handle.join_deadline = None;
        let timeouts = HandshakeTimeouts {
            confirm: self.config.confirm_timeout,
            ready: self.config.ready_timeout,
        };
        debug!("Starting handshake for {} ({})", identifier, peer);
        handle.handshake = Some(spawn_handshake(
            peer,
            identifier,
            timeouts,
            handle.cancel.child_token(),
            self.server_tx.clone(),
        ));
    }

    /// Hands a signal to the peer's running handshake. Returns false when
    /// no handshake is in progress for `peer`.
    pub fn forward_handshake_signal(&mut self, peer: SocketAddr, signal: HandshakeSignal) -> bool {
        let Some(sender) = self.peers.get(&peer).and_then(|h| h.handshake.as_ref()) else {
            return false;
        };
        if let Err(e) = sender.try_send(signal) {
            warn!("Dropping handshake signal from {}: {}", peer, e);
        }
        true
    }

    /// Applies the outcome of a handshake task.
    pub fn complete_handshake(
        &mut self,
        peer: SocketAddr,
        result: Result<(), HandshakeError>,
        now: Instant,
    ) {
        let Some(handle) = self.peers.get_mut(&peer) else {
            debug!("Handshake for {} finished after it disconnected", peer);
            return;
        };
        handle.handshake = None;

        if let Err(e) = result {
            self.disconnect(peer, &format!("handshake failed: {}", e));
            return;
        }

        let marked = self
            .game
            .mark_confirmed(peer)
            .and_then(|_| self.game.mark_ready(peer));
        if let Err(e) = marked {
            warn!("Handshake finished for {} without a session: {}", peer, e);
            return;
        }
        handle.ready = true;

        if let Some(session) = self.game.session(peer) {
            info!("{} is ready", session.identifier);
        }
        self.broadcast(ServerEvent::PlayerConnect(self.game.roster()));
        self.maybe_start_round(now);
    }

    /// Starts a round once enough players are ready. A paused round is
    /// discarded because one of its players has left.
    pub fn maybe_start_round(&mut self, now: Instant) {
        if self.game.is_running() || !self.game.can_start() {
            return;
        }
        if self.game.phase() == RoundPhase::Paused {
            self.game.stop();
        }
        self.restart_at = None;

        let mut sink = Broadcaster { peers: &self.peers };
        if let Err(e) = self.game.start(now, &mut sink) {
            warn!("Could not start round: {}", e);
        }
    }

    /// Removes the peer's session and connection. Remaining ready peers are
    /// told when the session had finished its handshake.
    pub fn disconnect(&mut self, peer: SocketAddr, reason: &str) {
        let session = self.game.remove_player(peer);
        if let Some(handle) = self.peers.remove(&peer) {
            handle.cancel.cancel();
        }

        match session {
            Some(session) => {
                info!("Disconnecting {} ({}): {}", session.identifier, peer, reason);
                if session.is_ready() {
                    self.broadcast(ServerEvent::ClientDisconnect(ClientDisconnect {
                        identifier: session.identifier,
                    }));
                }
            }
            None => info!("Disconnecting {}: {}", peer, reason),
        }

        if !self.game.can_start() {
            self.restart_at = None;
        }
    }

    /// Closes idle connections, then runs a due tick and the scheduled
    /// restart, if any.
    pub fn poll(&mut self, now: Instant) {
        let idle: Vec<SocketAddr> = self
            .peers
            .iter()
            .filter(|(_, handle)| handle.join_deadline.map_or(false, |deadline| now >= deadline))
            .map(|(peer, _)| *peer)
            .collect();
        for peer in idle {
            self.disconnect(peer, "no join before the deadline");
        }

        let mut sink = Broadcaster { peers: &self.peers };
        if let Some(report) = self.game.run(now, &mut sink) {
            if report.round_over() && !self.config.restart_delay.is_zero() {
                debug!("Next round in {:?}", self.config.restart_delay);
                self.restart_at = Some(now + self.config.restart_delay);
            }
        }

        if let Some(restart_at) = self.restart_at {
            if now >= restart_at {
                self.maybe_start_round(now);
            }
        }
    }

    /// Closes every connection.
    pub fn shutdown(&mut self) {
        info!("Closing {} connections", self.peers.len());
        for (_, handle) in self.peers.drain() {
            handle.cancel.cancel();
        }
    }

    pub fn game(&self) -> &SnakeGame {
        &self.game
    }

    pub fn game_mut(&mut self) -> &mut SnakeGame {
        &mut self.game
    }

    pub fn is_connected(&self, peer: SocketAddr) -> bool {
        self.peers.contains_key(&peer)
    }

    pub fn is_ready(&self, peer: SocketAddr) -> bool {
        self.peers.get(&peer).map_or(false, |handle| handle.ready)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn restart_at(&self) -> Option<Instant> {
        self.restart_at
    }
}
