//! Server network layer: TCP accept loop, per-connection tasks and the main
//! loop that owns all game state

use crate::config::ServerConfig;
use crate::context::{PeerHandle, ServerContext};
use crate::dispatch::Dispatcher;
use crate::error::{GameError, HandlerError, HandshakeError, ServerError};
use log::{debug, error, info, warn};
use shared::framing::{read_envelope, write_envelope, FramingError};
use shared::Envelope;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Outbound envelopes queued per peer before it is closed as too slow
const OUTBOUND_BUFFER: usize = 256;

/// Messages sent from network and handshake tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PeerConnected {
        peer: SocketAddr,
        outbound: mpsc::Sender<Envelope>,
        cancel: CancellationToken,
    },
    EventReceived {
        peer: SocketAddr,
        envelope: Envelope,
    },
    PeerClosed {
        peer: SocketAddr,
    },
    HandshakeFinished {
        peer: SocketAddr,
        result: Result<(), HandshakeError>,
    },
    Shutdown,
}

/// Cloneable handle for stopping a running server
#[derive(Debug, Clone)]
pub struct ServerHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        if self.server_tx.send(ServerMessage::Shutdown).is_err() {
            debug!("Server already stopped");
        }
    }
}

/// Main server coordinating connections and game simulation
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    poll_interval: std::time::Duration,
    context: ServerContext,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    /// Validates the configuration and binds the listener. Both failures are fatal.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let board = config.board()?;

        let address = config.address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::Bind {
                addr: address.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!(
            "Server listening on {} ({}x{} cells, tick {:?})",
            local_addr, board.width, board.height, config.tick_interval
        );

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let poll_interval = config.poll_interval;
        let context = ServerContext::new(config, board, server_tx.clone());

        Ok(Server {
            listener: Some(listener),
            local_addr,
            poll_interval,
            context,
            dispatcher: Dispatcher::with_default_handlers(),
            shutdown: CancellationToken::new(),
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    /// Runs until a shutdown message arrives.
    pub async fn run(mut self) -> Result<(), ServerError> {
        if let Some(listener) = self.listener.take() {
            spawn_acceptor(listener, self.server_tx.clone(), self.shutdown.clone());
        }

        let mut poll = interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server main loop started");
        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::Shutdown) | None => break,
                        Some(message) => self.handle_message(message),
                    }
                }
                _ = poll.tick() => {
                    self.context.poll(Instant::now());
                }
            }
        }

        info!("Server shutting down");
        self.shutdown.cancel();
        self.context.shutdown();
        Ok(())
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::PeerConnected {
                peer,
                outbound,
                cancel,
            } => {
                if !self
                    .context
                    .register_peer(peer, PeerHandle::new(outbound, cancel))
                {
                    debug!("Connection from {} refused", peer);
                }
            }
            ServerMessage::EventReceived { peer, envelope } => {
                if !self.context.is_connected(peer) {
                    debug!("Dropping `{}` from closed peer {}", envelope.command, peer);
                    return;
                }
                if let Err(e) = self.dispatcher.dispatch(&mut self.context, peer, &envelope) {
                    self.handle_error(peer, e);
                }
            }
            ServerMessage::PeerClosed { peer } => {
                if self.context.is_connected(peer) {
                    self.context.disconnect(peer, "connection closed");
                }
            }
            ServerMessage::HandshakeFinished { peer, result } => {
                self.context.complete_handshake(peer, result, Instant::now());
            }
            ServerMessage::Shutdown => {}
        }
    }

    /// Decides what happens to a peer whose event could not be handled.
    fn handle_error(&mut self, peer: SocketAddr, error: HandlerError) {
        match error {
            HandlerError::Rejected(e) => {
                info!("Rejected join from {}: {}", peer, e);
                self.context.disconnect(peer, "join rejected");
            }
            HandlerError::Protocol(e) => {
                warn!("Protocol violation from {}: {}", peer, e);
                self.context.disconnect(peer, "protocol violation");
            }
            HandlerError::Handshake(e) => {
                warn!("Handshake violation from {}: {}", peer, e);
                self.context.disconnect(peer, "handshake violation");
            }
            HandlerError::Game(GameError::UnknownPlayer(peer)) => {
                debug!("Ignoring event from {} without a ready session", peer);
            }
            HandlerError::Game(e) => warn!("Game error for {}: {}", peer, e),
        }
    }
}

/// Spawns the task accepting connections until `shutdown` fires
fn spawn_acceptor(
    listener: TcpListener,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = accept_peer(stream, peer, &server_tx, &shutdown) {
                            error!("Failed to set up connection from {}: {}", peer, e);
                        }
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                    }
                }
            }
        }
        debug!("Acceptor stopped");
    });
}

fn accept_peer(
    stream: TcpStream,
    peer: SocketAddr,
    server_tx: &mpsc::UnboundedSender<ServerMessage>,
    shutdown: &CancellationToken,
) -> Result<(), ServerError> {
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let cancel = shutdown.child_token();

    // Registration is queued ahead of anything the reader forwards
    if server_tx
        .send(ServerMessage::PeerConnected {
            peer,
            outbound: outbound_tx,
            cancel: cancel.clone(),
        })
        .is_err()
    {
        return Ok(());
    }

    spawn_reader(peer, reader, server_tx.clone(), cancel.clone());
    spawn_writer(peer, writer, outbound_rx, cancel);
    Ok(())
}

/// Spawns the task decoding inbound envelopes for one peer
fn spawn_reader(
    peer: SocketAddr,
    mut reader: OwnedReadHalf,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = read_envelope(&mut reader) => received,
            };

            match received {
                Ok(envelope) => {
                    if server_tx
                        .send(ServerMessage::EventReceived { peer, envelope })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(FramingError::ConnectionClosed) => {
                    debug!("{} closed the connection", peer);
                    break;
                }
                Err(e) => {
                    warn!("Dropping connection to {}: {}", peer, e);
                    break;
                }
            }
        }

        let _ = server_tx.send(ServerMessage::PeerClosed { peer });
    });
}

/// Spawns the task writing queued envelopes to one peer
fn spawn_writer(
    peer: SocketAddr,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Envelope>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let envelope = tokio::select! {
                _ = cancel.cancelled() => break,
                envelope = outbound.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            if let Err(e) = write_envelope(&mut writer, &envelope).await {
                warn!("Failed to send `{}` to {}: {}", envelope.command, peer, e);
                cancel.cancel();
                break;
            }
        }
        debug!("Writer for {} stopped", peer);
    });
}
