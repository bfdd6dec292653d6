use crate::game::ClientGameState;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::framing::{read_envelope, write_envelope, FramingError};
use shared::{
    events, split_identifier, Board, ClientEvent, Direction, DirectionUpdate, Envelope,
    JoinRequest, NameChange, ProtocolError, ServerEvent,
};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

/// How long `join` waits for each server reply
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("expected `{expected}`, got `{received}`")]
    UnexpectedEvent { expected: String, received: String },
    #[error("asked to join as `{requested}`, server assigned `{assigned}`")]
    InvalidIdentifier { requested: String, assigned: String },
    #[error("no event within {0:?}")]
    Timeout(Duration),
    #[error("connection closed")]
    Closed,
}

impl ClientError {
    /// True when the server has closed or reset the connection
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ClientError::Closed
                | ClientError::Framing(FramingError::ConnectionClosed)
                | ClientError::Framing(FramingError::Io(_))
        )
    }
}

/// Headless protocol client. Inbound frames are read by a background task,
/// so a timed-out receive never tears a frame.
pub struct Client {
    writer: OwnedWriteHalf,
    inbound: mpsc::UnboundedReceiver<Result<Envelope, FramingError>>,
    local_addr: SocketAddr,
    game_state: ClientGameState,
    fake_ping_ms: u64,
}

impl Client {
    pub async fn connect(server_addr: &str, board: Board) -> Result<Self, ClientError> {
        info!("Connecting to {}...", server_addr);
        let stream = TcpStream::connect(server_addr).await?;
        stream.set_nodelay(true)?;
        let local_addr = stream.local_addr()?;
        let (reader, writer) = stream.into_split();

        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        spawn_receiver(reader, inbound_tx);

        Ok(Client {
            writer,
            inbound,
            local_addr,
            game_state: ClientGameState::new(board),
            fake_ping_ms: 0,
        })
    }

    /// Delays every outgoing event by `ms` milliseconds.
    pub fn set_fake_ping(&mut self, ms: u64) {
        self.fake_ping_ms = ms;
    }

    pub async fn send(&mut self, event: &ClientEvent) -> Result<(), ClientError> {
        let envelope = event.to_envelope()?;
        self.send_envelope(&envelope).await
    }

    /// Sends a raw envelope, including ones the server does not know.
    pub async fn send_envelope(&mut self, envelope: &Envelope) -> Result<(), ClientError> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms)).await;
        }
        write_envelope(&mut self.writer, envelope).await?;
        Ok(())
    }

    /// Waits for the next server event and applies it to the mirrored state.
    pub async fn recv(&mut self) -> Result<ServerEvent, ClientError> {
        let envelope = match self.inbound.recv().await {
            Some(Ok(envelope)) => envelope,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(ClientError::Closed),
        };
        let event = ServerEvent::from_envelope(&envelope)?;
        self.game_state.apply_event(&event);
        Ok(event)
    }

    pub async fn recv_timeout(&mut self, duration: Duration) -> Result<ServerEvent, ClientError> {
        timeout(duration, self.recv())
            .await
            .map_err(|_| ClientError::Timeout(duration))?
    }

    /// Skips events until one named `command` arrives.
    pub async fn expect_event(
        &mut self,
        command: &str,
        duration: Duration,
    ) -> Result<ServerEvent, ClientError> {
        let wait = async {
            loop {
                let event = self.recv().await?;
                if event.command() == command {
                    return Ok::<_, ClientError>(event);
                }
                debug!("Skipping `{}` while waiting for `{}`", event.command(), command);
            }
        };
        timeout(duration, wait)
            .await
            .map_err(|_| ClientError::Timeout(duration))?
    }

    /// Sends `join` and returns the identifier from `join_response`, which
    /// must be `name` plus a discriminator.
    pub async fn request_join(&mut self, name: &str) -> Result<String, ClientError> {
        self.send(&ClientEvent::Join(JoinRequest {
            name: name.to_string(),
        }))
        .await?;

        match self.recv_timeout(JOIN_TIMEOUT).await? {
            ServerEvent::JoinResponse(response) => {
                let own_name = split_identifier(&response.username)
                    .map_or(false, |(base, _)| base == name);
                if own_name {
                    Ok(response.username)
                } else {
                    Err(ClientError::InvalidIdentifier {
                        requested: name.to_string(),
                        assigned: response.username,
                    })
                }
            }
            other => Err(ClientError::UnexpectedEvent {
                expected: events::JOIN_RESPONSE.to_string(),
                received: other.command().to_string(),
            }),
        }
    }

    /// Confirms the assigned identifier with `name_change`.
    pub async fn confirm_identifier(&mut self, old_name: &str) -> Result<(), ClientError> {
        let new_name = self
            .identifier()
            .map(str::to_string)
            .ok_or_else(|| ClientError::UnexpectedEvent {
                expected: events::JOIN_RESPONSE.to_string(),
                received: "nothing".to_string(),
            })?;
        self.send(&ClientEvent::NameChange(NameChange {
            old_name: old_name.to_string(),
            new_name,
        }))
        .await
    }

    pub async fn ready(&mut self) -> Result<(), ClientError> {
        self.send(&ClientEvent::ReadyForEvents).await
    }

    /// Runs the whole join handshake and returns the assigned identifier.
    pub async fn join(&mut self, name: &str) -> Result<String, ClientError> {
        let identifier = self.request_join(name).await?;
        self.confirm_identifier(name).await?;
        self.ready().await?;
        info!("Handshake sent for {}", identifier);
        Ok(identifier)
    }

    pub async fn send_direction(&mut self, direction: Direction) -> Result<(), ClientError> {
        self.send(&ClientEvent::Update(DirectionUpdate { direction }))
            .await
    }

    pub async fn leave(&mut self) -> Result<(), ClientError> {
        self.send(&ClientEvent::Leave).await
    }

    /// Plays with the greedy bot until `rounds` game overs were seen
    /// (forever when `None`) or the connection drops.
    pub async fn run_bot(&mut self, rounds: Option<u32>) -> Result<(), ClientError> {
        let mut rng = StdRng::from_entropy();
        let mut last_sent: Option<Direction> = None;
        let mut finished = 0;

        loop {
            match self.recv().await? {
                ServerEvent::Update(_) => {
                    let Some(direction) = self.game_state.choose_direction(&mut rng) else {
                        continue;
                    };
                    let current = self.game_state.own_snake().map(|s| s.direction);
                    if Some(direction) != current && Some(direction) != last_sent {
                        debug!("Turning {}", direction);
                        self.send_direction(direction).await?;
                        last_sent = Some(direction);
                    }
                }
                ServerEvent::GameStarted(_) => last_sent = None,
                ServerEvent::GameOver(_) => {
                    finished += 1;
                    if rounds.map_or(false, |limit| finished >= limit) {
                        info!("Played {} rounds, leaving", finished);
                        return self.leave().await;
                    }
                }
                ServerEvent::ClientDisconnect(_) => warn!("Opponent left, waiting for a new one"),
                _ => {}
            }
        }
    }

    pub fn identifier(&self) -> Option<&str> {
        self.game_state.identifier()
    }

    pub fn game_state(&self) -> &ClientGameState {
        &self.game_state
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Spawns task that continuously reads frames from the server
fn spawn_receiver(
    mut reader: OwnedReadHalf,
    inbound_tx: mpsc::UnboundedSender<Result<Envelope, FramingError>>,
) {
    tokio::spawn(async move {
        loop {
            let received = read_envelope(&mut reader).await;
            let stop = received.is_err();
            if inbound_tx.send(received).is_err() || stop {
                break;
            }
        }
    });
}
