//! Bounded-time identifier confirmation and readiness waits.
//!
//! After a successful `join`, every peer gets one handshake task. The task
//! never touches game state: it only watches the signals the main loop
//! forwards to it and reports the outcome back as a [`ServerMessage`].

use crate::error::HandshakeError;
use crate::network::ServerMessage;
use log::{debug, error};
use shared::NameChange;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

/// Signals capacity per peer; a well-behaved client sends two.
const SIGNAL_BUFFER: usize = 8;

/// Handshake-relevant events, forwarded by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeSignal {
    NameChange(NameChange),
    Ready,
}

#[derive(Debug, Clone, Copy)]
pub struct HandshakeTimeouts {
    pub confirm: Duration,
    pub ready: Duration,
}

enum WaitError {
    Elapsed,
    Cancelled,
    Closed,
}

async fn next_signal(
    signals: &mut mpsc::Receiver<HandshakeSignal>,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<HandshakeSignal, WaitError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(WaitError::Cancelled),
        received = timeout_at(deadline, signals.recv()) => match received {
            Ok(Some(signal)) => Ok(signal),
            Ok(None) => Err(WaitError::Closed),
            Err(_) => Err(WaitError::Elapsed),
        },
    }
}

/// Waits for `name_change` confirming `identifier`, then for `ready_for_events`.
///
/// Each stage has its own deadline. A ready signal that arrives before the
/// confirmation is remembered and completes the second stage immediately.
pub async fn run_handshake(
    identifier: &str,
    signals: &mut mpsc::Receiver<HandshakeSignal>,
    timeouts: HandshakeTimeouts,
    cancel: &CancellationToken,
) -> Result<(), HandshakeError> {
    let mut ready = false;

    let deadline = Instant::now() + timeouts.confirm;
    loop {
        match next_signal(signals, deadline, cancel).await {
            Ok(HandshakeSignal::Ready) => {
                debug!("{} sent ready before confirming its identifier", identifier);
                ready = true;
            }
            Ok(HandshakeSignal::NameChange(change)) => {
                if change.new_name != identifier {
                    return Err(HandshakeError::IdentifierMismatch {
                        expected: identifier.to_string(),
                        received: change.new_name,
                    });
                }
                debug!("{} confirmed its identifier", identifier);
                break;
            }
            Err(WaitError::Elapsed) => return Err(HandshakeError::ConfirmTimeout(timeouts.confirm)),
            Err(WaitError::Cancelled) => return Err(HandshakeError::Cancelled),
            Err(WaitError::Closed) => return Err(HandshakeError::ChannelClosed),
        }
    }

    let deadline = Instant::now() + timeouts.ready;
    while !ready {
        match next_signal(signals, deadline, cancel).await {
            Ok(HandshakeSignal::Ready) => ready = true,
            // Repeated confirmations are harmless
            Ok(HandshakeSignal::NameChange(_)) => {}
            Err(WaitError::Elapsed) => return Err(HandshakeError::ReadyTimeout(timeouts.ready)),
            Err(WaitError::Cancelled) => return Err(HandshakeError::Cancelled),
            Err(WaitError::Closed) => return Err(HandshakeError::ChannelClosed),
        }
    }
    Ok(())
}

/// Spawns the handshake task for `peer` and returns the sender its signals
/// should be forwarded to. The outcome arrives as `HandshakeFinished`.
pub fn spawn_handshake(
    peer: SocketAddr,
    identifier: String,
    timeouts: HandshakeTimeouts,
    cancel: CancellationToken,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) -> mpsc::Sender<HandshakeSignal> {
    let (signal_tx, mut signal_rx) = mpsc::channel(SIGNAL_BUFFER);

    tokio::spawn(async move {
        let result = run_handshake(&identifier, &mut signal_rx, timeouts, &cancel).await;
        if let Err(e) = server_tx.send(ServerMessage::HandshakeFinished { peer, result }) {
            error!("Failed to report handshake result for {}: {}", peer, e);
        }
    });

    signal_tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok, assert_pending, assert_ready};

    const SHORT: Duration = Duration::from_millis(50);
    const LONG: Duration = Duration::from_secs(5);

    fn timeouts(confirm: Duration, ready: Duration) -> HandshakeTimeouts {
        HandshakeTimeouts { confirm, ready }
    }

    fn confirm(identifier: &str) -> HandshakeSignal {
        HandshakeSignal::NameChange(NameChange {
            old_name: "alice".to_string(),
            new_name: identifier.to_string(),
        })
    }

    #[tokio::test]
    async fn test_handshake_completes() {
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        tx.send(confirm("alice#1234")).await.unwrap();
        tx.send(HandshakeSignal::Ready).await.unwrap();

        let result = run_handshake("alice#1234", &mut rx, timeouts(LONG, LONG), &cancel).await;
        assert_ok!(result);
    }

    #[tokio::test]
    async fn test_handshake_waits_for_signals() {
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let mut task = tokio_test::task::spawn(async move {
            run_handshake("alice#1234", &mut rx, timeouts(LONG, LONG), &cancel).await
        });

        assert_pending!(task.poll());

        tx.send(confirm("alice#1234")).await.unwrap();
        assert!(task.is_woken());
        assert_pending!(task.poll());

        tx.send(HandshakeSignal::Ready).await.unwrap();
        assert!(task.is_woken());
        let result = assert_ready!(task.poll());
        assert_ok!(result);
    }

    #[tokio::test]
    async fn test_identifier_mismatch() {
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        tx.send(confirm("alice#9999")).await.unwrap();

        let result = run_handshake("alice#1234", &mut rx, timeouts(LONG, LONG), &cancel).await;
        assert_eq!(
            result,
            Err(HandshakeError::IdentifierMismatch {
                expected: "alice#1234".to_string(),
                received: "alice#9999".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_confirm_timeout() {
        let (_tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        let result = run_handshake("alice#1234", &mut rx, timeouts(SHORT, LONG), &cancel).await;
        assert_eq!(result, Err(HandshakeError::ConfirmTimeout(SHORT)));
    }

    #[tokio::test]
    async fn test_ready_timeout() {
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        tx.send(confirm("alice#1234")).await.unwrap();

        let result = run_handshake("alice#1234", &mut rx, timeouts(LONG, SHORT), &cancel).await;
        assert_eq!(result, Err(HandshakeError::ReadyTimeout(SHORT)));
    }

    #[tokio::test]
    async fn test_early_ready_is_remembered() {
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        tx.send(HandshakeSignal::Ready).await.unwrap();
        tx.send(confirm("alice#1234")).await.unwrap();

        // The ready stage would time out if the early signal were lost
        let result = run_handshake("alice#1234", &mut rx, timeouts(LONG, SHORT), &cancel).await;
        assert_ok!(result);
    }

    #[tokio::test]
    async fn test_cancelled() {
        let (_tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_handshake("alice#1234", &mut rx, timeouts(LONG, LONG), &cancel).await;
        assert_eq!(result, Err(HandshakeError::Cancelled));
    }

    #[tokio::test]
    async fn test_channel_closed() {
        let (tx, mut rx) = mpsc::channel::<HandshakeSignal>(4);
        let cancel = CancellationToken::new();
        drop(tx);

        let result = run_handshake("alice#1234", &mut rx, timeouts(LONG, LONG), &cancel).await;
        assert_err!(result);
    }

    #[tokio::test]
    async fn test_spawned_handshake_reports_result() {
        let (server_tx, mut server_rx) = mpsc::unbounded_channel();
        let peer: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let cancel = CancellationToken::new();

        let signals = spawn_handshake(
            peer,
            "alice#1234".to_string(),
            timeouts(LONG, LONG),
            cancel.child_token(),
            server_tx,
        );
        signals.send(confirm("alice#1234")).await.unwrap();
        signals.send(HandshakeSignal::Ready).await.unwrap();

        match server_rx.recv().await {
            Some(ServerMessage::HandshakeFinished { peer: finished, result }) => {
                assert_eq!(finished, peer);
                assert_ok!(result);
            }
            other => panic!("Expected HandshakeFinished, got {:?}", other),
        }
    }
}
