//! Integration tests for the snake server and client
//!
//! These tests run a real server on an ephemeral port and drive it with
//! headless clients over TCP.

use client::network::{Client, ClientError};
use server::config::ServerConfig;
use server::network::{Server, ServerHandle};
use shared::{events, Board, Direction, Envelope, ServerEvent};
use std::net::SocketAddr;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        tick_interval: Duration::from_millis(50),
        restart_delay: Duration::ZERO,
        ..ServerConfig::default()
    }
}

async fn start_server(config: ServerConfig) -> (SocketAddr, ServerHandle) {
    let server = Server::bind(config).await.expect("Failed to bind server");
    let addr = server.local_addr();
    let handle = server.handle();
    tokio::spawn(server.run());
    (addr, handle)
}

async fn connect(addr: SocketAddr) -> Client {
    Client::connect(&addr.to_string(), Board::default())
        .await
        .expect("Failed to connect")
}

async fn joined(addr: SocketAddr, name: &str) -> (Client, String) {
    let mut client = connect(addr).await;
    let identifier = client.join(name).await.expect("Join failed");
    (client, identifier)
}

/// Reads events until the server closes the connection. Returns the commands
/// seen before the close, or `None` if the connection stayed open.
async fn wait_for_disconnect(client: &mut Client, within: Duration) -> Option<Vec<String>> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match client.recv_timeout(remaining).await {
            Ok(event) => seen.push(event.command().to_string()),
            Err(e) if e.is_disconnect() => return Some(seen),
            Err(ClientError::Timeout(_)) => return None,
            Err(e) => panic!("Unexpected client error: {}", e),
        }
    }
}

/// HANDSHAKE AND ROUND START
mod session_tests {
    use super::*;

    /// Tests that two completed handshakes start round one with both snakes
    #[tokio::test]
    async fn two_players_start_round() {
        let (addr, handle) = start_server(test_config()).await;

        let (mut alice, alice_id) = joined(addr, "alice").await;
        assert!(alice_id.starts_with("alice#"));
        let roster = match alice.expect_event(events::PLAYER_CONNECT, WAIT).await.unwrap() {
            ServerEvent::PlayerConnect(roster) => roster,
            other => panic!("Expected player_connect, got {:?}", other),
        };
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].identifier, alice_id);

        let (mut bob, bob_id) = joined(addr, "bob").await;
        assert_ne!(alice_id, bob_id);

        for client in [&mut alice, &mut bob] {
            match client.expect_event(events::GAME_STARTED, WAIT).await.unwrap() {
                ServerEvent::GameStarted(started) => {
                    assert_eq!(started.players.len(), 2);
                    assert_eq!(started.players[&alice_id], Direction::Right);
                    assert_eq!(started.players[&bob_id], Direction::Left);
                    assert_eq!(started.round, 1);
                }
                other => panic!("Expected game_started, got {:?}", other),
            }
        }

        // Snapshots follow at the tick rate
        match alice.expect_event(events::UPDATE, WAIT).await.unwrap() {
            ServerEvent::Update(update) => {
                assert_eq!(update.players.len(), 2);
                assert_eq!(update.foods.len(), 2);
            }
            other => panic!("Expected update, got {:?}", other),
        }

        handle.shutdown();
    }

    /// Tests that a join into a full room closes the connection without a reply
    #[tokio::test]
    async fn third_player_is_rejected() {
        let (addr, handle) = start_server(test_config()).await;
        let (mut alice, _) = joined(addr, "alice").await;
        let (_bob, _) = joined(addr, "bob").await;
        alice.expect_event(events::GAME_STARTED, WAIT).await.unwrap();

        let mut carol = connect(addr).await;
        carol
            .send(&shared::ClientEvent::Join(shared::JoinRequest {
                name: "carol".to_string(),
            }))
            .await
            .unwrap();

        let seen = wait_for_disconnect(&mut carol, WAIT).await;
        assert_eq!(seen, Some(Vec::new()));

        // The running round is unaffected
        alice.expect_event(events::UPDATE, WAIT).await.unwrap();
        handle.shutdown();
    }

    /// Tests that a name breaking the username policy is refused
    #[tokio::test]
    async fn invalid_name_is_rejected() {
        let (addr, handle) = start_server(test_config()).await;
        let mut client = connect(addr).await;

        let result = client.request_join("x#").await;
        assert!(matches!(result, Err(ref e) if e.is_disconnect()), "{:?}", result.err());
        handle.shutdown();
    }

    /// Tests that confirming the wrong identifier kicks the peer
    #[tokio::test]
    async fn identifier_mismatch_is_kicked() {
        let (addr, handle) = start_server(test_config()).await;
        let mut client = connect(addr).await;
        client.request_join("alice").await.unwrap();

        client
            .send(&shared::ClientEvent::NameChange(shared::NameChange {
                old_name: "alice".to_string(),
                new_name: "alice#0000x".to_string(),
            }))
            .await
            .unwrap();

        assert!(wait_for_disconnect(&mut client, WAIT).await.is_some());
        handle.shutdown();
    }

    /// Tests that a confirmed peer without `ready_for_events` is kicked
    #[tokio::test]
    async fn missing_ready_signal_times_out() {
        let config = ServerConfig {
            ready_timeout: Duration::from_millis(200),
            ..test_config()
        };
        let (addr, handle) = start_server(config).await;
        let mut client = connect(addr).await;
        client.request_join("alice").await.unwrap();
        client.confirm_identifier("alice").await.unwrap();

        let seen = wait_for_disconnect(&mut client, WAIT).await;
        assert_eq!(seen, Some(Vec::new()));
        handle.shutdown();
    }

    /// Tests that a connection which never sends `join` is closed
    #[tokio::test]
    async fn idle_connection_is_closed() {
        let config = ServerConfig {
            confirm_timeout: Duration::from_millis(200),
            ..test_config()
        };
        let (addr, handle) = start_server(config).await;
        let mut client = connect(addr).await;

        let seen = wait_for_disconnect(&mut client, WAIT).await;
        assert_eq!(seen, Some(Vec::new()));
        handle.shutdown();
    }

    /// Tests that a joined peer that never confirms is kicked
    #[tokio::test]
    async fn missing_confirmation_times_out() {
        let config = ServerConfig {
            confirm_timeout: Duration::from_millis(200),
            ..test_config()
        };
        let (addr, handle) = start_server(config).await;
        let mut client = connect(addr).await;
        client.request_join("alice").await.unwrap();
        client.ready().await.unwrap();

        assert!(wait_for_disconnect(&mut client, WAIT).await.is_some());
        handle.shutdown();
    }
}

/// LEAVING AND DISCONNECTS
mod disconnect_tests {
    use super::*;

    /// Tests that `leave` is announced to the remaining player
    #[tokio::test]
    async fn leave_notifies_opponent() {
        let (addr, handle) = start_server(test_config()).await;
        let (mut alice, _) = joined(addr, "alice").await;
        let (mut bob, bob_id) = joined(addr, "bob").await;
        alice.expect_event(events::GAME_STARTED, WAIT).await.unwrap();

        bob.leave().await.unwrap();

        match alice.expect_event(events::CLIENT_DISCONNECT, WAIT).await.unwrap() {
            ServerEvent::ClientDisconnect(disconnect) => assert_eq!(disconnect.identifier, bob_id),
            other => panic!("Expected client_disconnect, got {:?}", other),
        }
        assert!(wait_for_disconnect(&mut bob, WAIT).await.is_some());
        handle.shutdown();
    }

    /// Tests that a dropped socket is treated like a leave
    #[tokio::test]
    async fn dropped_connection_notifies_opponent() {
        let (addr, handle) = start_server(test_config()).await;
        let (mut alice, _) = joined(addr, "alice").await;
        let (bob, bob_id) = joined(addr, "bob").await;
        alice.expect_event(events::GAME_STARTED, WAIT).await.unwrap();

        drop(bob);

        match alice.expect_event(events::CLIENT_DISCONNECT, WAIT).await.unwrap() {
            ServerEvent::ClientDisconnect(disconnect) => assert_eq!(disconnect.identifier, bob_id),
            other => panic!("Expected client_disconnect, got {:?}", other),
        }
        handle.shutdown();
    }

    /// Tests that a new opponent takes the free slot and starts the next round
    #[tokio::test]
    async fn replacement_player_restarts_round() {
        let (addr, handle) = start_server(test_config()).await;
        let (mut alice, _) = joined(addr, "alice").await;
        let (mut bob, _) = joined(addr, "bob").await;
        alice.expect_event(events::GAME_STARTED, WAIT).await.unwrap();
        bob.leave().await.unwrap();
        alice.expect_event(events::CLIENT_DISCONNECT, WAIT).await.unwrap();

        let (_carol, carol_id) = joined(addr, "carol").await;
        match alice.expect_event(events::GAME_STARTED, WAIT).await.unwrap() {
            ServerEvent::GameStarted(started) => {
                assert!(started.players.contains_key(&carol_id));
                assert_eq!(started.players[&carol_id], Direction::Left);
                assert_eq!(started.round, 2);
            }
            other => panic!("Expected game_started, got {:?}", other),
        }
        handle.shutdown();
    }
}

/// EVENT HANDLING DURING PLAY
mod gameplay_tests {
    use super::*;

    fn solo_config() -> ServerConfig {
        ServerConfig {
            max_players: 1,
            ..test_config()
        }
    }

    /// Tests that unknown commands are ignored while the round keeps ticking
    #[tokio::test]
    async fn unknown_event_is_ignored() {
        let (addr, handle) = start_server(solo_config()).await;
        let (mut alice, _) = joined(addr, "alice").await;
        alice.expect_event(events::GAME_STARTED, WAIT).await.unwrap();

        alice
            .send_envelope(&Envelope {
                command: "request_data".to_string(),
                payload: vec![1, 2, 3],
            })
            .await
            .unwrap();

        let frame = alice.game_state().frame();
        match alice.expect_event(events::UPDATE, WAIT).await.unwrap() {
            ServerEvent::Update(update) => assert!(update.frame > frame),
            other => panic!("Expected update, got {:?}", other),
        }
        handle.shutdown();
    }

    /// Tests that an undecodable direction update is a protocol violation
    #[tokio::test]
    async fn malformed_update_kicks_peer() {
        let (addr, handle) = start_server(solo_config()).await;
        let (mut alice, _) = joined(addr, "alice").await;
        alice.expect_event(events::GAME_STARTED, WAIT).await.unwrap();

        alice
            .send_envelope(&Envelope {
                command: events::UPDATE.to_string(),
                payload: vec![0xFF; 6],
            })
            .await
            .unwrap();

        assert!(wait_for_disconnect(&mut alice, WAIT).await.is_some());
        handle.shutdown();
    }

    /// Tests that a direction update shows up in a later snapshot
    #[tokio::test]
    async fn direction_update_is_applied() {
        let (addr, handle) = start_server(solo_config()).await;
        let (mut alice, alice_id) = joined(addr, "alice").await;
        alice.expect_event(events::GAME_STARTED, WAIT).await.unwrap();

        alice.send_direction(Direction::Down).await.unwrap();

        let turned = tokio::time::timeout(WAIT, async {
            loop {
                if let ServerEvent::Update(update) = alice.recv().await.unwrap() {
                    if update.players[&alice_id].direction == Direction::Down {
                        return update;
                    }
                }
            }
        })
        .await
        .expect("Direction never changed");

        let snake = &turned.players[&alice_id];
        assert_eq!(snake.tail[0], snake.position);
        handle.shutdown();
    }

    /// Tests that leaving the board ends the round with a single game over
    #[tokio::test]
    async fn out_of_bounds_ends_round_once() {
        let (addr, handle) = start_server(solo_config()).await;
        let (mut alice, alice_id) = joined(addr, "alice").await;
        alice.expect_event(events::GAME_STARTED, WAIT).await.unwrap();

        // Spawned at y = 14, so heading up leaves the board within 15 ticks
        alice.send_direction(Direction::Up).await.unwrap();

        let cause = match alice.expect_event(events::GAME_OVER, WAIT).await.unwrap() {
            ServerEvent::GameOver(cause) => cause,
            other => panic!("Expected game_over, got {:?}", other),
        };
        assert_eq!(cause, format!("{} died because out of bounds", alice_id));

        // Restarts are disabled, so nothing else arrives
        match alice.recv_timeout(Duration::from_millis(300)).await {
            Err(ClientError::Timeout(_)) => {}
            other => panic!("Expected silence after game_over, got {:?}", other),
        }
        handle.shutdown();
    }

    /// Tests that the next round starts once the restart delay has passed
    #[tokio::test]
    async fn round_restarts_after_delay() {
        let config = ServerConfig {
            restart_delay: Duration::from_millis(200),
            ..solo_config()
        };
        let (addr, handle) = start_server(config).await;
        let (mut alice, _) = joined(addr, "alice").await;
        alice.expect_event(events::GAME_STARTED, WAIT).await.unwrap();
        alice.send_direction(Direction::Up).await.unwrap();
        alice.expect_event(events::GAME_OVER, WAIT).await.unwrap();

        match alice.expect_event(events::GAME_STARTED, WAIT).await.unwrap() {
            ServerEvent::GameStarted(started) => assert_eq!(started.round, 2),
            other => panic!("Expected game_started, got {:?}", other),
        }
        handle.shutdown();
    }
}
