//! Performance benchmarks for hot paths of the snake server

use server::food::FoodSpawner;
use server::game::{GameSettings, SnakeGame};
use shared::framing::{read_envelope, write_envelope, MAX_FRAME_SIZE};
use shared::{Board, Position, ServerEvent};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

fn two_player_game() -> SnakeGame {
    let settings = GameSettings {
        board: Board::default(),
        tick_interval: Duration::from_millis(100),
        food_count: 2,
        max_players: 2,
    };
    let mut game = SnakeGame::with_seed(settings, 1234);
    for (port, name) in [(9001, "alice"), (9002, "bob")] {
        let peer: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        game.join(peer, name).unwrap();
        game.mark_confirmed(peer).unwrap();
        game.mark_ready(peer).unwrap();
    }
    game
}

/// Benchmarks full simulation ticks, restarting rounds as snakes die
#[test]
fn benchmark_tick() {
    let mut game = two_player_game();
    let tick = game.settings().tick_interval;
    let mut events: Vec<ServerEvent> = Vec::new();
    let mut now = Instant::now();

    let iterations = 10_000;
    let mut ticks = 0;
    let start = Instant::now();

    for _ in 0..iterations {
        if !game.is_running() {
            game.start(now, &mut events).unwrap();
        }
        now += tick;
        if game.run(now, &mut events).is_some() {
            ticks += 1;
        }
        events.clear();
    }

    let duration = start.elapsed();
    println!(
        "Game ticks: {} ticks in {:?} ({:.2} μs/tick)",
        ticks,
        duration,
        duration.as_micros() as f64 / ticks as f64
    );

    assert_eq!(ticks, iterations);
    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks encoding the per-tick snapshot into a wire frame
#[test]
fn benchmark_snapshot_encode() {
    let mut game = two_player_game();
    let mut events: Vec<ServerEvent> = Vec::new();
    let now = Instant::now();
    game.start(now, &mut events).unwrap();
    game.run(now + game.settings().tick_interval, &mut events);

    let iterations = 10_000;
    let start = Instant::now();
    let mut size = 0;

    for _ in 0..iterations {
        let envelope = ServerEvent::Update(game.snapshot()).to_envelope().unwrap();
        size = envelope.to_bytes().unwrap().len();
    }

    let duration = start.elapsed();
    println!(
        "Snapshot encode: {} iterations in {:?} ({:.2} μs/iter, {} bytes)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64,
        size
    );

    assert!(size < MAX_FRAME_SIZE);
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks food respawn on a half-occupied board
#[test]
fn benchmark_food_respawn() {
    let board = Board::default();
    let occupied: HashSet<Position> = board.cells().filter(|pos| pos.x < board.width / 2).collect();
    let mut spawner = FoodSpawner::with_seed(board, 2, 99);
    spawner.spawn_all(&occupied);

    let iterations = 10_000;
    let start = Instant::now();

    for i in 0..iterations {
        spawner.respawn(i % 2, &occupied);
    }

    let duration = start.elapsed();
    println!(
        "Food respawn: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    for food in spawner.foods() {
        assert!(!occupied.contains(&food.position));
    }
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks framed envelope transfer over an in-memory stream
#[tokio::test]
async fn benchmark_framing_throughput() {
    let mut game = two_player_game();
    let mut events: Vec<ServerEvent> = Vec::new();
    game.start(Instant::now(), &mut events).unwrap();
    let envelope = ServerEvent::Update(game.snapshot()).to_envelope().unwrap();

    let (mut writer, mut reader) = tokio::io::duplex(MAX_FRAME_SIZE * 4);
    let iterations = 5_000;

    let sent = envelope.clone();
    let write_task = tokio::spawn(async move {
        for _ in 0..iterations {
            write_envelope(&mut writer, &sent).await.unwrap();
        }
    });

    let start = Instant::now();
    for _ in 0..iterations {
        let received = read_envelope(&mut reader).await.unwrap();
        assert_eq!(received.command, envelope.command);
    }
    write_task.await.unwrap();

    let duration = start.elapsed();
    println!(
        "Framing: {} envelopes in {:?} ({:.2} μs/envelope)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}
