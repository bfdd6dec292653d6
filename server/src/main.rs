use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::Server;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "6500")]
    port: u16,

    /// Seconds between simulation ticks
    #[arg(short, long, default_value = "0.1")]
    tick_interval: f64,

    /// Players needed to start a round (1 or 2)
    #[arg(short, long, default_value = "2")]
    max_players: usize,

    /// Open connections accepted at once
    #[arg(long, default_value = "4")]
    max_connections: usize,

    /// Seconds a joining player has to confirm its identifier
    #[arg(long, default_value = "10")]
    confirm_timeout: u64,

    /// Seconds a confirmed player has to signal readiness
    #[arg(long, default_value = "10")]
    ready_timeout: u64,

    /// Window width in pixels
    #[arg(short = 'W', long, default_value = "800")]
    width: u32,

    /// Window height in pixels
    #[arg(long, default_value = "600")]
    height: u32,

    /// Cell size in pixels
    #[arg(short, long, default_value = "20")]
    cell_size: u32,

    /// Food items on the board
    #[arg(short, long, default_value = "2")]
    food: usize,

    /// Seconds before the next round starts after a game over (0 disables)
    #[arg(short, long, default_value = "3")]
    restart_delay: f64,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        Ok(ServerConfig {
            host: self.host,
            port: self.port,
            tick_interval: Duration::try_from_secs_f64(self.tick_interval)?,
            max_players: self.max_players,
            max_connections: self.max_connections,
            confirm_timeout: Duration::from_secs(self.confirm_timeout),
            ready_timeout: Duration::from_secs(self.ready_timeout),
            window_width: self.width,
            window_height: self.height,
            cell_size: self.cell_size,
            food_count: self.food,
            restart_delay: Duration::try_from_secs_f64(self.restart_delay)?,
            ..ServerConfig::default()
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = Args::parse().into_config()?;
    info!("Starting snake server on {}", config.address());

    let server = Server::bind(config).await?;
    let handle = server.handle();
    let server_task = tokio::spawn(server.run());

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server stopped with error: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            handle.shutdown();
        }
    }

    Ok(())
}
