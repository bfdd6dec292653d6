use clap::Parser;
use client::network::Client;
use log::info;
use shared::Board;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:6500")]
    server: String,

    /// Display name; the server appends a discriminator
    #[arg(short = 'n', long, default_value = "snakebot")]
    name: String,

    /// Rounds to play before leaving (0 plays forever)
    #[arg(short = 'r', long, default_value = "0")]
    rounds: u32,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Window width the server was started with
    #[arg(short = 'w', long, default_value = "800")]
    width: u32,

    /// Window height (no short flag to avoid conflict with --help)
    #[arg(long, default_value = "600")]
    height: u32,

    /// Cell size the server was started with
    #[arg(short = 'c', long, default_value = "20")]
    cell_size: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let board = Board::from_window(args.width, args.height, args.cell_size)
        .ok_or("window does not fit a single cell")?;

    info!("Starting snake bot...");
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }

    let mut client = Client::connect(&args.server, board).await?;
    client.set_fake_ping(args.fake_ping);

    let identifier = client.join(&args.name).await?;
    info!("Playing as {}", identifier);

    let rounds = (args.rounds > 0).then_some(args.rounds);
    client.run_bot(rounds).await?;

    Ok(())
}
