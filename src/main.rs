use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use polymarket_setbot::config::Config;
use polymarket_setbot::engine::runner::Engine;

/// Complete-set maker bot for Polymarket up/down markets.
///
/// Paper mode by default; --live requires POLYMARKET_PRIVATE_KEY.
#[derive(Parser)]
#[command(name = "bot")]
struct Args {
    /// Enable live trading (default: paper mode)
    #[arg(long)]
    live: bool,

    /// Path to .env file
    #[arg(long, default_value = ".env")]
    env: String,

    /// Override minimum edge in cents
    #[arg(long)]
    min_edge: Option<f64>,

    /// Override default position size
    #[arg(long)]
    size: Option<f64>,

    /// Override max open sets
    #[arg(long)]
    max_sets: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let _ = dotenvy::from_path(&args.env);
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = Config::from_env();
    config.live = args.live;
    if let Some(min_edge) = args.min_edge {
        config.min_edge_cents = min_edge;
    }
    if let Some(size) = args.size {
        config.default_size = size;
    }
    if let Some(max_sets) = args.max_sets {
        config.max_open_sets = max_sets;
    }

    let mode = if config.live { "LIVE" } else { "PAPER" };
    eprintln!("╔══════════════════════════════════════════════════╗");
    eprintln!("║  Complete-Set Maker Bot — {} MODE", mode);
    eprintln!(
        "║  Min edge: {:.1}¢ | Size: {:.1} | Max sets: {}",
        config.min_edge_cents, config.default_size, config.max_open_sets
    );
    eprintln!("║  Trade log: {}", config.trade_log_file);
    eprintln!("╚══════════════════════════════════════════════════╝");

    if config.live && config.private_key.is_empty() {
        error!("Live mode requires POLYMARKET_PRIVATE_KEY in .env");
        std::process::exit(1);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let engine = match Engine::new(config, shutdown_rx).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to start engine: {}", e);
            std::process::exit(1);
        }
    };

    // Graceful shutdown on Ctrl+C: loops finish their current iteration,
    // resting orders get cancelled, the tracker persists
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    });

    engine.run().await;
}
