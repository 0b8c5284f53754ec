use clap::Parser;
use log::{error, info};
use server::config::{Scene, ServerConfig};
use server::network::Server;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Authoritative server for a two-player Pong match
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: IpAddr,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Tick rate (updates per second)
    #[clap(short, long, default_value = "60")]
    tick_rate: u32,
    /// Scene width in pixels
    #[clap(long, default_value = "800")]
    width: f32,
    /// Scene height in pixels
    #[clap(long, default_value = "600")]
    height: f32,
    /// Countdown between all players ready and the first serve, in milliseconds
    #[clap(long, default_value = "3000")]
    countdown_ms: u64,
    /// Pause after a point before play resumes, in milliseconds
    #[clap(long, default_value = "1000")]
    pause_ms: u64,
    /// Broadcast the full match state to controllers every tick
    #[clap(long)]
    sync_state: bool,
    /// Seed for serve directions
    #[clap(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = ServerConfig {
        bind_addr: SocketAddr::new(args.host, args.port),
        tick_rate: args.tick_rate,
        scene: Scene::new(args.width, args.height),
        countdown: Duration::from_millis(args.countdown_ms),
        score_pause: Duration::from_millis(args.pause_ms),
        sync_state: args.sync_state,
        seed: args.seed,
        ..Default::default()
    };

    let handle = match Server::start(config).await {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start server: {}", e);
            return Err(e.into());
        }
    };
    info!(
        "Pong server on {} ({}x{} scene, {}Hz)",
        handle.local_addr(),
        args.width,
        args.height,
        args.tick_rate
    );

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down gracefully...");
    handle.shutdown().await;

    Ok(())
}
