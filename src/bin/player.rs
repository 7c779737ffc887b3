//! AirCast native player
//!
//! Connects to an AirCast server, jitter-buffers the stream, and plays
//! it on the local output device. Reconnects automatically until
//! stopped.

use anyhow::Result;
use clap::Parser;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aircast::{
    audio::playback::spawn_playback,
    client::{JitterBuffer, PlaybackEngine},
    config::AppConfig,
};

#[derive(Parser, Debug)]
#[command(name = "aircast-player", about = "Play an AirCast audio stream")]
struct Args {
    /// Server WebSocket URL, e.g. ws://192.168.1.10:8765/ws
    url: Option<String>,

    /// Path to a config file (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output device name
    #[arg(short, long)]
    device: Option<String>,

    /// Jitter buffer minimum fill (pre-roll) in milliseconds
    #[arg(long)]
    min_fill_ms: Option<u32>,

    /// Jitter buffer maximum depth in milliseconds
    #[arg(long)]
    max_depth_ms: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(url) = args.url {
        config.player.server_url = url;
    }
    if args.device.is_some() {
        config.player.output_device = args.device;
    }
    if let Some(min_fill) = args.min_fill_ms {
        config.player.min_fill_ms = min_fill;
    }
    if let Some(max_depth) = args.max_depth_ms {
        config.player.max_depth_ms = max_depth;
    }

    tracing::info!(url = %config.player.server_url, "starting AirCast player");

    let jitter = Arc::new(Mutex::new(JitterBuffer::new(
        config.player.min_fill_ms,
        config.player.max_depth_ms,
    )));

    let playback = spawn_playback(config.player.output_device.clone(), jitter.clone());
    let engine = PlaybackEngine::new(config.player.clone(), jitter, Some(playback));

    tokio::select! {
        _ = engine.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("stopping");
        }
    }

    Ok(())
}
