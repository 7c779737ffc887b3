//! AirCast server
//!
//! Captures system audio and broadcasts it to every connected client
//! over WebSocket, while serving the browser player page.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aircast::{
    audio::device::list_devices,
    config::AppConfig,
    hub::{run_sweeper, BroadcastHub},
    net::local_ip,
    stream::run_pipeline,
    ui::WebServer,
};

#[derive(Parser, Debug)]
#[command(name = "aircast-server", about = "Stream system audio to LAN clients")]
struct Args {
    /// Path to a config file (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP/WebSocket port
    #[arg(short, long)]
    port: Option<u16>,

    /// Capture device name (substring listing via --list-devices)
    #[arg(short, long)]
    device: Option<String>,

    /// Sample rate in Hz
    #[arg(short, long)]
    rate: Option<u32>,

    /// Channel count
    #[arg(long)]
    channels: Option<u16>,

    /// Chunk duration in milliseconds
    #[arg(long)]
    chunk_ms: Option<u32>,

    /// List audio devices and exit
    #[arg(long)]
    list_devices: bool,
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

    if args.list_devices {
        println!("\n=== Available Audio Devices ===");
        for device in list_devices() {
            let kind = match (device.is_input, device.is_output) {
                (true, true) => "input/output",
                (true, false) => "input",
                (false, true) => "output",
                _ => "unknown",
            };
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            println!("  {} ({kind}){default_marker}", device.name);
            println!("    sample rates: {:?}", device.sample_rates);
            println!("    channels: {:?}", device.channels);
        }
        return Ok(());
    }

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.http_port = port;
    }
    if args.device.is_some() {
        config.capture.device = args.device;
    }
    if let Some(rate) = args.rate {
        config.capture.sample_rate = rate;
    }
    if let Some(channels) = args.channels {
        config.capture.channels = channels;
    }
    if let Some(chunk_ms) = args.chunk_ms {
        config.capture.chunk_ms = chunk_ms;
    }

    tracing::info!("starting AirCast server");

    let hub = Arc::new(BroadcastHub::new(config.hub.clone()));

    let web = WebServer::new(config.server.clone(), hub.clone());
    let web_handle = web.start_background();

    let ip = local_ip();
    tracing::info!(
        "player page: http://{}:{}/  (ws://{}:{}/ws)",
        ip,
        config.server.http_port,
        ip,
        config.server.http_port
    );

    let sweeper = tokio::spawn(run_sweeper(hub.clone(), Duration::from_secs(1)));

    let shutdown = Arc::new(AtomicBool::new(false));
    let pipeline = {
        let hub = hub.clone();
        let capture = config.capture.clone();
        let shutdown = shutdown.clone();
        tokio::task::spawn_blocking(move || run_pipeline(hub, capture, shutdown))
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
        result = web_handle => {
            // A dead listener is fatal; surface the bind error
            result??;
        }
    }

    shutdown.store(true, Ordering::SeqCst);
    hub.shutdown();
    sweeper.abort();
    let _ = pipeline.await;

    tracing::info!("stopped cleanly");
    Ok(())
}
