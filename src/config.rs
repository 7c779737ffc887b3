//! Application configuration
//!
//! Defaults work out of the box; a TOML file in the platform config
//! directory and CLI flags can override individual values.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// HTTP/WebSocket front end settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the HTTP/WebSocket listener to
    pub bind_address: String,

    /// Port serving both the player page and the `/ws` endpoint
    pub http_port: u16,

    /// Directory with the static browser player assets
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: DEFAULT_HTTP_PORT,
            static_dir: PathBuf::from("static"),
        }
    }
}

/// Capture source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Input device name; `None` scans for a loopback-style device,
    /// then falls back to the default input
    pub device: Option<String>,

    /// Requested sample rate in Hz
    pub sample_rate: u32,

    /// Requested channel count
    pub channels: u16,

    /// Chunk duration in milliseconds; fixed for a stream epoch
    pub chunk_ms: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            chunk_ms: DEFAULT_CHUNK_MS,
        }
    }
}

impl CaptureConfig {
    /// Samples per chunk across all channels
    pub fn samples_per_chunk(&self) -> usize {
        (self.sample_rate as usize * self.chunk_ms as usize / 1000) * self.channels as usize
    }
}

/// Broadcast hub and session lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Per-session outbound queue depth in chunks. When full, the
    /// oldest queued chunk is dropped rather than blocking broadcast.
    pub queue_depth: usize,

    /// Sliding window for counting per-session drops, in milliseconds
    pub drop_window_ms: u64,

    /// Drops within the window before a session is force-closed
    pub drop_threshold: u64,

    /// Time a client may stay in Connecting before eviction, in milliseconds
    pub handshake_timeout_ms: u64,

    /// Time without a liveness ack before eviction, in milliseconds
    pub liveness_timeout_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            drop_window_ms: 2_000,
            drop_threshold: 100,
            handshake_timeout_ms: 5_000,
            liveness_timeout_ms: 15_000,
        }
    }
}

impl HubConfig {
    pub fn drop_window(&self) -> Duration {
        Duration::from_millis(self.drop_window_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }
}

/// Native player settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Server WebSocket URL
    pub server_url: String,

    /// Output device name; `None` uses the default output
    pub output_device: Option<String>,

    /// Jitter buffer minimum fill (pre-roll) in milliseconds.
    /// Larger values survive worse jitter at the cost of latency.
    pub min_fill_ms: u32,

    /// Jitter buffer maximum depth in milliseconds. A missing chunk is
    /// declared lost and skipped once this much audio is buffered past it.
    pub max_depth_ms: u32,

    /// Initial reconnect backoff in milliseconds
    pub backoff_initial_ms: u64,

    /// Maximum reconnect backoff in milliseconds
    pub backoff_max_ms: u64,

    /// Interval between liveness acks sent to the server, in milliseconds
    pub ack_interval_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            server_url: format!("ws://127.0.0.1:{}/ws", DEFAULT_HTTP_PORT),
            output_device: None,
            min_fill_ms: DEFAULT_MIN_FILL_MS,
            max_depth_ms: DEFAULT_MAX_DEPTH_MS,
            backoff_initial_ms: 250,
            backoff_max_ms: 8_000,
            ack_interval_ms: 5_000,
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub capture: CaptureConfig,
    pub hub: HubConfig,
    pub player: PlayerConfig,
}

impl AppConfig {
    /// Load from an explicit path, or from the platform config directory
    /// if one exists there, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::from_file(&p),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Platform config file location, e.g. `~/.config/aircast/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "aircast").map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
