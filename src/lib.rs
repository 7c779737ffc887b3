//! # AirCast
//!
//! Stream live system audio to LAN clients over WebSocket with low latency.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            SERVER                                │
//! │  ┌──────────────┐      ┌───────────────┐     ┌───────────────┐   │
//! │  │ Audio Device │─────▶│ CaptureSource │────▶│ FrameEncoder  │   │
//! │  │   (cpal)     │      │ (capture      │     │ (PCM → Chunk) │   │
//! │  └──────────────┘      │  thread)      │     └───────┬───────┘   │
//! │                        └───────────────┘             │           │
//! │                                                      ▼           │
//! │  ┌───────────────────────────────────────────────────────────┐   │
//! │  │                     BroadcastHub                          │   │
//! │  │   Session 0        Session 1        Session N             │   │
//! │  │  ┌──────────┐     ┌──────────┐     ┌──────────┐           │   │
//! │  │  │ outbound │     │ outbound │     │ outbound │           │   │
//! │  │  │  queue   │     │  queue   │     │  queue   │           │   │
//! │  │  └────┬─────┘     └────┬─────┘     └────┬─────┘           │   │
//! │  └───────┼────────────────┼────────────────┼─────────────────┘   │
//! │          ▼                ▼                ▼                     │
//! │     WebSocket        WebSocket        WebSocket                  │
//! └──────────┼────────────────┼────────────────┼─────────────────────┘
//!            │                │                │   LAN
//! ┌──────────▼────────────────▼────────────────▼─────────────────────┐
//! │                           PLAYERS                                │
//! │  ┌──────────────┐      ┌──────────────┐     ┌──────────────┐     │
//! │  │PlaybackEngine│─────▶│ JitterBuffer │────▶│ Audio Output │     │
//! │  │ (reconnect)  │      │ (reorder +   │     │   (cpal)     │     │
//! │  └──────────────┘      │  pre-roll)   │     └──────────────┘     │
//! │                        └──────────────┘                          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod net;
pub mod protocol;
pub mod stream;
pub mod ui;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio capture
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Default chunk duration in milliseconds
    pub const DEFAULT_CHUNK_MS: u32 = 20;

    /// Default HTTP/WebSocket port
    pub const DEFAULT_HTTP_PORT: u16 = 8765;

    /// Default per-session outbound queue depth (in chunks)
    pub const DEFAULT_QUEUE_DEPTH: usize = 64;

    /// Default jitter buffer minimum fill (pre-roll) in milliseconds
    pub const DEFAULT_MIN_FILL_MS: u32 = 60;

    /// Default jitter buffer maximum depth in milliseconds
    pub const DEFAULT_MAX_DEPTH_MS: u32 = 300;

    /// Capture handoff queue capacity (in frames)
    pub const CAPTURE_QUEUE_CAPACITY: usize = 256;
}
