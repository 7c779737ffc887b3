//! Client playback engine
//!
//! Turns the unreliable chunk stream into steady audio output: jitter
//! buffering with pre-roll, loss skipping, epoch resets, and reconnection
//! with exponential backoff.

pub mod engine;
pub mod jitter;

pub use engine::{EngineState, PlaybackEngine};
pub use jitter::{Insert, JitterBuffer, JitterStats, Pop};
