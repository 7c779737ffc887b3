//! Error types for the audio streaming application

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capture subsystem errors
///
/// A capture fault is fatal to the current stream epoch: the pipeline
/// broadcasts epoch-end and attempts to reopen the device.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Capture fault: {0}")]
    CaptureFault(String),

    #[error("Capture source stopped")]
    CaptureStopped,
}

/// Server-side session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Server is shutting down")]
    ShuttingDown,

    #[error("Session not found: {0}")]
    NotFound(uuid::Uuid),

    #[error("Outbound queue overflow ({dropped} chunks dropped)")]
    Overflow { dropped: u64 },

    #[error("Handshake not completed within timeout")]
    HandshakeTimeout,

    #[error("Client disconnected")]
    Disconnected,

    #[error("Invalid session state transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
}

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Truncated message: got {got} bytes, need at least {need}")]
    Truncated { got: usize, need: usize },

    #[error("Payload length mismatch: header says {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("Invalid control message: {0}")]
    InvalidControl(String),

    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch { client: u16, server: u16 },

    #[error("Unexpected message during handshake")]
    UnexpectedMessage,
}

/// Client-side playback errors
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Output device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open output stream: {0}")]
    StreamError(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
