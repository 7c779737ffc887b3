//! Playback engine connection state machine
//!
//! Owns the WebSocket connection to the server: handshake, control
//! handling, chunk ingestion into the jitter buffer, periodic liveness
//! acks, and reconnection with exponential backoff. Reconnection
//! retries indefinitely until the player is stopped; every successful
//! reconnect restarts pre-roll.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::audio::playback::PlaybackHandle;
use crate::client::jitter::JitterBuffer;
use crate::config::PlayerConfig;
use crate::error::{Error, PlaybackError, ProtocolError};
use crate::protocol::{Chunk, ControlMessage, StreamFormat, PROTOCOL_VERSION};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection states of the playback engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// First connection attempt in progress
    Connecting,
    /// Connected, handshake complete, receiving the stream
    Active,
    /// Transport lost; retrying with backoff
    Reconnecting,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct PlaybackEngine {
    config: PlayerConfig,
    jitter: Arc<Mutex<JitterBuffer>>,
    playback: Option<PlaybackHandle>,
    state: Mutex<EngineState>,
    /// Format of the current epoch, used to size incoming chunks
    format: Mutex<Option<StreamFormat>>,
}

impl PlaybackEngine {
    pub fn new(
        config: PlayerConfig,
        jitter: Arc<Mutex<JitterBuffer>>,
        playback: Option<PlaybackHandle>,
    ) -> Self {
        Self {
            config,
            jitter,
            playback,
            state: Mutex::new(EngineState::Connecting),
            format: Mutex::new(None),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    fn set_state(&self, state: EngineState) {
        let mut current = self.state.lock();
        if *current != state {
            tracing::info!(?state, "engine state");
            *current = state;
        }
    }

    /// Run until cancelled (the caller typically races this against
    /// Ctrl-C). Reconnects forever with exponential backoff.
    pub async fn run(&self) {
        let initial = Duration::from_millis(self.config.backoff_initial_ms.max(1));
        let max = Duration::from_millis(self.config.backoff_max_ms.max(1));
        let mut backoff = initial;
        let mut first_attempt = true;

        loop {
            self.set_state(if first_attempt {
                EngineState::Connecting
            } else {
                EngineState::Reconnecting
            });

            let result = self.connect_and_stream().await;

            // A completed handshake restarts the backoff schedule,
            // however the session later ends. State is still Active
            // here when the connection got past the handshake.
            if self.state() == EngineState::Active {
                backoff = initial;
            }
            if let Err(e) = result {
                tracing::warn!("connection lost: {}", e);
            }

            first_attempt = false;
            self.set_state(EngineState::Reconnecting);
            tracing::info!(delay_ms = backoff.as_millis() as u64, "reconnecting");
            tokio::time::sleep(backoff).await;
            backoff = next_backoff(backoff, max);
        }
    }

    async fn connect_and_stream(&self) -> Result<(), Error> {
        let (ws, _) = connect_async(self.config.server_url.as_str())
            .await
            .map_err(|e| PlaybackError::ConnectionFailed(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        // Handshake: hello out, hello back, version check
        sink.send(Message::Text(
            ControlMessage::ClientHello {
                protocol_version: PROTOCOL_VERSION,
            }
            .to_json(),
        ))
        .await
        .map_err(|e| PlaybackError::ConnectionFailed(e.to_string()))?;

        let hello = timeout(HANDSHAKE_TIMEOUT, read_server_hello(&mut stream))
            .await
            .map_err(|_| PlaybackError::ConnectionFailed("handshake timed out".into()))??;

        tracing::info!(session = %hello.0, "connected to server");
        // Fresh pre-roll after every (re)connect
        self.jitter.lock().end_epoch();
        self.set_state(EngineState::Active);

        let mut ack_timer =
            tokio::time::interval(Duration::from_millis(self.config.ack_interval_ms.max(100)));
        ack_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                message = stream.next() => {
                    match message {
                        None => return Ok(()),
                        Some(Err(e)) => {
                            return Err(PlaybackError::ConnectionFailed(e.to_string()).into());
                        }
                        Some(Ok(msg)) => self.handle_message(msg)?,
                    }
                }
                _ = ack_timer.tick() => {
                    sink.send(Message::Text(ControlMessage::Ack.to_json()))
                        .await
                        .map_err(|e| PlaybackError::ConnectionFailed(e.to_string()))?;
                }
            }
        }
    }

    fn handle_message(&self, message: Message) -> Result<(), Error> {
        match message {
            Message::Binary(data) => {
                let chunk = Chunk::decode(data.into())?;
                self.ingest_chunk(chunk);
            }
            Message::Text(text) => match ControlMessage::from_json(&text)? {
                ControlMessage::EpochStart { epoch, format } => {
                    if !format.is_valid() {
                        return Err(ProtocolError::InvalidControl(format!(
                            "epoch {epoch} with degenerate format {}Hz/{}ch",
                            format.sample_rate, format.channels
                        ))
                        .into());
                    }
                    tracing::info!(epoch, sample_rate = format.sample_rate, "epoch started");
                    *self.format.lock() = Some(format);
                    self.jitter.lock().start_epoch(epoch);
                    if let Some(playback) = &self.playback {
                        playback.set_format(format);
                    }
                }
                ControlMessage::EpochEnd { epoch, reason } => {
                    tracing::warn!(epoch, reason, "epoch ended");
                    self.jitter.lock().end_epoch();
                }
                // Unexpected mid-stream handshake messages are ignored
                _ => {}
            },
            Message::Close(_) => {}
            _ => {}
        }
        Ok(())
    }

    fn ingest_chunk(&self, chunk: Chunk) {
        let duration_us = self
            .format
            .lock()
            .map(|f| f.payload_duration_us(chunk.payload.len()))
            .unwrap_or(0);
        self.jitter.lock().insert(chunk, duration_us);
    }
}

async fn read_server_hello(
    stream: &mut futures_util::stream::SplitStream<WsStream>,
) -> Result<(uuid::Uuid, u16), Error> {
    while let Some(message) = stream.next().await {
        let message = message.map_err(|e| PlaybackError::ConnectionFailed(e.to_string()))?;
        if let Message::Text(text) = message {
            return match ControlMessage::from_json(&text)? {
                ControlMessage::ServerHello {
                    session_id,
                    protocol_version,
                } if protocol_version == PROTOCOL_VERSION => Ok((session_id, protocol_version)),
                ControlMessage::ServerHello {
                    protocol_version, ..
                } => Err(ProtocolError::VersionMismatch {
                    client: PROTOCOL_VERSION,
                    server: protocol_version,
                }
                .into()),
                _ => Err(ProtocolError::UnexpectedMessage.into()),
            };
        }
    }
    Err(PlaybackError::ConnectionFailed("connection closed during handshake".into()).into())
}

/// Exponential backoff, doubled up to the bound
fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}
