//! Wire protocol for the WebSocket audio stream
//!
//! Audio travels as binary frames with a fixed 16-byte header, control
//! messages as JSON text frames. Both directions share one persistent
//! WebSocket connection per client.
//!
//! Binary chunk layout (big-endian):
//!
//! ```text
//! ┌─────────────┬────────────────┬──────────────┬─────────────────┐
//! │ epoch (u32) │ sequence (u64) │ length (u32) │ payload (bytes) │
//! └─────────────┴────────────────┴──────────────┴─────────────────┘
//! ```
//!
//! The payload is interleaved little-endian i16 PCM.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;

/// Protocol version, checked during handshake
pub const PROTOCOL_VERSION: u16 = 1;

/// Chunk header size in bytes: epoch + sequence + length
pub const CHUNK_HEADER_LEN: usize = 4 + 8 + 4;

/// PCM format of a stream epoch, fixed for the epoch's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl StreamFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: 16,
        }
    }

    /// Bytes per single sample frame (all channels)
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    /// A format a receiver may safely do arithmetic with. Formats come
    /// off the wire, so degenerate values must be rejected, not trusted.
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.channels > 0 && self.bits_per_sample == 16
    }

    /// Duration in microseconds of a payload of the given byte length.
    /// Zero for a degenerate format rather than dividing by zero.
    pub fn payload_duration_us(&self, payload_len: usize) -> u64 {
        if !self.is_valid() {
            return 0;
        }
        let frames = (payload_len / self.bytes_per_frame()) as u64;
        frames * 1_000_000 / self.sample_rate as u64
    }
}

/// One wire-ready unit of audio: header plus immutable PCM payload.
///
/// Cloning is cheap (the payload is reference-counted), so the hub can
/// hand the same chunk to every session without copying audio data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub epoch: u32,
    pub sequence: u64,
    pub payload: Bytes,
}

impl Chunk {
    pub fn new(epoch: u32, sequence: u64, payload: Bytes) -> Self {
        Self {
            epoch,
            sequence,
            payload,
        }
    }

    /// Encode into a wire-ready buffer
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(CHUNK_HEADER_LEN + self.payload.len());
        buf.put_u32(self.epoch);
        buf.put_u64(self.sequence);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decode a chunk from a received binary message
    pub fn decode(mut data: Bytes) -> Result<Self, ProtocolError> {
        if data.len() < CHUNK_HEADER_LEN {
            return Err(ProtocolError::Truncated {
                got: data.len(),
                need: CHUNK_HEADER_LEN,
            });
        }

        let epoch = data.get_u32();
        let sequence = data.get_u64();
        let length = data.get_u32() as usize;

        if data.len() != length {
            return Err(ProtocolError::LengthMismatch {
                expected: length,
                got: data.len(),
            });
        }

        Ok(Self {
            epoch,
            sequence,
            payload: data,
        })
    }
}

/// Control messages exchanged as JSON text frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Client→server handshake, must be the first client message
    ClientHello { protocol_version: u16 },

    /// Server→client handshake response
    ServerHello {
        session_id: Uuid,
        protocol_version: u16,
    },

    /// A new stream epoch begins; the client must flush its buffer
    EpochStart { epoch: u32, format: StreamFormat },

    /// The current epoch ended (capture fault or shutdown)
    EpochEnd { epoch: u32, reason: String },

    /// Client→server periodic liveness acknowledgement
    Ack,
}

impl ControlMessage {
    pub fn to_json(&self) -> String {
        // Serialization of these enums cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidControl(e.to_string()))
    }
}

/// Convert captured f32 samples to the wire's little-endian i16 PCM
pub fn pcm_f32_to_i16le(samples: &[f32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for &s in samples {
        let clamped = s.clamp(-1.0, 1.0);
        buf.put_i16_le((clamped * i16::MAX as f32) as i16);
    }
    buf.freeze()
}

/// Convert wire i16 PCM back to f32 samples for the output device
pub fn pcm_i16le_to_f32(payload: &[u8]) -> Vec<f32> {
    payload
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_roundtrip() {
        let chunk = Chunk::new(3, 42, Bytes::from_static(&[1, 2, 3, 4]));
        let decoded = Chunk::decode(chunk.encode()).unwrap();
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn test_chunk_truncated() {
        let err = Chunk::decode(Bytes::from_static(&[0; 8])).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { got: 8, .. }));
    }

    #[test]
    fn test_chunk_length_mismatch() {
        let mut encoded = BytesMut::new();
        encoded.put_u32(1);
        encoded.put_u64(0);
        encoded.put_u32(100); // claims 100 payload bytes
        encoded.put_slice(&[0; 4]);

        let err = Chunk::decode(encoded.freeze()).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::LengthMismatch { expected: 100, got: 4 }
        ));
    }

    #[test]
    fn test_control_roundtrip() {
        let msg = ControlMessage::EpochStart {
            epoch: 7,
            format: StreamFormat::new(48000, 2),
        };
        let parsed = ControlMessage::from_json(&msg.to_json()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_control_rejects_garbage() {
        assert!(ControlMessage::from_json("not json").is_err());
        assert!(ControlMessage::from_json("{\"type\":\"bogus\"}").is_err());
    }

    #[test]
    fn test_pcm_conversion_saturates() {
        let bytes = pcm_f32_to_i16le(&[0.0, 1.0, -1.0, 2.0]);
        let back = pcm_i16le_to_f32(&bytes);
        assert_eq!(back.len(), 4);
        assert!(back[0].abs() < f32::EPSILON);
        assert!((back[1] - 1.0).abs() < 0.001);
        // Out-of-range input clamps instead of wrapping
        assert!((back[3] - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_payload_duration() {
        let format = StreamFormat::new(48000, 2);
        // 20ms of stereo i16 = 960 frames * 4 bytes
        assert_eq!(format.payload_duration_us(960 * 4), 20_000);
    }

    #[test]
    fn test_degenerate_format_rejected_and_duration_defined() {
        let zero_rate = StreamFormat::new(0, 2);
        let zero_channels = StreamFormat::new(48000, 0);

        assert!(!zero_rate.is_valid());
        assert!(!zero_channels.is_valid());
        assert!(StreamFormat::new(48000, 2).is_valid());

        // Wire input must never be able to panic the receiver
        assert_eq!(zero_rate.payload_duration_us(3840), 0);
        assert_eq!(zero_channels.payload_duration_us(3840), 0);
    }
}
