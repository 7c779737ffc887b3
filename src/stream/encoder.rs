//! Frame encoder
//!
//! Packages captured PCM frames into wire-ready chunks: one frame in,
//! one chunk out, tagged with the epoch id and the frame's capture-time
//! sequence number. The format is fixed for the epoch's lifetime.

use crate::audio::frame::AudioFrame;
use crate::protocol::{pcm_f32_to_i16le, Chunk, StreamFormat};

pub struct FrameEncoder {
    epoch: u32,
    format: StreamFormat,
    frames_encoded: u64,
    bytes_produced: u64,
}

impl FrameEncoder {
    pub fn new(epoch: u32, format: StreamFormat) -> Self {
        Self {
            epoch,
            format,
            frames_encoded: 0,
            bytes_produced: 0,
        }
    }

    /// Encode one frame into its wire chunk
    pub fn encode(&mut self, frame: &AudioFrame) -> Chunk {
        let payload = pcm_f32_to_i16le(&frame.samples);
        self.frames_encoded += 1;
        self.bytes_produced += payload.len() as u64;
        Chunk::new(self.epoch, frame.sequence, payload)
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone, Copy)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_tags_epoch_and_sequence() {
        let mut encoder = FrameEncoder::new(3, StreamFormat::new(48000, 2));

        let frame = AudioFrame::new(vec![0.0; 1920], 2, 0, 17);
        let chunk = encoder.encode(&frame);

        assert_eq!(chunk.epoch, 3);
        assert_eq!(chunk.sequence, 17);
        // 1920 f32 samples become 1920 i16 values
        assert_eq!(chunk.payload.len(), 1920 * 2);
    }

    #[test]
    fn test_encode_counts_stats() {
        let mut encoder = FrameEncoder::new(1, StreamFormat::new(48000, 2));
        for seq in 0..5 {
            encoder.encode(&AudioFrame::new(vec![0.5; 96], 2, 0, seq));
        }
        let stats = encoder.stats();
        assert_eq!(stats.frames_encoded, 5);
        assert_eq!(stats.bytes_produced, 5 * 96 * 2);
    }
}
