//! Captured audio frames

/// One fixed-duration unit of captured PCM, sequence-tagged at capture
/// time. Immutable once produced; ownership moves stage to stage through
/// the pipeline.
#[derive(Clone)]
pub struct AudioFrame {
    /// Interleaved audio samples (f32)
    pub samples: Vec<f32>,
    /// Number of channels
    pub channels: u16,
    /// Capture timestamp in microseconds since stream start
    pub timestamp_us: u64,
    /// Per-epoch sequence number, strictly increasing
    pub sequence: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, channels: u16, timestamp_us: u64, sequence: u64) -> Self {
        Self {
            samples,
            channels,
            timestamp_us,
            sequence,
        }
    }

    /// Number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Frame duration in microseconds
    pub fn duration_us(&self, sample_rate: u32) -> u64 {
        (self.samples_per_channel() as u64 * 1_000_000) / sample_rate as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(vec![0.0; 1920], 2, 0, 0);
        assert_eq!(frame.samples_per_channel(), 960);
        assert_eq!(frame.duration_us(48000), 20_000);
    }
}
