//! Jitter buffer for chunk reordering and loss handling
//!
//! Chunks are held keyed by sequence number until played. Playback never
//! consumes a chunk before everything with a smaller sequence has been
//! consumed or declared lost. Depth limits are configured in
//! milliseconds and converted to chunk counts from the observed chunk
//! duration.

use std::collections::BTreeMap;

use crate::protocol::Chunk;

/// Result of asking the buffer for the next playable chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pop {
    /// The next in-order chunk
    Ready(Chunk),
    /// This sequence number was declared lost; playback skips past it
    Skipped(u64),
    /// Nothing playable: filling pre-roll, waiting on a reorder, or idle.
    /// The caller renders silence.
    Starved,
}

/// Result of inserting a received chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    Accepted,
    /// Same sequence number already buffered or already played
    Duplicate,
    /// Chunk belongs to an epoch older than the current one
    StaleEpoch,
    /// Chunk carried a new epoch id; the buffer flushed and adopted it
    EpochChanged,
}

/// Buffer statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct JitterStats {
    pub received: u64,
    pub duplicates: u64,
    pub lost: u64,
    pub underruns: u64,
    pub flushes: u64,
}

pub struct JitterBuffer {
    chunks: BTreeMap<u64, Chunk>,
    /// Epoch the buffer currently accepts; None until the first
    /// epoch-start or chunk arrives
    epoch: Option<u32>,
    /// Next sequence number playback expects
    next_sequence: u64,
    /// Whether we have locked onto a sequence position this epoch
    synced: bool,
    /// Pre-roll satisfied; playback is consuming
    playing: bool,
    min_fill_ms: u32,
    max_depth_ms: u32,
    /// Learned from the first chunk of an epoch
    chunk_duration_us: Option<u64>,
    stats: JitterStats,
}

impl JitterBuffer {
    pub fn new(min_fill_ms: u32, max_depth_ms: u32) -> Self {
        Self {
            chunks: BTreeMap::new(),
            epoch: None,
            next_sequence: 0,
            synced: false,
            playing: false,
            min_fill_ms,
            max_depth_ms: max_depth_ms.max(min_fill_ms),
            chunk_duration_us: None,
            stats: JitterStats::default(),
        }
    }

    /// Minimum chunks buffered before playback starts
    fn min_fill_chunks(&self) -> usize {
        match self.chunk_duration_us {
            Some(d) if d > 0 => ((self.min_fill_ms as u64 * 1000).div_ceil(d) as usize).max(1),
            _ => 1,
        }
    }

    /// Buffered chunks past a missing one before it is declared lost
    fn max_depth_chunks(&self) -> u64 {
        match self.chunk_duration_us {
            Some(d) if d > 0 => ((self.max_depth_ms as u64 * 1000) / d).max(2),
            _ => 2,
        }
    }

    /// Begin a new epoch: flush everything, restart pre-roll.
    ///
    /// Repeating the epoch already in progress is a duplicate control
    /// message (a joiner can be primed with the same epoch-start the
    /// server is concurrently announcing); flushing good audio for it
    /// would force a needless re-pre-roll, so it is a no-op.
    pub fn start_epoch(&mut self, epoch: u32) {
        if self.epoch == Some(epoch) {
            return;
        }
        if self.epoch.is_some() {
            self.stats.flushes += 1;
        }
        self.chunks.clear();
        self.epoch = Some(epoch);
        self.next_sequence = 0;
        self.synced = false;
        self.playing = false;
        self.chunk_duration_us = None;
    }

    /// The current epoch ended; drain state and go idle
    pub fn end_epoch(&mut self) {
        self.chunks.clear();
        self.epoch = None;
        self.synced = false;
        self.playing = false;
        self.stats.flushes += 1;
    }

    /// Insert a received chunk. `duration_us` is the chunk's play time,
    /// computed by the caller from the payload length and stream format.
    pub fn insert(&mut self, chunk: Chunk, duration_us: u64) -> Insert {
        let mut outcome = Insert::Accepted;

        match self.epoch {
            Some(current) if chunk.epoch == current => {}
            Some(current) if chunk.epoch < current => {
                return Insert::StaleEpoch;
            }
            // Epoch advanced (or first chunk before any epoch-start):
            // flush and adopt, never splice across epochs
            _ => {
                if self.epoch.is_some() {
                    outcome = Insert::EpochChanged;
                }
                self.start_epoch(chunk.epoch);
            }
        }

        if self.chunk_duration_us.is_none() && duration_us > 0 {
            self.chunk_duration_us = Some(duration_us);
        }

        // Live-only join: lock onto the first sequence we see
        if !self.synced {
            self.next_sequence = chunk.sequence;
            self.synced = true;
        }

        if chunk.sequence < self.next_sequence || self.chunks.contains_key(&chunk.sequence) {
            self.stats.duplicates += 1;
            return Insert::Duplicate;
        }

        self.chunks.insert(chunk.sequence, chunk);
        self.stats.received += 1;
        outcome
    }

    /// Pull the next playable chunk at the audio sink's rate
    pub fn pop(&mut self) -> Pop {
        if !self.playing {
            if self.synced && self.chunks.len() >= self.min_fill_chunks() {
                self.playing = true;
            } else {
                return Pop::Starved;
            }
        }

        if let Some(chunk) = self.chunks.remove(&self.next_sequence) {
            self.next_sequence += 1;
            return Pop::Ready(chunk);
        }

        if self.chunks.is_empty() {
            // Underrun: pause and refill pre-roll rather than glitching
            self.playing = false;
            self.stats.underruns += 1;
            return Pop::Starved;
        }

        // The expected chunk is missing. Once the buffer holds a full
        // depth of audio past it, its deadline has elapsed: declare it
        // lost and skip rather than stalling indefinitely.
        let newest = *self.chunks.keys().next_back().unwrap_or(&self.next_sequence);
        if newest - self.next_sequence >= self.max_depth_chunks() {
            let skipped = self.next_sequence;
            self.next_sequence += 1;
            self.stats.lost += 1;
            return Pop::Skipped(skipped);
        }

        Pop::Starved
    }

    /// Number of buffered chunks
    pub fn depth(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn epoch(&self) -> Option<u32> {
        self.epoch
    }

    pub fn stats(&self) -> JitterStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use proptest::prelude::*;

    const CHUNK_US: u64 = 20_000; // 20ms chunks

    fn chunk(epoch: u32, seq: u64) -> Chunk {
        Chunk::new(epoch, seq, Bytes::from(vec![seq as u8; 8]))
    }

    /// 60ms pre-roll over 20ms chunks = 3 chunks; 100ms depth = 5 chunks
    fn buffer() -> JitterBuffer {
        JitterBuffer::new(60, 100)
    }

    fn fill(buf: &mut JitterBuffer, epoch: u32, seqs: impl IntoIterator<Item = u64>) {
        for s in seqs {
            buf.insert(chunk(epoch, s), CHUNK_US);
        }
    }

    #[test]
    fn test_preroll_gates_playback() {
        let mut buf = buffer();
        buf.start_epoch(1);

        fill(&mut buf, 1, [0, 1]);
        assert_eq!(buf.pop(), Pop::Starved);

        fill(&mut buf, 1, [2]);
        assert!(matches!(buf.pop(), Pop::Ready(c) if c.sequence == 0));
    }

    #[test]
    fn test_in_order_delivery_from_out_of_order_arrival() {
        let mut buf = buffer();
        buf.start_epoch(1);
        fill(&mut buf, 1, [2, 0, 1]);

        for expected in 0..3u64 {
            match buf.pop() {
                Pop::Ready(c) => assert_eq!(c.sequence, expected),
                other => panic!("expected chunk {expected}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_duplicate_insert_is_idempotent() {
        let mut buf = buffer();
        buf.start_epoch(1);

        assert_eq!(buf.insert(chunk(1, 5), CHUNK_US), Insert::Accepted);
        assert_eq!(buf.insert(chunk(1, 5), CHUNK_US), Insert::Duplicate);
        assert_eq!(buf.depth(), 1);
        assert_eq!(buf.stats().duplicates, 1);
    }

    #[test]
    fn test_missing_chunk_skipped_after_deadline() {
        let mut buf = buffer();
        buf.start_epoch(1);

        // Sequence 1 never arrives; depth is 5 chunks
        fill(&mut buf, 1, [0, 2, 3, 4, 5, 6]);

        assert!(matches!(buf.pop(), Pop::Ready(c) if c.sequence == 0));
        assert_eq!(buf.pop(), Pop::Skipped(1));
        assert!(matches!(buf.pop(), Pop::Ready(c) if c.sequence == 2));
        assert_eq!(buf.stats().lost, 1);
    }

    #[test]
    fn test_missing_chunk_waits_before_deadline() {
        let mut buf = buffer();
        buf.start_epoch(1);

        fill(&mut buf, 1, [0, 2, 3]);
        assert!(matches!(buf.pop(), Pop::Ready(c) if c.sequence == 0));
        // Gap at 1 but only 2 chunks past it: not yet lost
        assert_eq!(buf.pop(), Pop::Starved);
    }

    #[test]
    fn test_underrun_restarts_preroll() {
        let mut buf = buffer();
        buf.start_epoch(1);
        fill(&mut buf, 1, [0, 1, 2]);

        for _ in 0..3 {
            assert!(matches!(buf.pop(), Pop::Ready(_)));
        }
        assert_eq!(buf.pop(), Pop::Starved);
        assert_eq!(buf.stats().underruns, 1);

        // One chunk is not enough to re-satisfy pre-roll
        fill(&mut buf, 1, [3]);
        assert_eq!(buf.pop(), Pop::Starved);
        fill(&mut buf, 1, [4, 5]);
        assert!(matches!(buf.pop(), Pop::Ready(c) if c.sequence == 3));
    }

    #[test]
    fn test_epoch_change_flushes_fully() {
        let mut buf = buffer();
        buf.start_epoch(1);
        fill(&mut buf, 1, [0, 1, 2, 3]);

        assert_eq!(buf.insert(chunk(2, 0), CHUNK_US), Insert::EpochChanged);
        // Only the new-epoch chunk survives the flush
        assert_eq!(buf.depth(), 1);
        assert_eq!(buf.epoch(), Some(2));
        assert!(!buf.is_playing());
    }

    #[test]
    fn test_repeated_epoch_start_keeps_buffer() {
        let mut buf = buffer();
        buf.start_epoch(1);
        fill(&mut buf, 1, [0, 1, 2]);
        assert!(matches!(buf.pop(), Pop::Ready(c) if c.sequence == 0));

        // Duplicate announcement of the running epoch changes nothing
        buf.start_epoch(1);
        assert_eq!(buf.depth(), 2);
        assert!(buf.is_playing());
        assert!(matches!(buf.pop(), Pop::Ready(c) if c.sequence == 1));
        assert_eq!(buf.stats().flushes, 0);
    }

    #[test]
    fn test_stale_epoch_rejected_after_flush() {
        let mut buf = buffer();
        buf.start_epoch(2);
        assert_eq!(buf.insert(chunk(1, 99), CHUNK_US), Insert::StaleEpoch);
        assert_eq!(buf.depth(), 0);
    }

    #[test]
    fn test_live_join_syncs_to_first_sequence() {
        let mut buf = buffer();
        buf.start_epoch(1);

        // Joined mid-stream at sequence 100
        fill(&mut buf, 1, [100, 101, 102]);
        assert!(matches!(buf.pop(), Pop::Ready(c) if c.sequence == 100));
    }

    proptest! {
        /// Inserting any chunk twice leaves the buffer identical to
        /// inserting it once.
        #[test]
        fn prop_duplicate_inserts_idempotent(seqs in proptest::collection::vec(0u64..64, 1..32)) {
            let mut once = buffer();
            let mut twice = buffer();
            once.start_epoch(1);
            twice.start_epoch(1);

            for &s in &seqs {
                once.insert(chunk(1, s), CHUNK_US);
                twice.insert(chunk(1, s), CHUNK_US);
                twice.insert(chunk(1, s), CHUNK_US);
            }

            prop_assert_eq!(once.depth(), twice.depth());
            let a: Vec<u64> = once.chunks.keys().copied().collect();
            let b: Vec<u64> = twice.chunks.keys().copied().collect();
            prop_assert_eq!(a, b);
        }

        /// Whatever the arrival order, delivery is strictly increasing
        /// with no duplicates.
        #[test]
        fn prop_delivery_never_reorders(mut seqs in proptest::collection::vec(0u64..128, 1..64)) {
            let mut buf = JitterBuffer::new(0, 100);
            buf.start_epoch(1);
            seqs.sort_unstable();
            seqs.dedup();
            // First arrival sets the sync point; deliver the rest in
            // reverse arrival order to exercise reordering.
            buf.insert(chunk(1, seqs[0]), CHUNK_US);
            for &s in seqs.iter().skip(1).rev() {
                buf.insert(chunk(1, s), CHUNK_US);
            }

            let mut last: Option<u64> = None;
            loop {
                match buf.pop() {
                    Pop::Ready(c) => {
                        if let Some(prev) = last {
                            prop_assert!(c.sequence > prev);
                        }
                        last = Some(c.sequence);
                    }
                    Pop::Skipped(_) => {}
                    Pop::Starved => break,
                }
            }
        }
    }
}
