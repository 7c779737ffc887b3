//! Broadcast hub
//!
//! The hub owns the authoritative session set and is the single point
//! of fan-out: every encoded chunk enters `broadcast` exactly once and
//! is offered to each live session's bounded queue. Membership mutation
//! is serialized through the concurrent map; chunk delivery to the
//! sessions' send tasks proceeds in parallel.

pub mod session;

pub use session::{Offer, Session, SessionId, SessionState, StreamEvent};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::HubConfig;
use crate::error::SessionError;
use crate::protocol::{Chunk, ControlMessage, StreamFormat};

/// The currently active stream epoch
#[derive(Debug, Clone, Copy)]
pub struct EpochInfo {
    pub epoch: u32,
    pub format: StreamFormat,
}

/// Snapshot for the status API
#[derive(Debug, Clone, Serialize)]
pub struct HubStatus {
    pub sessions: usize,
    pub active: usize,
    pub epoch: Option<u32>,
    pub chunks_broadcast: u64,
}

pub struct BroadcastHub {
    sessions: DashMap<SessionId, Arc<Session>>,
    config: HubConfig,
    epoch: RwLock<Option<EpochInfo>>,
    next_epoch: AtomicU32,
    shutting_down: AtomicBool,
    chunks_broadcast: AtomicU64,
}

impl BroadcastHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
            epoch: RwLock::new(None),
            next_epoch: AtomicU32::new(1),
            shutting_down: AtomicBool::new(false),
            chunks_broadcast: AtomicU64::new(0),
        }
    }

    /// Admit a new session in Connecting state.
    /// Rejected while the server is shutting down.
    pub fn register(&self, peer: String) -> Result<Arc<Session>, SessionError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(SessionError::ShuttingDown);
        }

        let session = Arc::new(Session::new(peer, self.config.queue_depth));
        tracing::info!(session = %session.id, peer = %session.peer, total = self.sessions.len() + 1, "client connected");
        self.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    /// Complete the handshake: Connecting → Active. The session's queue
    /// is primed with the current epoch-start so a late joiner learns
    /// the stream format immediately; it observes every chunk from this
    /// moment onward (live-only, no history replay).
    pub fn activate(&self, id: SessionId) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get(&id)
            .map(|s| Arc::clone(s.value()))
            .ok_or(SessionError::NotFound(id))?;

        session.transition(SessionState::Active)?;
        session.touch();

        if let Some(info) = *self.epoch.read() {
            session.offer(
                StreamEvent::Control(ControlMessage::EpochStart {
                    epoch: info.epoch,
                    format: info.format,
                }),
                self.config.drop_window(),
                self.config.drop_threshold,
            );
        }
        Ok(())
    }

    /// Remove a session. Idempotent; safe to call from disconnect
    /// detection and from overflow handling concurrently.
    pub fn unregister(&self, id: SessionId) {
        if let Some((_, session)) = self.sessions.remove(&id) {
            session.close();
            tracing::info!(session = %id, total = self.sessions.len(), "client disconnected");
        }
    }

    /// Force-close a session (overflow threshold or liveness failure)
    pub fn force_close(&self, id: SessionId, reason: &str) {
        if let Some((_, session)) = self.sessions.remove(&id) {
            session.close();
            tracing::warn!(session = %id, peer = %session.peer, reason, dropped = session.dropped_total(), "session force-closed");
        }
    }

    /// Fan a chunk out to every live session.
    ///
    /// Non-blocking with respect to any single slow client: a full
    /// queue drops its oldest entry, and only a session past its drop
    /// threshold is (collected and) force-closed afterwards.
    pub fn broadcast(&self, chunk: Chunk) {
        self.chunks_broadcast.fetch_add(1, Ordering::Relaxed);

        let mut overflowed: Vec<SessionId> = Vec::new();
        for entry in self.sessions.iter() {
            let session = entry.value();
            match session.state() {
                SessionState::Active | SessionState::Draining => {
                    match session.offer(
                        StreamEvent::Chunk(chunk.clone()),
                        self.config.drop_window(),
                        self.config.drop_threshold,
                    ) {
                        Offer::Exceeded => overflowed.push(session.id),
                        Offer::Queued | Offer::Degraded | Offer::Closed => {}
                    }
                }
                // Connecting sessions see nothing until activated
                SessionState::Connecting | SessionState::Closed => {}
            }
        }

        for id in overflowed {
            self.force_close(id, "outbound queue overflow");
        }
    }

    /// Deliver a control message to every active session
    fn broadcast_control(&self, message: ControlMessage) {
        for entry in self.sessions.iter() {
            let session = entry.value();
            if matches!(
                session.state(),
                SessionState::Active | SessionState::Draining
            ) {
                session.offer(
                    StreamEvent::Control(message.clone()),
                    self.config.drop_window(),
                    self.config.drop_threshold,
                );
            }
        }
    }

    /// Start a new stream epoch and announce it. Returns the epoch id.
    pub fn start_epoch(&self, format: StreamFormat) -> u32 {
        let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst);
        *self.epoch.write() = Some(EpochInfo { epoch, format });
        tracing::info!(epoch, sample_rate = format.sample_rate, channels = format.channels, "epoch started");
        self.broadcast_control(ControlMessage::EpochStart { epoch, format });
        epoch
    }

    /// End the current epoch (capture fault or shutdown) and notify
    /// all sessions
    pub fn end_epoch(&self, reason: &str) {
        let ended = self.epoch.write().take();
        if let Some(info) = ended {
            tracing::warn!(epoch = info.epoch, reason, "epoch ended");
            self.broadcast_control(ControlMessage::EpochEnd {
                epoch: info.epoch,
                reason: reason.to_string(),
            });
        }
    }

    pub fn current_epoch(&self) -> Option<EpochInfo> {
        *self.epoch.read()
    }

    /// Evict sessions stuck in Connecting past the handshake timeout
    /// and sessions without liveness acks. Returns the eviction count.
    pub fn sweep(&self) -> usize {
        let handshake_timeout = self.config.handshake_timeout();
        let liveness_timeout = self.config.liveness_timeout();

        let mut evict: Vec<(SessionId, &'static str)> = Vec::new();
        for entry in self.sessions.iter() {
            let session = entry.value();
            match session.state() {
                SessionState::Connecting if session.age() > handshake_timeout => {
                    evict.push((session.id, "handshake timeout"));
                }
                SessionState::Active | SessionState::Draining
                    if session.idle_for() > liveness_timeout =>
                {
                    evict.push((session.id, "liveness timeout"));
                }
                _ => {}
            }
        }

        let count = evict.len();
        for (id, reason) in evict {
            self.force_close(id, reason);
        }
        count
    }

    /// Reject new registrations and close every session exactly once
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.end_epoch("server shutdown");

        let ids: Vec<SessionId> = self.sessions.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.unregister(id);
        }
        tracing::info!("hub shut down");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|e| e.value().state() == SessionState::Active)
            .count()
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.config.handshake_timeout()
    }

    pub fn status(&self) -> HubStatus {
        HubStatus {
            sessions: self.session_count(),
            active: self.active_count(),
            epoch: self.current_epoch().map(|e| e.epoch),
            chunks_broadcast: self.chunks_broadcast.load(Ordering::Relaxed),
        }
    }
}

/// Periodic eviction task: handshake and liveness timeouts
pub async fn run_sweeper(hub: Arc<BroadcastHub>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if hub.is_shutting_down() {
            break;
        }
        let evicted = hub.sweep();
        if evicted > 0 {
            tracing::debug!(evicted, "sweeper evicted sessions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn hub_with(queue_depth: usize, drop_threshold: u64) -> BroadcastHub {
        BroadcastHub::new(HubConfig {
            queue_depth,
            drop_threshold,
            drop_window_ms: 60_000,
            ..HubConfig::default()
        })
    }

    fn chunk(epoch: u32, seq: u64) -> Chunk {
        Chunk::new(epoch, seq, Bytes::from(vec![0u8; 16]))
    }

    fn drain_sequences(session: &Session) -> Vec<u64> {
        let mut seqs = Vec::new();
        while let Some(event) = session.try_next_event() {
            if let StreamEvent::Chunk(c) = event {
                seqs.push(c.sequence);
            }
        }
        seqs
    }

    #[test]
    fn test_identical_ordered_delivery_to_all_active_sessions() {
        let hub = hub_with(2048, 100);
        let a = hub.register("a".into()).unwrap();
        let b = hub.register("b".into()).unwrap();
        hub.activate(a.id).unwrap();
        hub.activate(b.id).unwrap();

        for seq in 0..100 {
            hub.broadcast(chunk(1, seq));
        }

        let expected: Vec<u64> = (0..100).collect();
        assert_eq!(drain_sequences(&a), expected);
        assert_eq!(drain_sequences(&b), expected);
    }

    #[test]
    fn test_live_only_two_clients_join_at_different_times() {
        // 500 chunks; client A from chunk 0, client B from chunk 100
        let hub = hub_with(1024, 10_000);
        let a = hub.register("a".into()).unwrap();
        hub.activate(a.id).unwrap();

        for seq in 0..100 {
            hub.broadcast(chunk(1, seq));
        }

        let b = hub.register("b".into()).unwrap();
        hub.activate(b.id).unwrap();

        for seq in 100..500 {
            hub.broadcast(chunk(1, seq));
        }

        // A's queue is bounded at 1024 so nothing was dropped
        assert_eq!(drain_sequences(&a), (0..500).collect::<Vec<_>>());
        // B sees exactly the chunks broadcast after it became Active
        assert_eq!(drain_sequences(&b), (100..500).collect::<Vec<_>>());
    }

    #[test]
    fn test_connecting_session_sees_no_chunks() {
        let hub = hub_with(64, 100);
        let s = hub.register("s".into()).unwrap();

        hub.broadcast(chunk(1, 0));
        assert!(s.try_next_event().is_none());
    }

    #[test]
    fn test_slow_consumer_drops_then_force_closed() {
        let hub = hub_with(4, 8);
        let slow = hub.register("slow".into()).unwrap();
        hub.activate(slow.id).unwrap();

        // Nobody drains the queue; drops accumulate past the threshold
        for seq in 0..64 {
            hub.broadcast(chunk(1, seq));
        }

        assert_eq!(hub.session_count(), 0);
        assert_eq!(slow.state(), SessionState::Closed);
    }

    #[test]
    fn test_slow_consumer_never_blocks_broadcast_for_others() {
        let hub = hub_with(4, 1_000_000);
        let slow = hub.register("slow".into()).unwrap();
        let fast = hub.register("fast".into()).unwrap();
        hub.activate(slow.id).unwrap();
        hub.activate(fast.id).unwrap();

        let mut fast_seen = Vec::new();
        for seq in 0..200 {
            hub.broadcast(chunk(1, seq));
            fast_seen.extend(drain_sequences(&fast));
        }

        // The fast client got everything in order despite the slow one
        assert_eq!(fast_seen, (0..200).collect::<Vec<_>>());
        assert_eq!(slow.state(), SessionState::Draining);
        // The slow session skipped chunks but never reordered survivors
        let survivors = drain_sequences(&slow);
        assert!(survivors.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let hub = hub_with(64, 100);
        let s = hub.register("s".into()).unwrap();
        let id = s.id;

        hub.unregister(id);
        hub.unregister(id);
        assert_eq!(hub.session_count(), 0);
    }

    #[test]
    fn test_register_rejected_during_shutdown() {
        let hub = hub_with(64, 100);
        let s = hub.register("s".into()).unwrap();
        hub.activate(s.id).unwrap();

        hub.shutdown();
        assert!(matches!(
            hub.register("late".into()),
            Err(SessionError::ShuttingDown)
        ));
        assert_eq!(hub.session_count(), 0);
        assert_eq!(s.state(), SessionState::Closed);
    }

    #[test]
    fn test_late_joiner_receives_current_epoch_start() {
        let hub = hub_with(64, 100);
        let format = StreamFormat::new(48000, 2);
        let epoch = hub.start_epoch(format);

        let s = hub.register("s".into()).unwrap();
        hub.activate(s.id).unwrap();

        match s.try_next_event() {
            Some(StreamEvent::Control(ControlMessage::EpochStart { epoch: e, format: f })) => {
                assert_eq!(e, epoch);
                assert_eq!(f, format);
            }
            other => panic!("expected epoch start, got {other:?}"),
        }
    }

    #[test]
    fn test_epoch_end_reaches_active_sessions() {
        let hub = hub_with(64, 100);
        hub.start_epoch(StreamFormat::new(48000, 2));
        let s = hub.register("s".into()).unwrap();
        hub.activate(s.id).unwrap();
        let _ = s.try_next_event(); // epoch start

        hub.end_epoch("capture fault");
        match s.try_next_event() {
            Some(StreamEvent::Control(ControlMessage::EpochEnd { reason, .. })) => {
                assert_eq!(reason, "capture fault");
            }
            other => panic!("expected epoch end, got {other:?}"),
        }
        assert!(hub.current_epoch().is_none());
    }

    #[test]
    fn test_epoch_ids_increase() {
        let hub = hub_with(64, 100);
        let first = hub.start_epoch(StreamFormat::new(48000, 2));
        hub.end_epoch("restart");
        let second = hub.start_epoch(StreamFormat::new(44100, 2));
        assert!(second > first);
    }

    #[test]
    fn test_sweep_evicts_stalled_handshake() {
        let hub = BroadcastHub::new(HubConfig {
            handshake_timeout_ms: 0,
            ..HubConfig::default()
        });
        let s = hub.register("s".into()).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(hub.sweep(), 1);
        assert_eq!(hub.session_count(), 0);
        assert_eq!(s.state(), SessionState::Closed);
    }

    #[test]
    fn test_sweep_evicts_silent_active_session() {
        let hub = BroadcastHub::new(HubConfig {
            liveness_timeout_ms: 0,
            ..HubConfig::default()
        });
        let s = hub.register("s".into()).unwrap();
        hub.activate(s.id).unwrap();

        // No acks arrive after activation
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(hub.sweep(), 1);
        assert_eq!(hub.session_count(), 0);
        assert_eq!(s.state(), SessionState::Closed);
    }

    #[test]
    fn test_sweep_keeps_live_sessions() {
        let hub = hub_with(64, 100);
        let s = hub.register("s".into()).unwrap();
        hub.activate(s.id).unwrap();

        assert_eq!(hub.sweep(), 0);
        assert_eq!(hub.session_count(), 1);
    }
}
