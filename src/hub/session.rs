//! Server-side client sessions
//!
//! Each connected client is one `Session`: a state machine
//! (Connecting → Active ⇄ Draining → Closed) plus a bounded outbound
//! queue serviced by that client's send task. The queue never blocks
//! the broadcast path; when full it drops its oldest entry.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::SessionError;
use crate::protocol::{Chunk, ControlMessage};

pub type SessionId = Uuid;

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Admitted, handshake not yet complete
    Connecting,
    /// Receiving the live stream
    Active,
    /// Falling behind; oldest queued chunks are being dropped
    Draining,
    /// Terminal; always triggers unregister exactly once
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Draining => "draining",
            SessionState::Closed => "closed",
        }
    }

    fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Active)
                | (Active, Draining)
                | (Draining, Active)
                | (Connecting, Closed)
                | (Active, Closed)
                | (Draining, Closed)
        )
    }
}

/// What a session's send task transmits, in broadcast order
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Chunk(Chunk),
    Control(ControlMessage),
}

/// Outcome of pushing into the outbound queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PushOutcome {
    Queued,
    DroppedOldest,
    Closed,
}

/// Bounded single-consumer queue with a drop-oldest overflow policy
struct OutboundQueue {
    inner: Mutex<VecDeque<StreamEvent>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped_total: AtomicU64,
}

impl OutboundQueue {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped_total: AtomicU64::new(0),
        }
    }

    fn push(&self, event: StreamEvent) -> PushOutcome {
        if self.closed.load(Ordering::SeqCst) {
            return PushOutcome::Closed;
        }

        let outcome = {
            let mut queue = self.inner.lock();
            if queue.len() >= self.capacity {
                queue.pop_front();
                queue.push_back(event);
                self.dropped_total.fetch_add(1, Ordering::Relaxed);
                PushOutcome::DroppedOldest
            } else {
                queue.push_back(event);
                PushOutcome::Queued
            }
        };

        self.notify.notify_one();
        outcome
    }

    fn try_pop(&self) -> Option<StreamEvent> {
        self.inner.lock().pop_front()
    }

    /// Wait for the next event. Returns `None` once the queue is
    /// closed and drained. Single consumer only.
    async fn pop(&self) -> Option<StreamEvent> {
        loop {
            if let Some(event) = self.try_pop() {
                return Some(event);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Outcome of offering a stream event to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Enqueued normally
    Queued,
    /// Queue was full; oldest entry dropped, session is Draining
    Degraded,
    /// Drop threshold exceeded within the window; caller must force-close
    Exceeded,
    /// Session already closed
    Closed,
}

/// Sliding window of queue drops for the overflow-close policy
struct DropWindow {
    window_start: Instant,
    count: u64,
}

pub struct Session {
    pub id: SessionId,
    pub peer: String,
    state: Mutex<SessionState>,
    queue: OutboundQueue,
    connected_at: Instant,
    last_activity: Mutex<Instant>,
    drops: Mutex<DropWindow>,
}

impl Session {
    pub fn new(peer: String, queue_depth: usize) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            peer,
            state: Mutex::new(SessionState::Connecting),
            queue: OutboundQueue::new(queue_depth),
            connected_at: now,
            last_activity: Mutex::new(now),
            drops: Mutex::new(DropWindow {
                window_start: now,
                count: 0,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Apply a state transition, rejecting illegal ones
    pub fn transition(&self, next: SessionState) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: state.as_str(),
                to: next.as_str(),
            });
        }
        tracing::debug!(session = %self.id, from = state.as_str(), to = next.as_str(), "session transition");
        *state = next;
        Ok(())
    }

    /// Close the session. Returns true only for the call that actually
    /// performed the transition, so teardown side effects run once.
    pub fn close(&self) -> bool {
        let was_open = {
            let mut state = self.state.lock();
            if *state == SessionState::Closed {
                false
            } else {
                *state = SessionState::Closed;
                true
            }
        };
        if was_open {
            self.queue.close();
        }
        was_open
    }

    /// Record client activity (handshake, liveness ack)
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Offer a stream event for delivery, applying the drop-oldest and
    /// overflow-close policies. Never blocks.
    pub fn offer(&self, event: StreamEvent, drop_window: Duration, drop_threshold: u64) -> Offer {
        match self.queue.push(event) {
            PushOutcome::Closed => Offer::Closed,
            PushOutcome::Queued => {
                // A draining session that caught back up becomes Active
                if self.state() == SessionState::Draining
                    && self.queue.len() * 2 <= self.queue.capacity
                    && self.transition(SessionState::Active).is_ok()
                {
                    tracing::info!(session = %self.id, "session caught up, active again");
                }
                Offer::Queued
            }
            PushOutcome::DroppedOldest => {
                if self.state() == SessionState::Active {
                    let _ = self.transition(SessionState::Draining);
                    tracing::warn!(session = %self.id, peer = %self.peer, "slow client, draining");
                }
                if self.note_drop(drop_window, drop_threshold) {
                    Offer::Exceeded
                } else {
                    Offer::Degraded
                }
            }
        }
    }

    fn note_drop(&self, window: Duration, threshold: u64) -> bool {
        let mut drops = self.drops.lock();
        let now = Instant::now();
        if now.duration_since(drops.window_start) > window {
            drops.window_start = now;
            drops.count = 0;
        }
        drops.count += 1;
        drops.count > threshold
    }

    /// Next event for this session's send task; `None` once closed
    pub async fn next_event(&self) -> Option<StreamEvent> {
        self.queue.pop().await
    }

    /// Non-blocking variant of [`next_event`](Self::next_event)
    pub fn try_next_event(&self) -> Option<StreamEvent> {
        self.queue.try_pop()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Total chunks dropped for this session since connect
    pub fn dropped_total(&self) -> u64 {
        self.queue.dropped_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn event(seq: u64) -> StreamEvent {
        StreamEvent::Chunk(Chunk::new(1, seq, Bytes::from_static(&[0; 4])))
    }

    fn seq_of(event: &StreamEvent) -> u64 {
        match event {
            StreamEvent::Chunk(c) => c.sequence,
            StreamEvent::Control(_) => panic!("expected chunk"),
        }
    }

    #[test]
    fn test_legal_lifecycle() {
        let session = Session::new("test".into(), 4);
        assert_eq!(session.state(), SessionState::Connecting);
        session.transition(SessionState::Active).unwrap();
        session.transition(SessionState::Draining).unwrap();
        session.transition(SessionState::Active).unwrap();
        assert!(session.close());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let session = Session::new("test".into(), 4);
        // Cannot drain before activating
        assert!(session.transition(SessionState::Draining).is_err());
        session.close();
        assert!(session.transition(SessionState::Active).is_err());
    }

    #[test]
    fn test_close_is_idempotent() {
        let session = Session::new("test".into(), 4);
        assert!(session.close());
        assert!(!session.close());
    }

    #[test]
    fn test_drop_oldest_keeps_newest() {
        let session = Session::new("test".into(), 2);
        session.transition(SessionState::Active).unwrap();

        let window = Duration::from_secs(10);
        assert_eq!(session.offer(event(0), window, 100), Offer::Queued);
        assert_eq!(session.offer(event(1), window, 100), Offer::Queued);
        assert_eq!(session.offer(event(2), window, 100), Offer::Degraded);
        assert_eq!(session.state(), SessionState::Draining);

        // Oldest (0) was dropped; order of survivors preserved
        assert_eq!(seq_of(&session.try_next_event().unwrap()), 1);
        assert_eq!(seq_of(&session.try_next_event().unwrap()), 2);
    }

    #[test]
    fn test_overflow_threshold_exceeded() {
        let session = Session::new("test".into(), 1);
        session.transition(SessionState::Active).unwrap();
        let window = Duration::from_secs(10);

        session.offer(event(0), window, 2);
        assert_eq!(session.offer(event(1), window, 2), Offer::Degraded);
        assert_eq!(session.offer(event(2), window, 2), Offer::Degraded);
        assert_eq!(session.offer(event(3), window, 2), Offer::Exceeded);
    }

    #[test]
    fn test_draining_recovers_when_caught_up() {
        let session = Session::new("test".into(), 4);
        session.transition(SessionState::Active).unwrap();
        let window = Duration::from_secs(10);

        for i in 0..5 {
            session.offer(event(i), window, 100);
        }
        assert_eq!(session.state(), SessionState::Draining);

        // Consumer catches up
        while session.try_next_event().is_some() {}
        session.offer(event(5), window, 100);
        assert_eq!(session.state(), SessionState::Active);
    }

    #[test]
    fn test_offer_after_close() {
        let session = Session::new("test".into(), 4);
        session.close();
        assert_eq!(
            session.offer(event(0), Duration::from_secs(1), 100),
            Offer::Closed
        );
    }

    #[tokio::test]
    async fn test_pop_returns_none_after_close() {
        let session = Session::new("test".into(), 4);
        session.offer(event(0), Duration::from_secs(1), 100);
        session.close();

        // Queued event still drains, then the closed queue yields None
        assert!(session.next_event().await.is_some());
        assert!(session.next_event().await.is_none());
    }
}
