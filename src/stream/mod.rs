//! Capture-and-broadcast pipeline
//!
//! The single logical producer: pull a frame from the capture source,
//! encode it, hand it to the hub. The loop blocks only on the capture
//! source; session I/O never backs up into it. A capture fault ends the
//! current epoch, and the loop retries the device with bounded backoff
//! until shutdown.

pub mod encoder;

pub use encoder::FrameEncoder;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::audio::capture::CaptureSource;
use crate::config::CaptureConfig;
use crate::hub::BroadcastHub;

/// How long `next_frame` may block before the loop polls shutdown
const PULL_TIMEOUT: Duration = Duration::from_millis(250);

/// Initial and maximum delay between capture reopen attempts
const REOPEN_BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const REOPEN_BACKOFF_MAX: Duration = Duration::from_secs(10);

/// Run the pipeline until `shutdown` is set. Blocking; callers run it
/// via `tokio::task::spawn_blocking` or a dedicated thread.
pub fn run_pipeline(hub: Arc<BroadcastHub>, config: CaptureConfig, shutdown: Arc<AtomicBool>) {
    let mut backoff = REOPEN_BACKOFF_INITIAL;

    while !shutdown.load(Ordering::SeqCst) {
        let capture = match CaptureSource::open(&config) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("failed to open capture device: {}", e);
                sleep_interruptible(backoff, &shutdown);
                backoff = (backoff * 2).min(REOPEN_BACKOFF_MAX);
                continue;
            }
        };
        backoff = REOPEN_BACKOFF_INITIAL;

        let epoch = hub.start_epoch(capture.format());
        let mut frame_encoder = FrameEncoder::new(epoch, capture.format());

        match stream_epoch(&hub, &capture, &mut frame_encoder, &shutdown) {
            EpochOutcome::Shutdown => {
                hub.end_epoch("server shutdown");
                break;
            }
            EpochOutcome::CaptureFault(reason) => {
                hub.end_epoch(&reason);
                // Retry loop reopens the device under a fresh epoch
            }
        }
    }

    tracing::info!("pipeline stopped");
}

enum EpochOutcome {
    Shutdown,
    CaptureFault(String),
}

fn stream_epoch(
    hub: &BroadcastHub,
    capture: &CaptureSource,
    frame_encoder: &mut FrameEncoder,
    shutdown: &AtomicBool,
) -> EpochOutcome {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return EpochOutcome::Shutdown;
        }

        match capture.next_frame(PULL_TIMEOUT) {
            Ok(Some(frame)) => {
                let chunk = frame_encoder.encode(&frame);
                hub.broadcast(chunk);

                let stats = frame_encoder.stats();
                if stats.frames_encoded % 1500 == 0 {
                    tracing::debug!(
                        epoch = frame_encoder.epoch(),
                        frames = stats.frames_encoded,
                        kib = stats.bytes_produced / 1024,
                        sessions = hub.session_count(),
                        overflows = capture.overflow_count(),
                        "pipeline stats"
                    );
                }
            }
            Ok(None) => {} // pull timeout, poll shutdown again
            Err(e) => {
                tracing::error!("capture fault: {}", e);
                return EpochOutcome::CaptureFault(e.to_string());
            }
        }
    }
}

fn sleep_interruptible(total: Duration, shutdown: &AtomicBool) {
    let step = Duration::from_millis(100);
    let mut remaining = total;
    while remaining > Duration::ZERO && !shutdown.load(Ordering::SeqCst) {
        let nap = remaining.min(step);
        thread::sleep(nap);
        remaining = remaining.saturating_sub(nap);
    }
}
