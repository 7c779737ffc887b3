//! Audio output for the native player
//!
//! The output stream lives on a dedicated thread (cpal streams are not
//! `Send`). Its callback pulls decoded chunks from the shared jitter
//! buffer at the device's native rate and renders silence while the
//! buffer is pre-rolling or starved.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::resolve_output_device;
use crate::client::jitter::{JitterBuffer, Pop};
use crate::error::PlaybackError;
use crate::protocol::{pcm_i16le_to_f32, StreamFormat};

/// Handle to the playback thread.
///
/// The engine pushes a format on each epoch start; the thread rebuilds
/// its output stream whenever the format changes.
pub struct PlaybackHandle {
    format_tx: Sender<StreamFormat>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl PlaybackHandle {
    /// Announce the stream format for the current epoch
    pub fn set_format(&self, format: StreamFormat) {
        let _ = self.format_tx.send(format);
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn the playback thread. No stream is opened until the first
/// format announcement arrives.
pub fn spawn_playback(
    output_device: Option<String>,
    jitter: Arc<Mutex<JitterBuffer>>,
) -> PlaybackHandle {
    let (format_tx, format_rx) = bounded::<StreamFormat>(4);
    let running = Arc::new(AtomicBool::new(true));
    let running_thread = running.clone();

    let thread_handle = thread::Builder::new()
        .name("audio-playback".to_string())
        .spawn(move || {
            playback_thread(output_device, jitter, format_rx, running_thread);
        })
        .ok();

    PlaybackHandle {
        format_tx,
        running,
        thread_handle,
    }
}

fn playback_thread(
    output_device: Option<String>,
    jitter: Arc<Mutex<JitterBuffer>>,
    format_rx: Receiver<StreamFormat>,
    running: Arc<AtomicBool>,
) {
    let mut current: Option<(StreamFormat, cpal::Stream)> = None;

    while running.load(Ordering::SeqCst) {
        match format_rx.recv_timeout(Duration::from_millis(250)) {
            Ok(format) => {
                if current.as_ref().map(|(f, _)| *f) == Some(format) {
                    continue;
                }
                // Drop the old stream before opening the device anew
                current = None;
                match build_output_stream(output_device.as_deref(), format, jitter.clone()) {
                    Ok(stream) => {
                        tracing::info!(
                            sample_rate = format.sample_rate,
                            channels = format.channels,
                            "playback stream started"
                        );
                        current = Some((format, stream));
                    }
                    Err(e) => {
                        tracing::error!("failed to open output stream: {}", e);
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn build_output_stream(
    device_name: Option<&str>,
    format: StreamFormat,
    jitter: Arc<Mutex<JitterBuffer>>,
) -> Result<cpal::Stream, PlaybackError> {
    let device = resolve_output_device(device_name)
        .map_err(|e| PlaybackError::DeviceNotFound(e.to_string()))?;

    let config = cpal::StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    // Samples decoded from a chunk but not yet consumed by the callback
    let mut pending: Vec<f32> = Vec::new();

    let stream = device
        .inner()
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut filled = 0;

                while filled < data.len() {
                    if !pending.is_empty() {
                        let n = pending.len().min(data.len() - filled);
                        data[filled..filled + n].copy_from_slice(&pending[..n]);
                        pending.drain(..n);
                        filled += n;
                        continue;
                    }

                    match jitter.lock().pop() {
                        Pop::Ready(chunk) => {
                            pending = pcm_i16le_to_f32(&chunk.payload);
                        }
                        Pop::Skipped(_) => {
                            // Lost chunk: move on to the next one
                            continue;
                        }
                        Pop::Starved => break,
                    }
                }

                // Silence for whatever the buffer could not supply
                for sample in &mut data[filled..] {
                    *sample = 0.0;
                }
            },
            move |err| {
                tracing::error!("output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| PlaybackError::StreamError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| PlaybackError::StreamError(e.to_string()))?;

    Ok(stream)
}
