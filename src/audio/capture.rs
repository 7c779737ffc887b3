//! Audio capture source
//!
//! Adapts cpal's push-based capture callback into the pipeline's
//! pull contract: the callback slices incoming samples into fixed-size
//! frames and hands them off through a bounded channel; the pipeline
//! thread blocks on `next_frame`.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::device::resolve_capture_device;
use crate::audio::frame::AudioFrame;
use crate::config::CaptureConfig;
use crate::constants::CAPTURE_QUEUE_CAPACITY;
use crate::error::AudioError;
use crate::protocol::StreamFormat;

/// A running capture stream for one input device.
///
/// Frames carry sequence numbers assigned at capture time; exactly one
/// source is active per server process. Dropping the source stops the
/// capture thread.
pub struct CaptureSource {
    device_name: String,
    format: StreamFormat,
    frame_rx: Receiver<AudioFrame>,
    error_rx: Receiver<AudioError>,
    running: Arc<AtomicBool>,
    overflows: Arc<AtomicU64>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CaptureSource {
    /// Open the configured device and start capturing
    pub fn open(config: &CaptureConfig) -> Result<Self, AudioError> {
        let device = resolve_capture_device(config.device.as_deref())?;
        let device_name = device.name.clone();

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let format = StreamFormat::new(config.sample_rate, config.channels);
        let samples_per_chunk = config.samples_per_chunk();
        if samples_per_chunk == 0 {
            return Err(AudioError::UnsupportedFormat(format!(
                "chunk of {}ms at {}Hz yields no samples",
                config.chunk_ms, config.sample_rate
            )));
        }

        let (frame_tx, frame_rx) = bounded::<AudioFrame>(CAPTURE_QUEUE_CAPACITY);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running = Arc::new(AtomicBool::new(true));
        let overflows = Arc::new(AtomicU64::new(0));

        let running_cb = running.clone();
        let running_loop = running.clone();
        let overflows_cb = overflows.clone();
        let channels = config.channels;
        let sample_rate = config.sample_rate;

        // cpal streams are !Send, so the stream lives on its own thread
        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let start_time = Instant::now();
                let mut sequence: u64 = 0;
                let mut accumulator: Vec<f32> = Vec::with_capacity(samples_per_chunk * 2);

                let stream = cpal_device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running_cb.load(Ordering::Relaxed) {
                            return;
                        }

                        accumulator.extend_from_slice(data);

                        // Emit every complete fixed-size frame
                        while accumulator.len() >= samples_per_chunk {
                            let samples: Vec<f32> =
                                accumulator.drain(..samples_per_chunk).collect();
                            let timestamp_us = start_time.elapsed().as_micros() as u64;
                            let frame =
                                AudioFrame::new(samples, channels, timestamp_us, sequence);
                            sequence += 1;

                            if frame_tx.try_send(frame).is_err() {
                                overflows_cb.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::CaptureFault(err.to_string()));
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                            return;
                        }
                        let _ = ready_tx.send(Ok(()));

                        while running_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                        // Stream drops here, stopping capture
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        // Fail open() if the stream could not start
        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                return Err(AudioError::StreamError(
                    "capture thread did not report readiness".to_string(),
                ));
            }
        }

        tracing::info!(device = %device_name, sample_rate, channels, "capture started");

        Ok(Self {
            device_name,
            format,
            frame_rx,
            error_rx,
            running,
            overflows,
            thread_handle: Some(handle),
        })
    }

    /// Pull the next captured frame, blocking up to `timeout`.
    ///
    /// Returns `Ok(None)` on timeout so the caller can poll shutdown.
    /// A pending stream error or closed capture thread surfaces as a
    /// capture fault, fatal to the current epoch.
    pub fn next_frame(&self, timeout: Duration) -> Result<Option<AudioFrame>, AudioError> {
        if let Ok(err) = self.error_rx.try_recv() {
            return Err(err);
        }

        match self.frame_rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => {
                if self.running.load(Ordering::SeqCst) {
                    Ok(None)
                } else {
                    Err(AudioError::CaptureStopped)
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(AudioError::CaptureFault(
                "capture thread terminated".to_string(),
            )),
        }
    }

    /// PCM format of this capture, fixed for the epoch's lifetime
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Frames dropped because the pipeline fell behind the device
    pub fn overflow_count(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    /// Stop the capture thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.stop();
    }
}
