//! Audio capture from the input device
//!
//! The hardware callback assembles fixed-size frames, stamps them with a
//! monotonic sample counter and pushes them into the outbound queue without
//! blocking. Everything else (start, stop, device switches) happens on the
//! control side through `&mut self`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::audio::backend::{AudioBackend, InputSamples, StreamHandle};
use crate::audio::buffer::AudioFrame;
use crate::audio::clock::{FrameClock, StreamConfig};
use crate::audio::queue::FrameSink;
use crate::audio::PipelineEvent;
use crate::error::CaptureError;

/// Capture pipeline lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Recording,
    Paused,
    Stopping,
}

/// Counters updated from the capture callback
#[derive(Debug, Default)]
struct CaptureCounters {
    callbacks: AtomicU64,
    frames: AtomicU64,
    dropped: AtomicU64,
    samples: AtomicU64,
}

/// Capture statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub callbacks: u64,
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub samples_captured: u64,
}

/// Builds frames on the real-time thread
///
/// Owned by the input callback. When the stream is torn down the callback is
/// dropped, which flushes any partial frame as the short final frame.
struct FrameAssembler {
    config: StreamConfig,
    frame_len: usize,
    pending: Vec<i16>,
    clock: FrameClock,
    sink: FrameSink,
    paused: Arc<AtomicBool>,
    was_paused: bool,
    counters: Arc<CaptureCounters>,
}

impl FrameAssembler {
    fn new(
        config: StreamConfig,
        sink: FrameSink,
        paused: Arc<AtomicBool>,
        counters: Arc<CaptureCounters>,
    ) -> Self {
        let frame_len = config.samples_per_frame();
        // Continue the timeline of whichever producer fed this queue before
        let clock = FrameClock::starting_at(sink.next_pts());
        Self {
            config,
            frame_len,
            pending: Vec::with_capacity(frame_len),
            clock,
            sink,
            paused,
            was_paused: false,
            counters,
        }
    }

    fn process(&mut self, data: InputSamples<'_>) {
        self.counters.callbacks.fetch_add(1, Ordering::Relaxed);

        if self.paused.load(Ordering::Relaxed) {
            // Samples collected before the pause never join post-pause audio
            if !self.was_paused {
                self.pending.clear();
                self.was_paused = true;
            }
            return;
        }
        self.was_paused = false;

        for index in 0..data.len() {
            self.pending.push(data.get_i16(index));
            if self.pending.len() == self.frame_len {
                self.emit();
            }
        }
    }

    fn emit(&mut self) {
        // The only allocation on this thread: each frame owns its samples and
        // moves into the queue, so the next frame needs a fresh buffer
        let samples = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_len));
        let per_channel = samples.len() / self.config.channels as usize;
        // The clock advances even if the push fails: it tracks the device, not the queue
        let pts = self.clock.advance(per_channel);
        self.sink.set_next_pts(self.clock.peek());

        self.counters.samples.fetch_add(per_channel as u64, Ordering::Relaxed);
        let frame = AudioFrame::new(samples, self.config.channels, self.config.sample_rate, pts);
        if self.sink.push(frame) {
            self.counters.frames.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn flush(&mut self) {
        if !self.pending.is_empty() && !self.paused.load(Ordering::Relaxed) {
            self.emit();
        }
    }
}

impl Drop for FrameAssembler {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Audio capture instance for a single input device
pub struct AudioCapture {
    backend: Arc<dyn AudioBackend>,
    config: StreamConfig,
    /// Device selector, None for the host default
    device: Option<String>,
    state: CaptureState,
    stream: Option<Box<dyn StreamHandle>>,
    paused: Arc<AtomicBool>,
    counters: Arc<CaptureCounters>,
    events: Option<UnboundedSender<PipelineEvent>>,
}

impl AudioCapture {
    pub fn new(backend: Arc<dyn AudioBackend>, config: StreamConfig, device: Option<String>) -> Self {
        Self {
            backend,
            config,
            device,
            state: CaptureState::Idle,
            stream: None,
            paused: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(CaptureCounters::default()),
            events: None,
        }
    }

    /// Route device failures to `events`
    pub fn with_events(mut self, events: UnboundedSender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Start capturing into `sink`; a no-op while already recording
    pub fn start(&mut self, sink: FrameSink) -> Result<(), CaptureError> {
        match self.state() {
            CaptureState::Recording | CaptureState::Paused => return Ok(()),
            CaptureState::Idle | CaptureState::Stopping => {}
        }
        // A stream that failed on its own still holds a handle
        self.release_stream();

        self.paused.store(false, Ordering::SeqCst);
        let mut assembler =
            FrameAssembler::new(self.config, sink, self.paused.clone(), self.counters.clone());

        let events = self.events.clone();
        let stream = self.backend.open_input(
            self.device.as_deref(),
            &self.config,
            Box::new(move |data| assembler.process(data)),
            Box::new(move |err| {
                if let Some(events) = events {
                    let _ = events.send(PipelineEvent::CaptureFailed(err));
                }
            }),
        )?;

        tracing::info!(
            "Audio capture started on {} ({} samples/frame)",
            stream.device_name(),
            self.config.frame_sample_count()
        );
        self.stream = Some(stream);
        self.state = CaptureState::Recording;
        Ok(())
    }

    /// Stop producing frames; the device keeps running
    pub fn pause(&mut self) {
        if self.state() == CaptureState::Recording {
            self.paused.store(true, Ordering::SeqCst);
            self.state = CaptureState::Paused;
            tracing::debug!("Audio capture paused");
        }
    }

    pub fn resume(&mut self) {
        if self.state() == CaptureState::Paused {
            self.paused.store(false, Ordering::SeqCst);
            self.state = CaptureState::Recording;
            tracing::debug!("Audio capture resumed");
        }
    }

    /// Halt the stream and release the device; a no-op when idle
    pub fn stop(&mut self) {
        if self.state == CaptureState::Idle && self.stream.is_none() {
            return;
        }
        self.state = CaptureState::Stopping;
        self.release_stream();
        self.paused.store(false, Ordering::SeqCst);
        self.state = CaptureState::Idle;
        tracing::info!("Audio capture stopped");
    }

    /// Select a different input device
    ///
    /// An active stream is stopped and released; the caller restarts
    /// capture explicitly once it has a sink for the new device.
    /// Returns true if a running stream was stopped.
    pub fn set_device(&mut self, device: Option<String>) -> bool {
        self.device = device;
        let was_active = self.is_active();
        if was_active {
            self.stop();
            tracing::info!(
                "Input device changed to {}; capture must be restarted",
                self.device.as_deref().unwrap_or("default")
            );
        }
        was_active
    }

    fn release_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
    }

    /// Current state; a stream that failed on its own reads as Idle
    pub fn state(&self) -> CaptureState {
        match (&self.state, &self.stream) {
            (CaptureState::Recording | CaptureState::Paused, Some(stream)) if !stream.is_running() => {
                CaptureState::Idle
            }
            (state, _) => *state,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state(), CaptureState::Recording | CaptureState::Paused)
    }

    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            callbacks: self.counters.callbacks.load(Ordering::Relaxed),
            frames_captured: self.counters.frames.load(Ordering::Relaxed),
            frames_dropped: self.counters.dropped.load(Ordering::Relaxed),
            samples_captured: self.counters.samples.load(Ordering::Relaxed),
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.release_stream();
    }
}
