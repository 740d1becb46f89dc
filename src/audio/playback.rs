//! Audio playback to the output device
//!
//! ```text
//!  network arrival ──enqueue──▶ arrival channel ──mover task──▶ PlaybackBuffer ──callback──▶ device
//!   (bursty, async)              (bounded mpsc)    (polls 100ms)   (evicts oldest)   (every block)
//! ```
//!
//! The output callback never waits: each device block is either one whole
//! frame popped from the buffer or one whole block of silence.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::audio::backend::{AudioBackend, OutputSamples, StreamHandle};
use crate::audio::buffer::{AudioFrame, BufferStats, PlaybackBuffer, SharedPlaybackBuffer};
use crate::audio::clock::StreamConfig;
use crate::audio::PipelineEvent;
use crate::constants::PLAYBACK_POLL_INTERVAL;
use crate::error::PlaybackError;

/// Playback pipeline lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
}

#[derive(Debug, Default)]
struct PlaybackCounters {
    frames_played: AtomicU64,
    silent_blocks: AtomicU64,
    mismatched_frames: AtomicU64,
    arrivals_dropped: AtomicU64,
}

/// Playback statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub frames_played: u64,
    pub silent_blocks: u64,
    pub mismatched_frames: u64,
    pub arrivals_dropped: u64,
    pub buffer: BufferStats,
}

/// Fills device buffers on the real-time thread
struct OutputFiller {
    config: StreamConfig,
    block_len: usize,
    buffer: SharedPlaybackBuffer,
    counters: Arc<PlaybackCounters>,
}

impl OutputFiller {
    fn fill(&mut self, mut out: OutputSamples<'_>) {
        let total = out.len();
        let mut offset = 0;

        while offset < total {
            let remaining = total - offset;
            if remaining < self.block_len {
                // Host ignored the fixed block size; never play a partial frame
                out.silence(offset, remaining);
                self.counters.silent_blocks.fetch_add(1, Ordering::Relaxed);
                break;
            }

            match self.buffer.pop() {
                Some(frame) if frame.is_full_frame(&self.config) => {
                    out.write_from(offset, frame.samples());
                    self.counters.frames_played.fetch_add(1, Ordering::Relaxed);
                }
                Some(_) => {
                    out.silence(offset, self.block_len);
                    self.counters.mismatched_frames.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    out.silence(offset, self.block_len);
                    self.counters.silent_blocks.fetch_add(1, Ordering::Relaxed);
                }
            }
            offset += self.block_len;
        }
    }
}

/// Flags owned by one mover task; each start gets a fresh pair
#[derive(Clone)]
struct MoverFlags {
    /// Stop signal observed by the mover
    running: Arc<AtomicBool>,
    /// Cleared by the mover as it exits
    active: Arc<AtomicBool>,
}

impl MoverFlags {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct PlaybackControl {
    device: Option<String>,
    stream: Option<Box<dyn StreamHandle>>,
    arrivals: Option<mpsc::Sender<AudioFrame>>,
    mover: Option<MoverFlags>,
}

impl PlaybackControl {
    fn mover_running(&self) -> bool {
        self.mover.as_ref().is_some_and(MoverFlags::is_running)
    }
}

/// Jitter-buffered playback for one output device
pub struct AudioPlayback {
    backend: Arc<dyn AudioBackend>,
    config: StreamConfig,
    buffer: SharedPlaybackBuffer,
    control: Mutex<PlaybackControl>,
    counters: Arc<PlaybackCounters>,
    events: Option<UnboundedSender<PipelineEvent>>,
}

impl AudioPlayback {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        config: StreamConfig,
        capacity: usize,
        device: Option<String>,
    ) -> Self {
        Self {
            backend,
            config,
            buffer: Arc::new(PlaybackBuffer::new(capacity)),
            control: Mutex::new(PlaybackControl {
                device,
                ..Default::default()
            }),
            counters: Arc::new(PlaybackCounters::default()),
            events: None,
        }
    }

    /// Route device failures to `events`
    pub fn with_events(mut self, events: UnboundedSender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Open the output device and start the arrival mover
    ///
    /// Must be called from within a Tokio runtime. A no-op while playing.
    pub fn start(&self) -> Result<(), PlaybackError> {
        let mut control = self.control.lock();
        if control.mover_running() && control.stream.as_ref().is_some_and(|s| s.is_running())
        {
            return Ok(());
        }
        self.shutdown(&mut control);

        let mut filler = OutputFiller {
            config: self.config,
            block_len: self.config.samples_per_frame(),
            buffer: self.buffer.clone(),
            counters: self.counters.clone(),
        };
        let events = self.events.clone();
        let stream = self.backend.open_output(
            control.device.as_deref(),
            &self.config,
            Box::new(move |out| filler.fill(out)),
            Box::new(move |err| {
                if let Some(events) = events {
                    let _ = events.send(PipelineEvent::PlaybackFailed(err));
                }
            }),
        )?;

        let (arrivals_tx, arrivals_rx) = mpsc::channel(self.buffer.capacity());
        let mover = MoverFlags {
            running: Arc::new(AtomicBool::new(true)),
            active: Arc::new(AtomicBool::new(true)),
        };
        tokio::spawn(run_mover(arrivals_rx, self.buffer.clone(), mover.clone()));

        tracing::info!(
            "Audio playback started on {} (buffer {} frames)",
            stream.device_name(),
            self.buffer.capacity()
        );
        control.stream = Some(stream);
        control.arrivals = Some(arrivals_tx);
        control.mover = Some(mover);
        Ok(())
    }

    /// Queue an inbound frame for playback
    ///
    /// Waits only for room in the arrival channel, which the mover drains
    /// without blocking. Returns false if playback is not running.
    pub async fn enqueue(&self, frame: AudioFrame) -> bool {
        let arrivals = self.control.lock().arrivals.clone();
        let Some(arrivals) = arrivals else {
            self.counters.arrivals_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        if arrivals.send(frame).await.is_err() {
            self.counters.arrivals_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Close the device and drain the buffer; a no-op when idle
    pub fn stop(&self) {
        let mut control = self.control.lock();
        if control.stream.is_none() && !control.mover_running() {
            return;
        }
        self.shutdown(&mut control);
        tracing::info!("Audio playback stopped");
    }

    fn shutdown(&self, control: &mut PlaybackControl) {
        if let Some(mover) = control.mover.as_ref() {
            mover.running.store(false, Ordering::SeqCst);
        }
        // Closing the channel wakes the mover immediately; the flag covers
        // senders still held by in-flight enqueues
        control.arrivals.take();
        if let Some(mut stream) = control.stream.take() {
            stream.stop();
        }
        let drained = self.buffer.clear();
        if drained > 0 {
            tracing::debug!("Dropped {} buffered frames on playback stop", drained);
        }
    }

    /// Select a different output device
    ///
    /// An active stream is stopped; the caller restarts playback explicitly.
    /// Returns true if a running stream was stopped.
    pub fn set_device(&self, device: Option<String>) -> bool {
        let was_active = self.is_playing();
        if was_active {
            self.stop();
        }
        let mut control = self.control.lock();
        control.device = device;
        if was_active {
            tracing::info!(
                "Output device changed to {}; playback must be restarted",
                control.device.as_deref().unwrap_or("default")
            );
        }
        was_active
    }

    pub fn state(&self) -> PlaybackState {
        if self.is_playing() {
            PlaybackState::Playing
        } else {
            PlaybackState::Idle
        }
    }

    /// True while the device stream runs; false after stop or a device failure
    pub fn is_playing(&self) -> bool {
        let control = self.control.lock();
        control.mover_running() && control.stream.as_ref().is_some_and(|s| s.is_running())
    }

    /// Whether the mover task of the latest start is still running
    pub fn mover_active(&self) -> bool {
        self.control
            .lock()
            .mover
            .as_ref()
            .is_some_and(|mover| mover.active.load(Ordering::SeqCst))
    }

    pub fn device(&self) -> Option<String> {
        self.control.lock().device.clone()
    }

    pub fn buffer(&self) -> &SharedPlaybackBuffer {
        &self.buffer
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn stats(&self) -> PlaybackStats {
        PlaybackStats {
            frames_played: self.counters.frames_played.load(Ordering::Relaxed),
            silent_blocks: self.counters.silent_blocks.load(Ordering::Relaxed),
            mismatched_frames: self.counters.mismatched_frames.load(Ordering::Relaxed),
            arrivals_dropped: self.counters.arrivals_dropped.load(Ordering::Relaxed),
            buffer: self.buffer.stats(),
        }
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        let mut control = self.control.lock();
        self.shutdown(&mut control);
    }
}

/// Move frames from the arrival channel into the playback buffer until stopped
async fn run_mover(
    mut arrivals: mpsc::Receiver<AudioFrame>,
    buffer: SharedPlaybackBuffer,
    flags: MoverFlags,
) {
    while flags.is_running() {
        match tokio::time::timeout(PLAYBACK_POLL_INTERVAL, arrivals.recv()).await {
            Ok(Some(frame)) => {
                buffer.push(frame);
            }
            Ok(None) => break,
            Err(_) => continue,
        }
    }
    flags.active.store(false, Ordering::SeqCst);
}

/// Upper bound on how long the mover takes to notice a stop request
pub const fn stop_latency_bound() -> Duration {
    PLAYBACK_POLL_INTERVAL
}
