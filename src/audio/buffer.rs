//! Audio frames and the lock-free playback buffer
//!
//! The playback buffer sits between network arrival (bursty) and the output
//! device callback (strictly periodic). It is bounded and evicts its oldest
//! frame on overflow, so worst-case playback latency is capped at
//! `capacity × frame_duration` no matter how far the network runs ahead.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::clock::StreamConfig;

/// One frame of interleaved 16-bit PCM
///
/// Frames are immutable once built: capture creates them on each hardware
/// callback, the transport creates them for each inbound packet, and each is
/// consumed exactly once by its queue's consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    channels: u16,
    sample_rate: u32,
    pts: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, channels: u16, sample_rate: u32, pts: u64) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
            pts,
        }
    }

    /// A full frame of silence for the given stream
    pub fn silence(config: &StreamConfig, pts: u64) -> Self {
        Self::new(
            vec![0; config.samples_per_frame()],
            config.channels,
            config.sample_rate,
            pts,
        )
    }

    /// Interleaved samples
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Sample-count timestamp of the first sample in this frame
    pub fn pts(&self) -> u64 {
        self.pts
    }

    /// Get number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Get frame duration
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.samples_per_channel() as u64 * 1_000_000 / self.sample_rate as u64)
    }

    /// Whether the frame holds exactly one full frame for `config`
    pub fn is_full_frame(&self, config: &StreamConfig) -> bool {
        self.channels == config.channels && self.samples.len() == config.samples_per_frame()
    }
}

/// Bounded, evicting buffer of frames awaiting playback
pub struct PlaybackBuffer {
    queue: ArrayQueue<AudioFrame>,
    pushed: AtomicU64,
    evicted: AtomicU64,
    underruns: AtomicU64,
}

impl PlaybackBuffer {
    /// Create a buffer holding at most `capacity` frames (at least one)
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            pushed: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
        }
    }

    /// Append a frame, evicting and returning the oldest one if full
    pub fn push(&self, frame: AudioFrame) -> Option<AudioFrame> {
        self.pushed.fetch_add(1, Ordering::Relaxed);
        let evicted = self.queue.force_push(frame);
        if evicted.is_some() {
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Pop the oldest frame
    /// Returns None if buffer is empty (underrun)
    pub fn pop(&self) -> Option<AudioFrame> {
        match self.queue.pop() {
            Some(frame) => Some(frame),
            None => {
                self.underruns.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Try to pop without counting underrun
    pub fn try_pop(&self) -> Option<AudioFrame> {
        self.queue.pop()
    }

    /// Discard every buffered frame, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut drained = 0;
        while self.queue.pop().is_some() {
            drained += 1;
        }
        drained
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            level: self.len(),
            capacity: self.capacity(),
            pushed: self.pushed.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
        }
    }
}

/// Thread-safe handle to a playback buffer
pub type SharedPlaybackBuffer = Arc<PlaybackBuffer>;

/// Playback buffer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub level: usize,
    pub capacity: usize,
    pub pushed: u64,
    pub evicted: u64,
    pub underruns: u64,
}
