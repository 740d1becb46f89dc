//! Frame clock
//!
//! Derives fixed-duration frame boundaries from a fixed sample rate. Every
//! pipeline receives one immutable [`StreamConfig`] at construction; changing
//! any of its values means building a new pipeline.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{DEFAULT_CHANNELS, DEFAULT_FRAME_DURATION_MS, DEFAULT_SAMPLE_RATE};
use crate::error::ConfigError;

/// Audio stream parameters shared by capture, playback and transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Duration of one frame in milliseconds
    pub frame_duration_ms: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frame_duration_ms: DEFAULT_FRAME_DURATION_MS,
        }
    }
}

impl StreamConfig {
    /// Create a validated stream configuration
    pub fn new(sample_rate: u32, channels: u16, frame_duration_ms: u32) -> Result<Self, ConfigError> {
        let config = Self {
            sample_rate,
            channels,
            frame_duration_ms,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants every pipeline relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidStream("sample rate must be positive".into()));
        }
        if self.channels == 0 {
            return Err(ConfigError::InvalidStream("channel count must be positive".into()));
        }
        if self.frame_duration_ms == 0 {
            return Err(ConfigError::InvalidStream("frame duration must be positive".into()));
        }
        if self.frame_sample_count() == 0 {
            return Err(ConfigError::InvalidStream(format!(
                "{} Hz at {} ms yields an empty frame",
                self.sample_rate, self.frame_duration_ms
            )));
        }
        Ok(())
    }

    /// Samples per channel in one frame, rounded to the nearest integer
    pub fn frame_sample_count(&self) -> usize {
        let product = self.sample_rate as u64 * self.frame_duration_ms as u64;
        ((product + 500) / 1000) as usize
    }

    /// Interleaved samples in one full frame
    pub fn samples_per_frame(&self) -> usize {
        self.frame_sample_count() * self.channels as usize
    }

    /// Wall-clock length of one frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_duration_ms as u64)
    }

    /// Convert a sample-count timestamp into elapsed stream time
    pub fn pts_to_duration(&self, pts: u64) -> Duration {
        Duration::from_micros(pts * 1_000_000 / self.sample_rate as u64)
    }
}

/// Monotonic sample counter used to timestamp frames
///
/// Lives inside the hardware callback, so it is a plain counter with no
/// synchronization.
#[derive(Debug, Clone, Default)]
pub struct FrameClock {
    next_pts: u64,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock that continues from an earlier producer's position
    pub fn starting_at(next_pts: u64) -> Self {
        Self { next_pts }
    }

    /// Claim a timestamp for a frame of `frame_samples` samples per channel
    pub fn advance(&mut self, frame_samples: usize) -> u64 {
        let pts = self.next_pts;
        self.next_pts += frame_samples as u64;
        pts
    }

    /// Timestamp the next frame will receive
    pub fn peek(&self) -> u64 {
        self.next_pts
    }

    pub fn reset(&mut self) {
        self.next_pts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_frame_is_960_samples() {
        let config = StreamConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.frame_sample_count(), 960);
        assert_eq!(config.samples_per_frame(), 960);
        assert_eq!(config.frame_duration(), Duration::from_millis(20));
    }

    #[test]
    fn test_rounding() {
        // 44.1 kHz at 10 ms is exactly 441
        assert_eq!(StreamConfig::new(44100, 2, 10).unwrap().frame_sample_count(), 441);
        // 22050 * 3 / 1000 = 66.15 -> 66
        assert_eq!(StreamConfig::new(22050, 1, 3).unwrap().frame_sample_count(), 66);
        assert_eq!(StreamConfig::new(11025, 1, 2).unwrap().frame_sample_count(), 22);
        assert_eq!(StreamConfig::new(8000, 1, 1).unwrap().frame_sample_count(), 8);
        // 700 * 1 / 1000 = 0.7 -> 1
        assert_eq!(StreamConfig::new(700, 1, 1).unwrap().frame_sample_count(), 1);
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert!(StreamConfig::new(0, 1, 20).is_err());
        assert!(StreamConfig::new(48000, 0, 20).is_err());
        assert!(StreamConfig::new(48000, 1, 0).is_err());
        // 400 Hz at 1 ms rounds to zero samples
        assert!(StreamConfig::new(400, 1, 1).is_err());
    }

    #[test]
    fn test_frame_clock_advances_by_frame() {
        let mut clock = FrameClock::new();
        let stamps: Vec<u64> = (0..5).map(|_| clock.advance(960)).collect();
        assert_eq!(stamps, vec![0, 960, 1920, 2880, 3840]);
        assert_eq!(clock.peek(), 4800);

        clock.reset();
        assert_eq!(clock.advance(960), 0);

        let mut resumed = FrameClock::starting_at(1920);
        assert_eq!(resumed.advance(960), 1920);
        assert_eq!(resumed.peek(), 2880);
    }

    #[test]
    fn test_pts_to_duration() {
        let config = StreamConfig::default();
        assert_eq!(config.pts_to_duration(48000), Duration::from_secs(1));
        assert_eq!(config.pts_to_duration(960), Duration::from_millis(20));
    }

    proptest! {
        #[test]
        fn prop_frame_sample_count_matches_rounded_product(
            sample_rate in 8000u32..=192_000,
            channels in 1u16..=8,
            frame_ms in 1u32..=120,
        ) {
            let config = StreamConfig::new(sample_rate, channels, frame_ms).unwrap();
            let expected = (sample_rate as f64 * frame_ms as f64 / 1000.0).round() as usize;
            prop_assert_eq!(config.frame_sample_count(), expected);
            prop_assert!(config.frame_sample_count() > 0);
            prop_assert_eq!(config.samples_per_frame(), expected * channels as usize);
        }
    }
}
