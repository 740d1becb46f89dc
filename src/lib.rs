//! # Realtime Voice
//!
//! Low-latency duplex audio client for real-time voice APIs.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                          RealtimeClient (client)                          │
//! │  ┌─────────────────────────────────────────────────────────────────────┐  │
//! │  │                  SessionHandle (session) - state machine            │  │
//! │  │       New → Connecting → Live → Closing → Closed                    │  │
//! │  └──────┬───────────────────┬───────────────────────────┬──────────────┘  │
//! │         │                   │                           │                 │
//! │         ▼                   ▼                           ▼                 │
//! │  ┌─────────────┐    ┌──────────────────┐       ┌──────────────────┐       │
//! │  │  Signaling  │    │  MediaTransport  │       │   Event Task     │       │
//! │  │ (signaling) │    │   (transport)    │──────▶│ tracks, state,   │       │
//! │  │ credential, │    │  peer session    │events │ transcripts,     │       │
//! │  │ SDP exchange│    └────▲────────┬────┘       │ stats monitor    │       │
//! │  └─────────────┘         │        │            └────────┬─────────┘       │
//! │                          │        │ remote frames       │                 │
//! │  ┌───────────────────────┴──┐  ┌──▼─────────────────────▼──────────────┐  │
//! │  │  Outbound Queue          │  │  Arrival channel → mover task         │  │
//! │  │  (audio::queue)          │  │  → PlaybackBuffer (evicts oldest)     │  │
//! │  │  drop-newest, lock-free  │  │  (audio::playback, audio::buffer)     │  │
//! │  └───────────▲──────────────┘  └──────────────────┬────────────────────┘  │
//! │              │                                    │                       │
//! │  ┌───────────┴──────────────┐       ┌─────────────▼────────────┐          │
//! │  │ Capture callback         │       │ Output callback          │          │
//! │  │ (audio::capture)         │       │ frame or silence         │          │
//! │  │ re-chunk, stamp pts      │       │ per device block         │          │
//! │  └───────────▲──────────────┘       └─────────────┬────────────┘          │
//! └──────────────┼────────────────────────────────────┼───────────────────────┘
//!                │        AudioBackend (cpal)         │
//!          ┌─────┴──────┐                       ┌─────▼──────┐
//!          │ Microphone │                       │  Speakers  │
//!          └────────────┘                       └────────────┘
//! ```

pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod session;
pub mod signaling;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{RealtimeClient, RealtimeClientBuilder};
pub use config::ClientConfig;
pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default frame duration in milliseconds
    pub const DEFAULT_FRAME_DURATION_MS: u32 = 20;

    /// Playback jitter buffer depth in frames (about 1 s at 20 ms)
    pub const DEFAULT_PLAYBACK_CAPACITY: usize = 50;

    /// Outbound queue depth in frames
    pub const DEFAULT_OUTBOUND_CAPACITY: usize = 50;

    /// Upper bound on how long background tasks take to notice a stop
    pub const PLAYBACK_POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Interval between pipeline statistics reports
    pub const STATS_INTERVAL: Duration = Duration::from_secs(5);

    /// Session event broadcast depth
    pub const EVENT_CHANNEL_CAPACITY: usize = 64;

    /// Default realtime model
    pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview";

    /// Default API base URL
    pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

    /// Default system instructions sent with the session request
    pub const DEFAULT_INSTRUCTIONS: &str = "You are a friendly assistant.";

    /// Default HTTP request timeout for signaling
    pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

    /// Public STUN server used when none is configured
    pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
}
