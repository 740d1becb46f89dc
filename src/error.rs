//! Error types for the realtime voice client

use thiserror::Error;

/// Main error type for the client
#[derive(Error, Debug)]
pub enum Error {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio hardware errors, fatal to the pipeline that owns the device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Stream failed while running: {0}")]
    StreamFailed(String),
}

/// Errors raised by the capture pipeline
pub type CaptureError = DeviceError;

/// Errors raised by the playback pipeline
pub type PlaybackError = DeviceError;

/// Credential issuance and session description exchange failures
#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Ephemeral credential expired")]
    CredentialExpired,

    #[error("Missing API key")]
    MissingApiKey,
}

/// Media transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to create session: {0}")]
    CreateSession(String),

    #[error("Failed to add local source: {0}")]
    AddSource(String),

    #[error("Session description error: {0}")]
    Description(String),

    #[error("Remote stream ended")]
    StreamEnded,
}

/// Session lifecycle misuse
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session is already streaming")]
    AlreadyStreaming,

    #[error("Session is not live")]
    NotLive,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid stream configuration: {0}")]
    InvalidStream(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
}

impl From<cpal::BuildStreamError> for DeviceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => {
                DeviceError::DeviceUnavailable(err.to_string())
            }
            cpal::BuildStreamError::StreamConfigNotSupported => {
                DeviceError::UnsupportedFormat(err.to_string())
            }
            other => DeviceError::StreamError(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for DeviceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        DeviceError::StreamError(err.to_string())
    }
}

impl From<cpal::StreamError> for DeviceError {
    fn from(err: cpal::StreamError) -> Self {
        DeviceError::StreamFailed(err.to_string())
    }
}

/// Result type alias for the client
pub type Result<T> = std::result::Result<T, Error>;
