//! Caller-facing client
//!
//! Owns configuration, the single session handle and the transcription
//! callback. The media transport has no default and must be supplied; the
//! audio backend defaults to cpal and signaling to the HTTP client.

use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use crate::audio::{AudioBackend, CaptureState, CpalBackend, PlaybackState};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::session::{
    Collaborators, SessionEvent, SessionHandle, SessionState, SessionStats, TranscriptionCallback,
    TranscriptionSlot,
};
use crate::signaling::{OpenAiSignaling, Signaling};
use crate::transport::MediaTransport;

pub struct RealtimeClientBuilder {
    config: ClientConfig,
    transport: Arc<dyn MediaTransport>,
    backend: Option<Arc<dyn AudioBackend>>,
    signaling: Option<Arc<dyn Signaling>>,
    on_transcription: Option<TranscriptionCallback>,
}

impl RealtimeClientBuilder {
    pub fn backend(mut self, backend: Arc<dyn AudioBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn signaling(mut self, signaling: Arc<dyn Signaling>) -> Self {
        self.signaling = Some(signaling);
        self
    }

    pub fn on_transcription(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_transcription = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> Result<RealtimeClient> {
        self.config.validate()?;

        let backend = match self.backend {
            Some(backend) => backend,
            None => Arc::new(CpalBackend::new()),
        };
        let signaling = match self.signaling {
            Some(signaling) => signaling,
            None => Arc::new(OpenAiSignaling::new(&self.config)?),
        };

        let transcription = TranscriptionSlot::new();
        if let Some(callback) = self.on_transcription {
            transcription.set(callback);
        }

        let session = SessionHandle::new(
            self.config,
            Collaborators {
                backend,
                transport: self.transport,
                signaling,
            },
            transcription.clone(),
        );
        tracing::debug!("Realtime client created (session {})", session.id());
        Ok(RealtimeClient {
            session,
            transcription,
        })
    }
}

/// Streams microphone audio to the realtime API and plays back its replies
pub struct RealtimeClient {
    session: SessionHandle,
    transcription: TranscriptionSlot,
}

impl RealtimeClient {
    pub fn builder(config: ClientConfig, transport: Arc<dyn MediaTransport>) -> RealtimeClientBuilder {
        RealtimeClientBuilder {
            config,
            transport,
            backend: None,
            signaling: None,
            on_transcription: None,
        }
    }

    /// Client with the cpal backend and HTTP signaling
    pub fn new(config: ClientConfig, transport: Arc<dyn MediaTransport>) -> Result<Self> {
        Self::builder(config, transport).build()
    }

    /// Replace the transcription callback; the previous one is dropped
    pub fn set_on_transcription(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.transcription.set(Arc::new(callback));
    }

    pub fn clear_on_transcription(&self) {
        self.transcription.clear();
    }

    pub async fn start(&self) -> Result<()> {
        self.session.start().await
    }

    pub async fn stop(&self) {
        self.session.stop().await
    }

    pub async fn pause(&self) -> Result<()> {
        self.session.pause().await
    }

    pub async fn resume(&self) -> Result<()> {
        self.session.resume().await
    }

    /// See [`SessionHandle::set_input_device`]
    pub async fn set_input_device(&self, device: Option<String>) -> bool {
        self.session.set_input_device(device).await
    }

    /// See [`SessionHandle::set_output_device`]
    pub async fn set_output_device(&self, device: Option<String>) -> bool {
        self.session.set_output_device(device).await
    }

    pub async fn restart_capture(&self) -> Result<()> {
        self.session.restart_capture().await
    }

    pub async fn restart_playback(&self) -> Result<()> {
        self.session.restart_playback().await
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_streaming(&self) -> bool {
        self.session.state() == SessionState::Live
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.session.watch_state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    pub async fn capture_state(&self) -> CaptureState {
        self.session.capture_state().await
    }

    pub async fn playback_state(&self) -> PlaybackState {
        self.session.playback_state().await
    }

    pub async fn stats(&self) -> SessionStats {
        self.session.stats().await
    }

    pub fn config(&self) -> &ClientConfig {
        self.session.config()
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }
}
