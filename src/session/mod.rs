//! Session state machine
//!
//! ```text
//!   New ──start──▶ Connecting ──(a)..(e) ok──▶ Live ──stop──▶ Closing ──▶ Closed
//!                       │                                                   ▲
//!                       └──────────── any step fails (full teardown) ───────┘
//! ```
//!
//! Start and stop are serialized by an async mutex. The session owns both
//! audio pipelines and the peer connection; teardown always runs in the
//! same order: playback, capture, transport, signaling.

mod events;
pub mod transcript;

pub use transcript::{Speaker, Transcript, TranscriptionCallback, TranscriptionSlot};

use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use self::events::{run_events, EventContext};
use crate::audio::{
    on_device_thread, outbound_queue, AudioBackend, AudioCapture, AudioPlayback, CaptureState,
    CaptureStats, FrameSink, PipelineEvent, PlaybackState, PlaybackStats, QueueCounters,
};
use crate::config::ClientConfig;
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::error::{Result, SessionError};
use crate::signaling::Signaling;
use crate::transport::{ConnectionState, MediaTransport, PeerConnection, PeerSession};

/// Lifecycle of a session handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Connecting,
    Live,
    Closing,
    Closed,
}

impl SessionState {
    /// Connecting or Live
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Live)
    }
}

/// Notifications broadcast to subscribers
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    ConnectionState(ConnectionState),
    Transcript(Transcript),
    Pipeline(PipelineEvent),
}

/// Snapshot of the session's pipeline counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub capture: CaptureStats,
    pub playback: PlaybackStats,
    pub outbound_sent: u64,
    pub outbound_dropped: u64,
}

/// External collaborators a session drives
#[derive(Clone)]
pub struct Collaborators {
    pub backend: Arc<dyn AudioBackend>,
    pub transport: Arc<dyn MediaTransport>,
    pub signaling: Arc<dyn Signaling>,
}

type SharedCapture = Arc<SyncMutex<AudioCapture>>;

#[derive(Default)]
struct SessionInner {
    input_device: Option<String>,
    output_device: Option<String>,
    capture: Option<SharedCapture>,
    playback: Option<Arc<AudioPlayback>>,
    /// Kept so the transport's source stays open across capture restarts
    sink: Option<FrameSink>,
    outbound: Option<Arc<QueueCounters>>,
    peer: Option<Box<dyn PeerSession>>,
    event_task: Option<JoinHandle<()>>,
}

/// One connection to the realtime API and the audio pipelines behind it
pub struct SessionHandle {
    id: Uuid,
    config: ClientConfig,
    collaborators: Collaborators,
    transcription: TranscriptionSlot,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    inner: Mutex<SessionInner>,
}

impl SessionHandle {
    pub fn new(
        config: ClientConfig,
        collaborators: Collaborators,
        transcription: TranscriptionSlot,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::New);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = SessionInner {
            input_device: config.input_device.clone(),
            output_device: config.output_device.clone(),
            ..Default::default()
        };
        Self {
            id: Uuid::new_v4(),
            config,
            collaborators,
            transcription,
            state,
            events,
            inner: Mutex::new(inner),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("Session {} state {:?} -> {:?}", self.id, previous, state);
            let _ = self.events.send(SessionEvent::StateChanged(state));
        }
    }

    fn span(&self) -> tracing::Span {
        tracing::info_span!("session", id = %self.id)
    }

    /// Connect and start streaming
    ///
    /// Valid from New or Closed. On failure every partially started resource
    /// is torn down, the session ends Closed and the original error returns.
    pub async fn start(&self) -> Result<()> {
        if self.state().is_active() {
            return Err(SessionError::AlreadyStreaming.into());
        }
        let mut inner = self.inner.lock().await;
        match self.state() {
            SessionState::New | SessionState::Closed => {}
            SessionState::Connecting | SessionState::Live | SessionState::Closing => {
                return Err(SessionError::AlreadyStreaming.into());
            }
        }

        self.set_state(SessionState::Connecting);
        match self.connect(&mut inner).instrument(self.span()).await {
            Ok(()) => {
                self.set_state(SessionState::Live);
                tracing::info!("Session {} is live", self.id);
                Ok(())
            }
            Err(err) => {
                tracing::error!("Session {} failed to start: {}", self.id, err);
                self.teardown(&mut inner).instrument(self.span()).await;
                Err(err)
            }
        }
    }

    async fn connect(&self, inner: &mut SessionInner) -> Result<()> {
        let Collaborators {
            backend,
            transport,
            signaling,
        } = &self.collaborators;
        let (pipeline_tx, pipeline_rx) = mpsc::unbounded_channel();

        // (a) peer connection, with playback ready for early remote audio
        tracing::debug!("Creating peer connection");
        let PeerConnection {
            session: peer,
            events: transport_events,
        } = transport.create_session(&self.config.ice_servers).await?;
        inner.peer = Some(peer);

        let playback = Arc::new(
            AudioPlayback::new(
                backend.clone(),
                self.config.stream,
                self.config.playback_capacity,
                inner.output_device.clone(),
            )
            .with_events(pipeline_tx.clone()),
        );
        inner.playback = Some(playback.clone());
        let starting = playback.clone();
        on_device_thread(move || starting.start()).await??;

        let (sink, source) = outbound_queue(self.config.outbound_capacity);
        let outbound = sink.counters();
        inner.outbound = Some(outbound.clone());
        let ctx = EventContext {
            playback,
            outbound,
            events: self.events.clone(),
            transcription: self.transcription.clone(),
        };
        inner.event_task = Some(tokio::spawn(
            run_events(ctx, transport_events, pipeline_rx).instrument(self.span()),
        ));

        // (b) capture feeds the transport's outbound source
        tracing::debug!("Attaching capture source");
        let capture = Arc::new(SyncMutex::new(
            AudioCapture::new(backend.clone(), self.config.stream, inner.input_device.clone())
                .with_events(pipeline_tx),
        ));
        inner.capture = Some(capture.clone());
        let capture_sink = sink.clone();
        on_device_thread(move || {
            let mut capture = capture.lock();
            capture.start(capture_sink)
        })
        .await??;
        inner.sink = Some(sink);

        let Some(peer) = inner.peer.as_ref() else {
            return Err(SessionError::NotLive.into());
        };
        peer.add_local_source(source).await?;

        // (c) local description
        tracing::debug!("Building local description");
        let offer = peer.create_local_description().await?;
        peer.set_local_description(offer.clone()).await?;

        // (d) signaling
        tracing::debug!("Obtaining session credential");
        let credential = signaling.obtain_credential().await?;
        tracing::debug!("Exchanging session description");
        let answer = signaling.exchange_description(&credential, &offer).await?;

        // (e) remote description
        peer.set_remote_description(answer).await?;
        Ok(())
    }

    async fn teardown(&self, inner: &mut SessionInner) {
        self.set_state(SessionState::Closing);

        if let Some(task) = inner.event_task.take() {
            task.abort();
            let _ = task.await;
        }
        if let Some(playback) = inner.playback.clone() {
            if let Err(err) = on_device_thread(move || playback.stop()).await {
                tracing::warn!("Playback stop failed: {}", err);
            }
        }
        if let Some(capture) = inner.capture.clone() {
            let stopped = on_device_thread(move || {
                let mut capture = capture.lock();
                capture.stop();
            });
            if let Err(err) = stopped.await {
                tracing::warn!("Capture stop failed: {}", err);
            }
        }
        inner.sink = None;
        if let Some(peer) = inner.peer.take() {
            peer.close().await;
        }
        self.collaborators.signaling.release().await;

        self.set_state(SessionState::Closed);
        tracing::info!("Session {} closed", self.id);
    }

    /// Tear the session down; a no-op from New or Closed
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        match self.state() {
            SessionState::New | SessionState::Closed => {}
            _ => self.teardown(&mut inner).instrument(self.span()).await,
        }
    }

    /// Stop sending microphone audio; the device stays open
    pub async fn pause(&self) -> Result<()> {
        let inner = self.inner.lock().await;
        self.require_live()?;
        if let Some(capture) = inner.capture.as_ref() {
            capture.lock().pause();
        }
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        let inner = self.inner.lock().await;
        self.require_live()?;
        if let Some(capture) = inner.capture.as_ref() {
            capture.lock().resume();
        }
        Ok(())
    }

    fn require_live(&self) -> Result<()> {
        if self.state() != SessionState::Live {
            return Err(SessionError::NotLive.into());
        }
        Ok(())
    }

    /// Record a new input device; an active capture stream is stopped and
    /// must be restarted with [`restart_capture`](Self::restart_capture).
    /// Returns true if a stream was stopped.
    pub async fn set_input_device(&self, device: Option<String>) -> bool {
        let mut inner = self.inner.lock().await;
        inner.input_device = device.clone();
        let Some(capture) = inner.capture.clone() else {
            return false;
        };
        on_device_thread(move || {
            let mut capture = capture.lock();
            capture.set_device(device)
        })
        .await
        .unwrap_or(false)
    }

    /// Record a new output device; an active playback stream is stopped and
    /// must be restarted with [`restart_playback`](Self::restart_playback).
    /// Returns true if a stream was stopped.
    pub async fn set_output_device(&self, device: Option<String>) -> bool {
        let mut inner = self.inner.lock().await;
        inner.output_device = device.clone();
        let Some(playback) = inner.playback.clone() else {
            return false;
        };
        on_device_thread(move || playback.set_device(device))
            .await
            .unwrap_or(false)
    }

    /// Re-open capture on the current input device, feeding the same
    /// outbound source
    pub async fn restart_capture(&self) -> Result<()> {
        let inner = self.inner.lock().await;
        self.require_live()?;
        let sink = inner.sink.clone().ok_or(SessionError::NotLive)?;
        if let Some(capture) = inner.capture.clone() {
            on_device_thread(move || {
                let mut capture = capture.lock();
                capture.start(sink)
            })
            .await??;
        }
        Ok(())
    }

    /// Re-open playback on the current output device
    pub async fn restart_playback(&self) -> Result<()> {
        let inner = self.inner.lock().await;
        self.require_live()?;
        if let Some(playback) = inner.playback.clone() {
            on_device_thread(move || playback.start()).await??;
        }
        Ok(())
    }

    pub async fn capture_state(&self) -> CaptureState {
        let inner = self.inner.lock().await;
        inner
            .capture
            .as_ref()
            .map_or(CaptureState::Idle, |capture| capture.lock().state())
    }

    pub async fn playback_state(&self) -> PlaybackState {
        let inner = self.inner.lock().await;
        inner
            .playback
            .as_ref()
            .map_or(PlaybackState::Idle, |playback| playback.state())
    }

    pub async fn stats(&self) -> SessionStats {
        let inner = self.inner.lock().await;
        SessionStats {
            capture: inner.capture.as_ref().map(|c| c.lock().stats()).unwrap_or_default(),
            playback: inner.playback.as_ref().map(|p| p.stats()).unwrap_or_default(),
            outbound_sent: inner.outbound.as_ref().map_or(0, |o| o.sent()),
            outbound_dropped: inner.outbound.as_ref().map_or(0, |o| o.dropped()),
        }
    }
}
