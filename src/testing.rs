//! In-process stand-ins for the audio hardware, the media transport and
//! signaling

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::audio::backend::{
    AudioBackend, FailureCallback, InputCallback, InputSamples, OutputCallback, OutputSamples,
    StreamHandle,
};
use crate::audio::{AudioFrame, FrameSource, StreamConfig};
use crate::error::{DeviceError, SignalingError, TransportError};
use crate::signaling::{EphemeralCredential, Signaling};
use crate::transport::{
    IceServer, MediaTransport, PeerConnection, PeerSession, RemoteTrack, SessionDescription,
    TransportEvent,
};

/// Poll `condition` every few milliseconds for up to two seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Ordered record of teardown-relevant calls across mocks
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: &str) {
        self.0.lock().push(entry.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

type Slot<C> = Arc<Mutex<Option<C>>>;

struct Endpoint<C> {
    callback: Slot<C>,
    running: Arc<AtomicBool>,
    on_failure: Option<FailureCallback>,
    device: Option<String>,
}

#[derive(Default)]
struct BackendState {
    input: Option<Endpoint<InputCallback>>,
    output: Option<Endpoint<OutputCallback>>,
    inputs_opened: usize,
    outputs_opened: usize,
    fail_next_open: bool,
}

struct MockStream<C: Send> {
    name: String,
    callback: Slot<C>,
    running: Arc<AtomicBool>,
    log: Option<(CallLog, &'static str)>,
}

impl<C: Send> StreamHandle for MockStream<C> {
    fn device_name(&self) -> &str {
        &self.name
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        // dropping the callback outside the lock lets it flush
        let callback = self.callback.lock().take();
        drop(callback);
        if was_running {
            if let Some((log, entry)) = &self.log {
                log.push(entry);
            }
        }
    }
}

impl<C: Send> Drop for MockStream<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Audio backend whose callbacks are driven by the test
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<BackendState>,
    log: Option<CallLog>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Make the next open (input or output) fail with `DeviceUnavailable`
    pub fn fail_next_open(&self) {
        self.state.lock().fail_next_open = true;
    }

    fn open<C: Send + 'static>(
        &self,
        device: Option<&str>,
        callback: C,
        on_failure: FailureCallback,
        log_entry: &'static str,
    ) -> (Endpoint<C>, Box<dyn StreamHandle>) {
        let callback = Arc::new(Mutex::new(Some(callback)));
        let running = Arc::new(AtomicBool::new(true));
        let endpoint = Endpoint {
            callback: callback.clone(),
            running: running.clone(),
            on_failure: Some(on_failure),
            device: device.map(str::to_owned),
        };
        let stream = MockStream {
            name: device.unwrap_or("mock").to_string(),
            callback,
            running,
            log: self.log.clone().map(|log| (log, log_entry)),
        };
        (endpoint, Box::new(stream))
    }

    fn take_failure(&self) -> Result<(), DeviceError> {
        if std::mem::take(&mut self.state.lock().fail_next_open) {
            return Err(DeviceError::DeviceUnavailable("mock device missing".into()));
        }
        Ok(())
    }

    /// Deliver one hardware input block to the running capture callback
    pub fn fire_input(&self, data: InputSamples<'_>) {
        let slot = {
            let state = self.state.lock();
            state
                .input
                .as_ref()
                .filter(|e| e.running.load(Ordering::SeqCst))
                .map(|e| e.callback.clone())
        };
        if let Some(slot) = slot {
            if let Some(callback) = slot.lock().as_mut() {
                callback(data);
            }
        }
    }

    /// Request one hardware output block from the running playback callback
    pub fn fire_output(&self, out: OutputSamples<'_>) {
        let slot = {
            let state = self.state.lock();
            state
                .output
                .as_ref()
                .filter(|e| e.running.load(Ordering::SeqCst))
                .map(|e| e.callback.clone())
        };
        if let Some(slot) = slot {
            if let Some(callback) = slot.lock().as_mut() {
                callback(out);
            }
        }
    }

    /// Simulate the input device disappearing mid-stream
    pub fn fail_input(&self, error: DeviceError) {
        let parts = {
            let mut state = self.state.lock();
            state.input.as_mut().map(|e| {
                (e.running.clone(), e.callback.clone(), e.on_failure.take())
            })
        };
        fail_endpoint(parts, error);
    }

    /// Simulate the output device disappearing mid-stream
    pub fn fail_output(&self, error: DeviceError) {
        let parts = {
            let mut state = self.state.lock();
            state.output.as_mut().map(|e| {
                (e.running.clone(), e.callback.clone(), e.on_failure.take())
            })
        };
        fail_endpoint(parts, error);
    }

    pub fn inputs_opened(&self) -> usize {
        self.state.lock().inputs_opened
    }

    pub fn outputs_opened(&self) -> usize {
        self.state.lock().outputs_opened
    }

    pub fn input_running(&self) -> bool {
        let state = self.state.lock();
        state
            .input
            .as_ref()
            .is_some_and(|e| e.running.load(Ordering::SeqCst))
    }

    pub fn output_running(&self) -> bool {
        let state = self.state.lock();
        state
            .output
            .as_ref()
            .is_some_and(|e| e.running.load(Ordering::SeqCst))
    }

    pub fn last_input_device(&self) -> Option<String> {
        self.state.lock().input.as_ref().and_then(|e| e.device.clone())
    }

    pub fn last_output_device(&self) -> Option<String> {
        self.state.lock().output.as_ref().and_then(|e| e.device.clone())
    }
}

fn fail_endpoint<C>(
    parts: Option<(Arc<AtomicBool>, Slot<C>, Option<FailureCallback>)>,
    error: DeviceError,
) {
    let Some((running, callback, on_failure)) = parts else {
        return;
    };
    running.store(false, Ordering::SeqCst);
    let callback = callback.lock().take();
    drop(callback);
    if let Some(on_failure) = on_failure {
        on_failure(error);
    }
}

impl AudioBackend for MockBackend {
    fn open_input(
        &self,
        device: Option<&str>,
        _config: &StreamConfig,
        callback: InputCallback,
        on_failure: FailureCallback,
    ) -> Result<Box<dyn StreamHandle>, DeviceError> {
        self.take_failure()?;
        let (endpoint, stream) = self.open(device, callback, on_failure, "input stopped");
        let mut state = self.state.lock();
        state.inputs_opened += 1;
        state.input = Some(endpoint);
        Ok(stream)
    }

    fn open_output(
        &self,
        device: Option<&str>,
        _config: &StreamConfig,
        callback: OutputCallback,
        on_failure: FailureCallback,
    ) -> Result<Box<dyn StreamHandle>, DeviceError> {
        self.take_failure()?;
        let (endpoint, stream) = self.open(device, callback, on_failure, "output stopped");
        let mut state = self.state.lock();
        state.outputs_opened += 1;
        state.output = Some(endpoint);
        Ok(stream)
    }
}

#[derive(Default)]
struct TransportState {
    sessions_created: usize,
    fail_create: bool,
    fail_remote_description: bool,
    fail_add_source: bool,
    events: Option<UnboundedSender<TransportEvent>>,
    source: Option<FrameSource>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    closed: usize,
}

/// Media transport that records what the session asks of it
#[derive(Default)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
    log: Option<CallLog>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn fail_create(&self) {
        self.state.lock().fail_create = true;
    }

    /// Reject the outbound source when the session attaches it
    pub fn fail_add_source(&self) {
        self.state.lock().fail_add_source = true;
    }

    pub fn fail_remote_description(&self) {
        self.state.lock().fail_remote_description = true;
    }

    /// Push an event to the current connection; false if none is open
    pub fn emit(&self, event: TransportEvent) -> bool {
        let state = self.state.lock();
        state
            .events
            .as_ref()
            .is_some_and(|events| events.send(event).is_ok())
    }

    pub fn sessions_created(&self) -> usize {
        self.state.lock().sessions_created
    }

    pub fn closed_count(&self) -> usize {
        self.state.lock().closed
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    /// The outbound source the session attached
    pub fn take_source(&self) -> Option<FrameSource> {
        self.state.lock().source.take()
    }
}

#[async_trait]
impl MediaTransport for MockTransport {
    async fn create_session(&self, _ice_servers: &[IceServer]) -> Result<PeerConnection, TransportError> {
        let mut state = self.state.lock();
        if state.fail_create {
            return Err(TransportError::CreateSession("mock refused".into()));
        }
        state.sessions_created += 1;
        state.local = None;
        state.remote = None;
        let (tx, rx) = mpsc::unbounded_channel();
        state.events = Some(tx);
        Ok(PeerConnection {
            session: Box::new(MockPeerSession {
                state: self.state.clone(),
                log: self.log.clone(),
            }),
            events: rx,
        })
    }
}

struct MockPeerSession {
    state: Arc<Mutex<TransportState>>,
    log: Option<CallLog>,
}

#[async_trait]
impl PeerSession for MockPeerSession {
    async fn add_local_source(&self, source: FrameSource) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.fail_add_source {
            return Err(TransportError::AddSource("mock has no audio sender".into()));
        }
        state.source = Some(source);
        Ok(())
    }

    async fn create_local_description(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::offer("v=0\r\ns=mock-offer\r\n"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.state.lock().local = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.fail_remote_description {
            return Err(TransportError::Description("mock rejected answer".into()));
        }
        state.remote = Some(desc);
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.state.lock();
        state.closed += 1;
        state.events = None;
        state.source = None;
        drop(state);
        if let Some(log) = &self.log {
            log.push("transport closed");
        }
    }
}

/// Remote track fed from a channel; ends when the sender is dropped
pub struct MockRemoteTrack {
    id: String,
    frames: UnboundedReceiver<AudioFrame>,
}

impl MockRemoteTrack {
    pub fn new(id: &str) -> (UnboundedSender<AudioFrame>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                id: id.to_string(),
                frames: rx,
            },
        )
    }
}

#[async_trait]
impl RemoteTrack for MockRemoteTrack {
    fn id(&self) -> &str {
        &self.id
    }

    async fn recv(&mut self) -> Result<AudioFrame, TransportError> {
        self.frames.recv().await.ok_or(TransportError::StreamEnded)
    }
}

/// Signaling that answers every offer, unless told to fail
#[derive(Default)]
pub struct MockSignaling {
    fail_exchange: AtomicBool,
    exchanges: AtomicUsize,
    released: AtomicUsize,
    log: Option<CallLog>,
}

impl MockSignaling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn fail_exchange(&self) {
        self.fail_exchange.store(true, Ordering::SeqCst);
    }

    pub fn succeed_exchange(&self) {
        self.fail_exchange.store(false, Ordering::SeqCst);
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Signaling for MockSignaling {
    async fn obtain_credential(&self) -> Result<EphemeralCredential, SignalingError> {
        Ok(EphemeralCredential::new("ek_mock", None))
    }

    async fn exchange_description(
        &self,
        _credential: &EphemeralCredential,
        _offer: &SessionDescription,
    ) -> Result<SessionDescription, SignalingError> {
        if self.fail_exchange.load(Ordering::SeqCst) {
            return Err(SignalingError::Http {
                status: 500,
                body: "mock failure".into(),
            });
        }
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::answer("v=0\r\ns=mock-answer\r\n"))
    }

    async fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.push("signaling released");
        }
    }
}
