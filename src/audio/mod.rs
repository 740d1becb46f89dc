//! Audio subsystem module

pub mod backend;
pub mod buffer;
pub mod capture;
pub mod clock;
pub mod device;
pub mod playback;
pub mod queue;

pub use backend::{AudioBackend, InputSamples, OutputSamples, StreamHandle};
pub use buffer::{AudioFrame, BufferStats, PlaybackBuffer, SharedPlaybackBuffer};
pub use capture::{AudioCapture, CaptureState, CaptureStats};
pub use clock::{FrameClock, StreamConfig};
pub use device::{list_devices, AudioDeviceInfo, CpalBackend};
pub use playback::{AudioPlayback, PlaybackState, PlaybackStats};
pub use queue::{outbound_queue, FrameSink, FrameSource, QueueCounters, QueueRecv};

use crate::error::DeviceError;

/// Run a device open or close on the blocking pool
///
/// Backends wait on the stream thread while it opens or releases the device.
pub async fn on_device_thread<T, F>(op: F) -> Result<T, DeviceError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|err| DeviceError::StreamError(format!("device task failed: {}", err)))
}

/// Failures raised from a device thread, delivered to the session
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    CaptureFailed(DeviceError),
    PlaybackFailed(DeviceError),
}
