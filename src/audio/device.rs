//! Audio device enumeration and the cpal backend

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SupportedStreamConfigRange};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::backend::{
    AudioBackend, FailureCallback, InputCallback, InputSamples, OutputCallback, OutputSamples,
    StreamHandle,
};
use crate::audio::clock::StreamConfig;
use crate::error::DeviceError;

/// Selector value meaning "the host's default device"
pub const DEFAULT_DEVICE: &str = "default";

/// How long to wait for a stream thread to report that the device opened
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Sample formats we can convert, in order of preference
const PREFERRED_FORMATS: [SampleFormat; 3] = [SampleFormat::I16, SampleFormat::F32, SampleFormat::U16];

/// Description of an audio device for listings
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

fn is_default_selector(selector: Option<&str>) -> bool {
    match selector {
        None => true,
        Some(name) => name.is_empty() || name.eq_ignore_ascii_case(DEFAULT_DEVICE),
    }
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<AudioDeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = match device.supported_input_configs() {
                    Ok(configs) => capabilities(configs),
                    Err(_) => (Vec::new(), Vec::new()),
                };
                devices.push(AudioDeviceInfo {
                    is_default: default_input_name.as_ref() == Some(&name),
                    name,
                    is_input: true,
                    is_output: false,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);

                // Duplex devices show up once
                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    existing.is_default |= is_default;
                    continue;
                }

                let (sample_rates, channels) = match device.supported_output_configs() {
                    Ok(configs) => capabilities(configs),
                    Err(_) => (Vec::new(), Vec::new()),
                };
                devices.push(AudioDeviceInfo {
                    name,
                    is_input: false,
                    is_output: true,
                    is_default,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    devices
}

/// Common sample rates and channel counts covered by a set of config ranges
fn capabilities(configs: impl Iterator<Item = SupportedStreamConfigRange>) -> (Vec<u32>, Vec<u16>) {
    let mut rates = Vec::new();
    let mut chans = Vec::new();
    for config in configs {
        for rate_val in [16000u32, 24000, 44100, 48000, 88200, 96000] {
            let rate = cpal::SampleRate(rate_val);
            if rate >= config.min_sample_rate()
                && rate <= config.max_sample_rate()
                && !rates.contains(&rate_val)
            {
                rates.push(rate_val);
            }
        }
        if !chans.contains(&config.channels()) {
            chans.push(config.channels());
        }
    }
    rates.sort_unstable();
    chans.sort_unstable();
    (rates, chans)
}

/// Find an input device by name, or the default for an empty selector
pub fn find_input_device(selector: Option<&str>) -> Result<cpal::Device, DeviceError> {
    let host = cpal::default_host();
    if is_default_selector(selector) {
        return host
            .default_input_device()
            .ok_or_else(|| DeviceError::DeviceUnavailable("no default input device".to_string()));
    }
    let name = selector.unwrap_or_default();
    host.input_devices()
        .map_err(|e| DeviceError::DeviceUnavailable(e.to_string()))?
        .find(|d| d.name().is_ok_and(|n| n == name))
        .ok_or_else(|| DeviceError::DeviceUnavailable(format!("input device not found: {}", name)))
}

/// Find an output device by name, or the default for an empty selector
pub fn find_output_device(selector: Option<&str>) -> Result<cpal::Device, DeviceError> {
    let host = cpal::default_host();
    if is_default_selector(selector) {
        return host
            .default_output_device()
            .ok_or_else(|| DeviceError::DeviceUnavailable("no default output device".to_string()));
    }
    let name = selector.unwrap_or_default();
    host.output_devices()
        .map_err(|e| DeviceError::DeviceUnavailable(e.to_string()))?
        .find(|d| d.name().is_ok_and(|n| n == name))
        .ok_or_else(|| DeviceError::DeviceUnavailable(format!("output device not found: {}", name)))
}

/// Pick a sample format the device supports at our rate and channel count
fn negotiate_format(
    configs: impl Iterator<Item = SupportedStreamConfigRange>,
    config: &StreamConfig,
) -> Result<SampleFormat, DeviceError> {
    let rate = cpal::SampleRate(config.sample_rate);
    let formats: Vec<SampleFormat> = configs
        .filter(|c| {
            c.channels() == config.channels
                && c.min_sample_rate() <= rate
                && c.max_sample_rate() >= rate
        })
        .map(|c| c.sample_format())
        .collect();

    PREFERRED_FORMATS
        .into_iter()
        .find(|f| formats.contains(f))
        .ok_or_else(|| {
            DeviceError::UnsupportedFormat(format!(
                "device has no i16/f32/u16 config for {} Hz, {} channel(s)",
                config.sample_rate, config.channels
            ))
        })
}

fn cpal_config(config: &StreamConfig) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(config.frame_sample_count() as u32),
    }
}

fn error_callback(error_tx: Sender<DeviceError>) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        let _ = error_tx.try_send(DeviceError::from(err));
    }
}

/// Backend using the platform's default cpal host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for CpalBackend {
    fn open_input(
        &self,
        device: Option<&str>,
        config: &StreamConfig,
        mut callback: InputCallback,
        on_failure: FailureCallback,
    ) -> Result<Box<dyn StreamHandle>, DeviceError> {
        let selector = device.map(str::to_owned);
        let config = *config;

        let stream = CpalStream::spawn("capture", on_failure, move |error_tx| {
            let device = find_input_device(selector.as_deref())?;
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            let supported = device
                .supported_input_configs()
                .map_err(|e| DeviceError::DeviceUnavailable(e.to_string()))?;
            let format = negotiate_format(supported, &config)?;
            let stream_config = cpal_config(&config);

            let stream = match format {
                SampleFormat::I16 => device.build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| callback(InputSamples::I16(data)),
                    error_callback(error_tx),
                    None,
                ),
                SampleFormat::F32 => device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| callback(InputSamples::F32(data)),
                    error_callback(error_tx),
                    None,
                ),
                SampleFormat::U16 => device.build_input_stream(
                    &stream_config,
                    move |data: &[u16], _: &cpal::InputCallbackInfo| callback(InputSamples::U16(data)),
                    error_callback(error_tx),
                    None,
                ),
                other => return Err(DeviceError::UnsupportedFormat(format!("{:?}", other))),
            }?;
            stream.play()?;

            tracing::info!(
                "Input stream opened on {} ({:?}, {} Hz, {} ch, block {})",
                name,
                format,
                config.sample_rate,
                config.channels,
                config.frame_sample_count()
            );
            Ok((stream, name))
        })?;
        Ok(Box::new(stream))
    }

    fn open_output(
        &self,
        device: Option<&str>,
        config: &StreamConfig,
        mut callback: OutputCallback,
        on_failure: FailureCallback,
    ) -> Result<Box<dyn StreamHandle>, DeviceError> {
        let selector = device.map(str::to_owned);
        let config = *config;

        let stream = CpalStream::spawn("playback", on_failure, move |error_tx| {
            let device = find_output_device(selector.as_deref())?;
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            let supported = device
                .supported_output_configs()
                .map_err(|e| DeviceError::DeviceUnavailable(e.to_string()))?;
            let format = negotiate_format(supported, &config)?;
            let stream_config = cpal_config(&config);

            let stream = match format {
                SampleFormat::I16 => device.build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        callback(OutputSamples::I16(data))
                    },
                    error_callback(error_tx),
                    None,
                ),
                SampleFormat::F32 => device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        callback(OutputSamples::F32(data))
                    },
                    error_callback(error_tx),
                    None,
                ),
                SampleFormat::U16 => device.build_output_stream(
                    &stream_config,
                    move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                        callback(OutputSamples::U16(data))
                    },
                    error_callback(error_tx),
                    None,
                ),
                other => return Err(DeviceError::UnsupportedFormat(format!("{:?}", other))),
            }?;
            stream.play()?;

            tracing::info!(
                "Output stream opened on {} ({:?}, {} Hz, {} ch, block {})",
                name,
                format,
                config.sample_rate,
                config.channels,
                config.frame_sample_count()
            );
            Ok((stream, name))
        })?;
        Ok(Box::new(stream))
    }
}

/// A cpal stream parked on its own thread
///
/// cpal streams are not `Send` on every platform, so the stream is built,
/// played and dropped on a dedicated thread that waits for either a stop
/// request or a stream error.
struct CpalStream {
    device_name: String,
    running: Arc<AtomicBool>,
    stop_tx: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalStream {
    fn spawn<F>(role: &str, on_failure: FailureCallback, open: F) -> Result<Self, DeviceError>
    where
        F: FnOnce(Sender<DeviceError>) -> Result<(cpal::Stream, String), DeviceError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = bounded::<Result<String, DeviceError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (error_tx, error_rx) = bounded::<DeviceError>(16);
        let running = Arc::new(AtomicBool::new(false));
        let running_for_thread = running.clone();

        let handle = thread::Builder::new()
            .name(format!("{}-stream", role))
            .spawn(move || match open(error_tx) {
                Ok((stream, name)) => {
                    running_for_thread.store(true, Ordering::SeqCst);
                    let _ = ready_tx.send(Ok(name));
                    park_until_stopped(stream, &stop_rx, &error_rx, &running_for_thread, on_failure);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| DeviceError::StreamError(e.to_string()))?;

        let device_name = wait_ready(&ready_rx)?;

        Ok(Self {
            device_name,
            running,
            stop_tx: Some(stop_tx),
            thread_handle: Some(handle),
        })
    }
}

fn wait_ready(ready_rx: &Receiver<Result<String, DeviceError>>) -> Result<String, DeviceError> {
    match ready_rx.recv_timeout(OPEN_TIMEOUT) {
        Ok(result) => result,
        Err(_) => Err(DeviceError::StreamError("timed out opening device".to_string())),
    }
}

fn park_until_stopped(
    stream: cpal::Stream,
    stop_rx: &Receiver<()>,
    error_rx: &Receiver<DeviceError>,
    running: &AtomicBool,
    on_failure: FailureCallback,
) {
    select! {
        recv(stop_rx) -> _ => {
            drop(stream);
            running.store(false, Ordering::SeqCst);
        }
        recv(error_rx) -> err => {
            // Implicit stop: release the device before reporting
            drop(stream);
            running.store(false, Ordering::SeqCst);
            if let Ok(err) = err {
                tracing::error!("Audio stream failed: {}", err);
                on_failure(err);
            }
        }
    }
}

impl StreamHandle for CpalStream {
    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {
        // Dropping the sender wakes the stream thread
        self.stop_tx.take();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.stop();
    }
}
