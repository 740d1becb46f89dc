//! Audio backend abstraction
//!
//! Pipelines never talk to cpal directly. They hand a callback to an
//! [`AudioBackend`], which owns the hardware stream and invokes the callback on
//! its real-time thread with the device's native sample format.

use cpal::Sample;

use crate::audio::clock::StreamConfig;
use crate::error::DeviceError;

/// Samples delivered by an input device, in its native format
#[derive(Debug, Clone, Copy)]
pub enum InputSamples<'a> {
    I16(&'a [i16]),
    U16(&'a [u16]),
    F32(&'a [f32]),
}

impl InputSamples<'_> {
    pub fn len(&self) -> usize {
        match self {
            InputSamples::I16(data) => data.len(),
            InputSamples::U16(data) => data.len(),
            InputSamples::F32(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample at `index` converted to i16 by linear scaling
    ///
    /// Float input is scaled by 32768 and saturated, unsigned input is
    /// re-centred around zero. Nothing is truncated bitwise.
    #[inline]
    pub fn get_i16(&self, index: usize) -> i16 {
        match self {
            InputSamples::I16(data) => data[index],
            InputSamples::U16(data) => i16::from_sample(data[index]),
            InputSamples::F32(data) => i16::from_sample(data[index]),
        }
    }
}

/// Device output buffer, in the device's native format
#[derive(Debug)]
pub enum OutputSamples<'a> {
    I16(&'a mut [i16]),
    U16(&'a mut [u16]),
    F32(&'a mut [f32]),
}

impl OutputSamples<'_> {
    pub fn len(&self) -> usize {
        match self {
            OutputSamples::I16(data) => data.len(),
            OutputSamples::U16(data) => data.len(),
            OutputSamples::F32(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write i16 samples starting at `offset`, converting to the device format
    #[inline]
    pub fn write_from(&mut self, offset: usize, samples: &[i16]) {
        match self {
            OutputSamples::I16(data) => {
                data[offset..offset + samples.len()].copy_from_slice(samples);
            }
            OutputSamples::U16(data) => {
                for (dst, &src) in data[offset..offset + samples.len()].iter_mut().zip(samples) {
                    *dst = u16::from_sample(src);
                }
            }
            OutputSamples::F32(data) => {
                for (dst, &src) in data[offset..offset + samples.len()].iter_mut().zip(samples) {
                    *dst = f32::from_sample(src);
                }
            }
        }
    }

    /// Fill `offset..offset + len` with the format's silence value
    #[inline]
    pub fn silence(&mut self, offset: usize, len: usize) {
        match self {
            OutputSamples::I16(data) => data[offset..offset + len].fill(0),
            OutputSamples::U16(data) => data[offset..offset + len].fill(u16::EQUILIBRIUM),
            OutputSamples::F32(data) => data[offset..offset + len].fill(0.0),
        }
    }
}

/// Input callback run on the device's real-time thread
pub type InputCallback = Box<dyn FnMut(InputSamples<'_>) + Send + 'static>;

/// Output callback run on the device's real-time thread
pub type OutputCallback = Box<dyn FnMut(OutputSamples<'_>) + Send + 'static>;

/// Invoked at most once when a running stream fails
pub type FailureCallback = Box<dyn FnOnce(DeviceError) + Send + 'static>;

/// Handle to an open hardware stream
///
/// Stopping (or dropping) the handle halts the stream and releases the device.
pub trait StreamHandle: Send {
    /// Name of the device the stream was opened on
    fn device_name(&self) -> &str;

    /// False once the stream was stopped or failed
    fn is_running(&self) -> bool;

    /// Halt the stream and release the device; idempotent
    fn stop(&mut self);
}

/// Opens hardware streams
pub trait AudioBackend: Send + Sync {
    /// Open and start an input stream delivering blocks of
    /// `config.frame_sample_count()` samples per channel where the host allows
    fn open_input(
        &self,
        device: Option<&str>,
        config: &StreamConfig,
        callback: InputCallback,
        on_failure: FailureCallback,
    ) -> Result<Box<dyn StreamHandle>, DeviceError>;

    /// Open and start an output stream with block size
    /// `config.frame_sample_count()`
    fn open_output(
        &self,
        device: Option<&str>,
        config: &StreamConfig,
        callback: OutputCallback,
        on_failure: FailureCallback,
    ) -> Result<Box<dyn StreamHandle>, DeviceError>;
}
