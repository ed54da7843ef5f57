//! Device enumeration and stream negotiation, behind the `AudioDeviceAdapter`
//! contract from SPEC_FULL.md §6. The production adapter wraps `cpal`; tests
//! use an in-memory adapter that plays back a fixed sample buffer.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, SampleFormat, StreamConfig};
use fme_foundation::CaptureError;

/// A candidate `(sample_rate, channels)` pair a device can be opened at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
}

/// The device-facing contract the Capture Reader is built against, per
/// SPEC_FULL.md §6. Kept narrow so a non-`cpal` backend (or a test double)
/// can stand in without touching the capture worker.
pub trait AudioDeviceAdapter: Send {
    /// Device names available for input, in adapter-defined priority order.
    fn enumerate_input_devices(&self) -> Vec<String>;

    /// The sample rates and channel counts supported by the named device (or
    /// the host default device, when `name` is `None`).
    fn supported_params(&self, name: Option<&str>) -> Result<Vec<StreamParams>, CaptureError>;

    /// Opens a blocking input stream at the given parameters and returns a
    /// handle that yields fixed-size, normalized `f32` buffers.
    fn open_input_stream(
        &mut self,
        name: Option<&str>,
        params: StreamParams,
        samples_per_buf: usize,
    ) -> Result<Box<dyn InputStreamHandle>, CaptureError>;
}

/// Minimum/maximum amplitude a device's native sample representation can
/// hold, per SPEC_FULL.md §6. `open_input_stream` normalizes every sample to
/// `[-1.0, 1.0]` against these bounds at the point the native type is known,
/// so a float-native format (cpal's `SampleFormat::F32`) never takes a
/// lossy round trip through a fixed-width integer on the way in.
pub trait SampleAmplitude: Copy {
    const MIN_AMPLITUDE: f32;
    const MAX_AMPLITUDE: f32;

    /// Scales `self` to `[-1.0, 1.0]` against this type's own amplitude
    /// bounds, centering unsigned formats around their midpoint first.
    fn normalize(self) -> f32;
}

impl SampleAmplitude for i16 {
    const MIN_AMPLITUDE: f32 = i16::MIN as f32;
    const MAX_AMPLITUDE: f32 = i16::MAX as f32;

    fn normalize(self) -> f32 {
        self as f32 / Self::MAX_AMPLITUDE
    }
}

impl SampleAmplitude for u16 {
    const MIN_AMPLITUDE: f32 = u16::MIN as f32;
    const MAX_AMPLITUDE: f32 = u16::MAX as f32;

    fn normalize(self) -> f32 {
        (self as f32 - 32_768.0) / 32_768.0
    }
}

impl SampleAmplitude for f32 {
    const MIN_AMPLITUDE: f32 = -1.0;
    const MAX_AMPLITUDE: f32 = 1.0;

    fn normalize(self) -> f32 {
        self.clamp(Self::MIN_AMPLITUDE, Self::MAX_AMPLITUDE)
    }
}

/// A single open input stream. `read` blocks until a full buffer of
/// `samples_per_buf` samples, already normalized to `[-1.0, 1.0]`, is
/// available, or returns `Ok(None)` once the stream has been closed from
/// another thread.
pub trait InputStreamHandle: Send {
    fn read(&mut self) -> Result<Option<Vec<f32>>, CaptureError>;

    /// The amplitude bounds of the sample format this stream was opened
    /// against, before normalization. Exposed for callers that want to
    /// report headroom rather than just trust the already-normalized data.
    fn amplitude_bounds(&self) -> (f32, f32);

    fn close(&mut self);
}

/// Priority order for picking an input device when none is requested by
/// name: the ALSA "default" shim, then "pipewire", then the host's reported
/// default, then everything else in enumeration order.
pub struct CpalDeviceAdapter {
    host: Host,
}

impl Default for CpalDeviceAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalDeviceAdapter {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    fn device_names(&self) -> Vec<String> {
        self.host
            .input_devices()
            .map(|it| it.filter_map(|d| d.name().ok()).collect())
            .unwrap_or_default()
    }

    fn find_by_name(&self, name: &str) -> Option<Device> {
        self.host
            .input_devices()
            .ok()?
            .find(|d| d.name().as_deref() == Ok(name))
    }

    fn resolve_device(&self, name: Option<&str>) -> Result<Device, CaptureError> {
        if let Some(requested) = name {
            return self.find_by_name(requested).ok_or(CaptureError::DeviceNotFound {
                name: Some(requested.to_string()),
            });
        }
        for candidate in self.candidate_device_names() {
            if let Some(device) = self.find_by_name(&candidate) {
                return Ok(device);
            }
        }
        self.host
            .default_input_device()
            .ok_or(CaptureError::DeviceNotFound { name: None })
    }

    /// Names tried, in order, when no device was requested explicitly.
    pub fn candidate_device_names(&self) -> Vec<String> {
        let mut out = Vec::new();
        let all = self.device_names();

        if all.iter().any(|n| n == "default") {
            out.push("default".to_string());
        }
        if !out.iter().any(|n| n == "pipewire") && all.iter().any(|n| n == "pipewire") {
            out.push("pipewire".to_string());
        }
        if let Some(def) = self.host.default_input_device().and_then(|d| d.name().ok()) {
            if !out.iter().any(|n| n == &def) {
                out.push(def);
            }
        }
        for name in all {
            if !out.iter().any(|n| n == &name) {
                out.push(name);
            }
        }
        out
    }
}

impl AudioDeviceAdapter for CpalDeviceAdapter {
    fn enumerate_input_devices(&self) -> Vec<String> {
        self.device_names()
    }

    fn supported_params(&self, name: Option<&str>) -> Result<Vec<StreamParams>, CaptureError> {
        let device = self.resolve_device(name)?;
        let configs = device
            .supported_input_configs()
            .map_err(|e| CaptureError::Driver(e.to_string()))?;

        let mut out = Vec::new();
        for config in configs {
            out.push(StreamParams {
                sample_rate: config.max_sample_rate(),
                channels: config.channels(),
            });
        }
        Ok(out)
    }

    fn open_input_stream(
        &mut self,
        name: Option<&str>,
        params: StreamParams,
        samples_per_buf: usize,
    ) -> Result<Box<dyn InputStreamHandle>, CaptureError> {
        let device = self.resolve_device(name)?;
        let stream_config = StreamConfig {
            channels: params.channels,
            sample_rate: params.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };
        let sample_format = device
            .default_input_config()
            .map(|c| c.sample_format())
            .unwrap_or(SampleFormat::I16);

        CpalStreamHandle::build(device, stream_config, sample_format, samples_per_buf)
            .map(|h| Box::new(h) as Box<dyn InputStreamHandle>)
    }
}

/// Bridges `cpal`'s push-style callback API to the blocking `read` the
/// Capture Reader expects: the callback pushes fixed-size chunks into an
/// unbounded channel, `read` blocks on the receiver.
struct CpalStreamHandle {
    _stream: cpal::Stream,
    rx: crossbeam_channel::Receiver<Vec<f32>>,
    amplitude_bounds: (f32, f32),
    closed: bool,
}

impl CpalStreamHandle {
    fn build(
        device: Device,
        config: StreamConfig,
        sample_format: SampleFormat,
        samples_per_buf: usize,
    ) -> Result<Self, CaptureError> {
        use cpal::traits::StreamTrait;

        let (tx, rx) = crossbeam_channel::unbounded::<Vec<f32>>();
        let err_tx = tx.clone();

        let err_fn = move |err: cpal::StreamError| {
            tracing::error!(%err, "input stream error");
            drop(&err_tx);
        };

        // Each branch normalizes against its own native type's amplitude
        // constants, so the float-native format never passes through a
        // fixed-width integer on the way to the f32 the rest of the
        // pipeline expects.
        macro_rules! build_typed_stream {
            ($sample_ty:ty) => {{
                let tx = tx.clone();
                let mut acc: Vec<f32> = Vec::with_capacity(samples_per_buf);
                device.build_input_stream(
                    &config,
                    move |data: &[$sample_ty], _: &_| {
                        for &s in data {
                            acc.push(SampleAmplitude::normalize(s));
                            if acc.len() == samples_per_buf {
                                let _ = tx.send(std::mem::replace(
                                    &mut acc,
                                    Vec::with_capacity(samples_per_buf),
                                ));
                            }
                        }
                    },
                    err_fn,
                    None,
                )
            }};
        }

        let amplitude_bounds = match sample_format {
            SampleFormat::I16 => (i16::MIN_AMPLITUDE, i16::MAX_AMPLITUDE),
            SampleFormat::U16 => (u16::MIN_AMPLITUDE, u16::MAX_AMPLITUDE),
            SampleFormat::F32 => (f32::MIN_AMPLITUDE, f32::MAX_AMPLITUDE),
            other => {
                return Err(CaptureError::Driver(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        };

        let stream = match sample_format {
            SampleFormat::I16 => build_typed_stream!(i16),
            SampleFormat::U16 => build_typed_stream!(u16),
            SampleFormat::F32 => build_typed_stream!(f32),
            other => {
                return Err(CaptureError::Driver(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        }
        .map_err(|e| CaptureError::Driver(e.to_string()))?;

        stream.play().map_err(|e| CaptureError::Driver(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            rx,
            amplitude_bounds,
            closed: false,
        })
    }
}

impl InputStreamHandle for CpalStreamHandle {
    fn read(&mut self) -> Result<Option<Vec<f32>>, CaptureError> {
        if self.closed {
            return Ok(None);
        }
        match self.rx.recv() {
            Ok(buf) => Ok(Some(buf)),
            Err(_) => Ok(None),
        }
    }

    fn amplitude_bounds(&self) -> (f32, f32) {
        self.amplitude_bounds
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Plays back a fixed signal in fixed-size chunks; used to exercise the
    /// Capture Reader without touching real hardware. `signal` is given in
    /// native `i16` units and normalized the same way `CpalStreamHandle`
    /// would normalize an `i16`-format device.
    pub struct FakeAdapter {
        pub signal: Vec<i16>,
        pub params: StreamParams,
    }

    pub struct FakeStream {
        chunks: Arc<Mutex<VecDeque<Vec<f32>>>>,
    }

    impl InputStreamHandle for FakeStream {
        fn read(&mut self) -> Result<Option<Vec<f32>>, CaptureError> {
            Ok(self.chunks.lock().unwrap().pop_front())
        }
        fn amplitude_bounds(&self) -> (f32, f32) {
            (i16::MIN_AMPLITUDE, i16::MAX_AMPLITUDE)
        }
        fn close(&mut self) {
            self.chunks.lock().unwrap().clear();
        }
    }

    impl AudioDeviceAdapter for FakeAdapter {
        fn enumerate_input_devices(&self) -> Vec<String> {
            vec!["fake".to_string()]
        }

        fn supported_params(&self, _name: Option<&str>) -> Result<Vec<StreamParams>, CaptureError> {
            Ok(vec![self.params])
        }

        fn open_input_stream(
            &mut self,
            _name: Option<&str>,
            _params: StreamParams,
            samples_per_buf: usize,
        ) -> Result<Box<dyn InputStreamHandle>, CaptureError> {
            let normalized: Vec<f32> = self.signal.iter().map(|&s| s.normalize()).collect();
            let chunks: VecDeque<Vec<f32>> = normalized
                .chunks(samples_per_buf)
                .map(|c| c.to_vec())
                .collect();
            Ok(Box::new(FakeStream {
                chunks: Arc::new(Mutex::new(chunks)),
            }))
        }
    }

    #[test]
    fn fake_adapter_yields_fixed_size_chunks() {
        let mut adapter = FakeAdapter {
            signal: vec![1i16; 100],
            params: StreamParams {
                sample_rate: 8000,
                channels: 1,
            },
        };
        let mut stream = adapter
            .open_input_stream(None, adapter.params, 32)
            .unwrap();
        let mut total = 0;
        while let Some(chunk) = stream.read().unwrap() {
            total += chunk.len();
        }
        assert_eq!(total, 100);
    }
}
