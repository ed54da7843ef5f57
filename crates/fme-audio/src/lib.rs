pub mod capture;
pub mod device;
pub mod downsample;
pub mod queue;
#[cfg(unix)]
pub mod stderr_suppressor;
pub mod watchdog;

pub use capture::{negotiate_rate, AudioFrame, CaptureConfig, CaptureReader};
pub use device::{
    AudioDeviceAdapter, CpalDeviceAdapter, InputStreamHandle, SampleAmplitude, StreamParams,
};
pub use downsample::{
    best_working_parameters, DualDownsampler, ProcessedFrame, RecordFrame, WorkingParameters,
};
pub use watchdog::WatchdogTimer;
