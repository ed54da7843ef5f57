//! Capture Reader, SPEC_FULL.md §4.1: owns the device session, reads
//! fixed-size buffers on a dedicated worker thread, and stamps each one with
//! both a wall-clock reference time and a calculated time derived purely
//! from the running sample count.

use crate::device::{AudioDeviceAdapter, StreamParams};
use crate::queue::BoundedFrameQueue;
use crate::watchdog::WatchdogTimer;
use crossbeam_channel::Receiver;
use fme_foundation::{CalcTime, CaptureError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub reference_time: Instant,
    pub calc_time: CalcTime,
    pub sample_rate: u32,
}

pub struct CaptureConfig {
    pub device_name: Option<String>,
    pub candidate_sampling_freqs: Vec<u32>,
    pub channels: u16,
    pub channel_index: u16,
    pub samples_per_buf: usize,
    pub max_queue_length: usize,
    pub max_missed_attempts: u32,
    /// How long the device may go without producing a buffer before the
    /// watchdog flags it. `None` disables the watchdog.
    pub watchdog_timeout: Option<Duration>,
}

/// Picks the highest of `candidates` the device actually supports, per
/// SPEC_FULL.md §4.1's "highest supported standard sampling rate" rule.
/// Exposed so the supervisor can negotiate the rate up front, before it
/// knows how many samples-per-buffer to request.
pub fn negotiate_rate(
    adapter: &dyn AudioDeviceAdapter,
    device_name: Option<&str>,
    candidates: &[u32],
) -> Result<StreamParams, CaptureError> {
    let supported = adapter.supported_params(device_name)?;
    candidates
        .iter()
        .rev() // lowest first in config; try highest first
        .find_map(|&rate| {
            supported
                .iter()
                .find(|p| p.sample_rate == rate)
                .copied()
        })
        .or_else(|| supported.first().copied())
        .ok_or(CaptureError::NoSupportedRate)
}

pub struct CaptureReader {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    watchdog: Option<WatchdogTimer>,
    amplitude_bounds: Option<(f32, f32)>,
}

impl CaptureReader {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
            watchdog: None,
            amplitude_bounds: None,
        }
    }

    /// The native sample format's amplitude bounds, as reported by the
    /// adapter the last time `start` opened a stream. `None` before the
    /// first successful `start`.
    pub fn amplitude_bounds(&self) -> Option<(f32, f32)> {
        self.amplitude_bounds
    }

    /// `true` once the watchdog (if enabled) has flagged a silence gap past
    /// `CaptureConfig::watchdog_timeout`. Feeding resumes on the next
    /// successfully read buffer.
    pub fn watchdog_triggered(&self) -> bool {
        self.watchdog
            .as_ref()
            .map(|w| w.is_triggered())
            .unwrap_or(false)
    }

    /// A cheap clone of the watchdog, for callers that want to poll it from
    /// somewhere other than the `CaptureReader` itself (e.g. a periodic
    /// metrics tick on another thread).
    pub fn watchdog_handle(&self) -> Option<WatchdogTimer> {
        self.watchdog.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts the worker. Returns the negotiated stream rate and a receiver
    /// for the published frames. Fails with `CaptureError::Busy` if already
    /// running, per spec's "reconfigure a running reader fails" rule.
    pub fn start(
        &mut self,
        mut adapter: Box<dyn AudioDeviceAdapter>,
        config: CaptureConfig,
        on_fatal: impl Fn(CaptureError) + Send + 'static,
    ) -> Result<(u32, Receiver<AudioFrame>), CaptureError> {
        if self.is_running() {
            return Err(CaptureError::Busy);
        }

        let params = negotiate_rate(
            adapter.as_ref(),
            config.device_name.as_deref(),
            &config.candidate_sampling_freqs,
        )?;

        let mut stream = adapter.open_input_stream(
            config.device_name.as_deref(),
            params,
            config.samples_per_buf * params.channels as usize,
        )?;
        self.amplitude_bounds = Some(stream.amplitude_bounds());

        let queue = Arc::new(BoundedFrameQueue::new(
            config.max_queue_length,
            config.max_missed_attempts,
        ));
        let rx = queue.receiver();

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let sample_rate = params.sample_rate;
        let channels = params.channels as usize;
        let channel_index = config.channel_index as usize;

        let mut watchdog = config.watchdog_timeout.map(WatchdogTimer::new);
        if let Some(watchdog) = watchdog.as_mut() {
            watchdog.start(Arc::clone(&running));
        }
        let watchdog_worker = watchdog.clone();
        self.watchdog = watchdog;

        let handle = thread::Builder::new()
            .name("fme-capture".to_string())
            .spawn(move || {
                let mut samples_consumed: u64 = 0;
                while running.load(Ordering::SeqCst) {
                    match stream.read() {
                        Ok(Some(interleaved)) => {
                            if let Some(watchdog) = watchdog_worker.as_ref() {
                                watchdog.feed();
                            }
                            let reference_time = Instant::now();
                            // Already normalized to [-1.0, 1.0] by the
                            // adapter against the device's native sample
                            // format, so picking a channel is all that's
                            // left to do here.
                            let mono: Vec<f32> = interleaved
                                .chunks(channels.max(1))
                                .map(|frame| {
                                    let idx = channel_index.min(frame.len().saturating_sub(1));
                                    frame[idx]
                                })
                                .collect();
                            let calc_time = CalcTime::new(samples_consumed, sample_rate);
                            samples_consumed += mono.len() as u64;

                            let frame = AudioFrame {
                                samples: mono,
                                reference_time,
                                calc_time,
                                sample_rate,
                            };

                            if let Err(err) = queue.publish(frame) {
                                on_fatal(err);
                                running.store(false, Ordering::SeqCst);
                                break;
                            }
                        }
                        Ok(None) => break, // stream closed
                        Err(err) => {
                            on_fatal(err);
                            running.store(false, Ordering::SeqCst);
                            break;
                        }
                    }
                }
                stream.close();
            })
            .expect("failed to spawn capture thread");

        self.handle = Some(handle);
        Ok((sample_rate, rx))
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        if let Some(mut watchdog) = self.watchdog.take() {
            watchdog.stop();
        }
    }
}

impl Default for CaptureReader {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CaptureReader {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::FakeAdapter;

    fn config() -> CaptureConfig {
        CaptureConfig {
            device_name: None,
            candidate_sampling_freqs: vec![8_000],
            channels: 1,
            channel_index: 0,
            samples_per_buf: 32,
            max_queue_length: 64,
            max_missed_attempts: 4,
            watchdog_timeout: None,
        }
    }

    #[test]
    fn calculated_time_is_monotone_across_published_frames() {
        let adapter = Box::new(FakeAdapter {
            signal: vec![100i16; 320],
            params: StreamParams {
                sample_rate: 8_000,
                channels: 1,
            },
        });
        let mut reader = CaptureReader::new();
        let (rate, rx) = reader.start(adapter, config(), |_| {}).unwrap();
        assert_eq!(rate, 8_000);

        let mut last = None;
        for _ in 0..10 {
            if let Ok(frame) = rx.recv_timeout(std::time::Duration::from_secs(1)) {
                if let Some(prev) = last {
                    assert!(frame.calc_time > prev);
                }
                last = Some(frame.calc_time);
            } else {
                break;
            }
        }
        reader.stop();
    }

    #[test]
    fn starting_twice_fails_busy() {
        let adapter = Box::new(FakeAdapter {
            signal: vec![0i16; 320],
            params: StreamParams {
                sample_rate: 8_000,
                channels: 1,
            },
        });
        let mut reader = CaptureReader::new();
        let _ = reader.start(adapter, config(), |_| {}).unwrap();
        let adapter2 = Box::new(FakeAdapter {
            signal: vec![0i16; 320],
            params: StreamParams {
                sample_rate: 8_000,
                channels: 1,
            },
        });
        let result = reader.start(adapter2, config(), |_| {});
        assert!(matches!(result, Err(CaptureError::Busy)));
        reader.stop();
    }

    #[test]
    fn watchdog_does_not_trigger_while_frames_keep_arriving() {
        let adapter = Box::new(FakeAdapter {
            signal: vec![100i16; 3_200],
            params: StreamParams {
                sample_rate: 8_000,
                channels: 1,
            },
        });
        let mut cfg = config();
        cfg.watchdog_timeout = Some(std::time::Duration::from_secs(30));
        let mut reader = CaptureReader::new();
        let (_rate, rx) = reader.start(adapter, cfg, |_| {}).unwrap();
        for _ in 0..10 {
            let _ = rx.recv_timeout(std::time::Duration::from_secs(1));
        }
        assert!(!reader.watchdog_triggered());
        reader.stop();
    }
}
