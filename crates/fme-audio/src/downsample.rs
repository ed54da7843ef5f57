//! Dual Downsampler, SPEC_FULL.md §4.2.
//!
//! Two windowed-sinc FIR low-pass filters are designed once per parameter
//! set and then run as streaming decimators: the processing filter feeds the
//! Spectrogram Pair, the optional recording filter feeds the Audio
//! Preserver. There is no teacher module for this — the nearest prior art in
//! this workspace used `rubato`'s arbitrary-ratio sinc resampler, which
//! solves a different problem (ratio resampling, not exact integer
//! decimation with a hand-specified cutoff); this is a small from-scratch FIR
//! designer instead, grounded on the decimation-factor derivation in
//! `original_source/Core/privImplementation.cpp` (`GetBestWorkingParameters`).

use fme_foundation::{CalcTime, DownsampleError};
use std::collections::VecDeque;
use std::f64::consts::PI;

/// One frame out of the processing (detection) branch.
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub samples: Vec<f32>,
    pub calc_time: CalcTime,
    pub sample_rate: u32,
}

/// One frame out of the recording branch, present only when recording is
/// configured.
#[derive(Debug, Clone)]
pub struct RecordFrame {
    pub samples: Vec<f32>,
    pub calc_time: CalcTime,
    pub sample_rate: u32,
}

/// `true` if `n` has no divisor other than 1 and itself, for `n >= 2`.
fn is_prime(n: u32) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3u32;
    while d.saturating_mul(d) <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

/// Working parameters derived from the input rate, the highest tone
/// frequency that must survive processing, and (optionally) a requested
/// recording rate. Mirrors `GetBestWorkingParameters`: `Dproc` starts from
/// the Nyquist-driven floor division and is nudged off a prime factor; when
/// recording is requested, `Dproc` is then rounded down to the nearest
/// multiple of `Drec` so the recording decimation (fixed by the user's
/// requested storage rate) divides it exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingParameters {
    pub dproc: u32,
    pub drec: Option<u32>,
}

pub fn best_working_parameters(
    input_rate: u32,
    max_required_proc_freq: f64,
    recording_rate: Option<u32>,
) -> Result<WorkingParameters, DownsampleError> {
    let raw = (input_rate as f64 / (2.0 * max_required_proc_freq)).floor();
    if raw < 1.0 {
        return Err(DownsampleError::InvalidDecimation(raw.max(0.0) as u32));
    }
    let mut dproc = raw as u32;
    if dproc != 2 && is_prime(dproc) {
        dproc -= 1;
    }
    if dproc == 0 {
        return Err(DownsampleError::InvalidDecimation(0));
    }

    let drec = match recording_rate {
        None => None,
        Some(rate) => {
            let target = (input_rate as f64 / rate as f64).round().max(1.0) as u32;
            if dproc < target {
                dproc = target;
            }
            dproc -= dproc % target;
            if dproc == 0 {
                dproc = target;
            }
            Some(target)
        }
    };

    if let Some(d) = drec {
        if dproc % d != 0 {
            return Err(DownsampleError::NotMultiple { dproc, drec: d });
        }
    }

    Ok(WorkingParameters { dproc, drec })
}

/// A windowed-sinc low-pass FIR filter designed for a given cutoff and
/// transition width, run as a streaming decimator.
pub struct FirDecimator {
    taps: Vec<f64>,
    history: VecDeque<f64>,
    decimation: u32,
    /// Samples already consumed into `history` but not yet aligned to a
    /// decimation boundary.
    phase: u32,
}

impl FirDecimator {
    /// `cutoff_hz` and `transition_width_hz` are both relative to
    /// `sample_rate_hz`; `decimation` is the integer factor `D` such that
    /// each call emits `floor(input.len() / D)` samples.
    pub fn design(
        sample_rate_hz: f64,
        cutoff_hz: f64,
        transition_width_hz: f64,
        decimation: u32,
    ) -> Self {
        let taps = design_lowpass_taps(sample_rate_hz, cutoff_hz, transition_width_hz);
        let history = VecDeque::from(vec![0.0; taps.len().saturating_sub(1)]);
        Self {
            taps,
            history,
            decimation: decimation.max(1),
            phase: 0,
        }
    }

    /// Filters and decimates one chunk, preserving filter state across
    /// calls so chunk boundaries introduce no discontinuity.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(input.len() / self.decimation as usize + 1);
        for &sample in input {
            self.history.push_back(sample as f64);
            if self.history.len() > self.taps.len() {
                self.history.pop_front();
            }

            if self.phase == 0 {
                out.push(self.convolve() as f32);
            }
            self.phase = (self.phase + 1) % self.decimation;
        }
        out
    }
}

impl FirDecimator {
    fn convolve(&self) -> f64 {
        // `history` holds the most recent `taps.len()` samples, oldest
        // first; convolution pairs `taps[0]` with the oldest sample.
        let mut padded: Vec<f64> = vec![0.0; self.taps.len() - self.history.len()];
        padded.extend(self.history.iter().copied());
        self.taps
            .iter()
            .zip(padded.iter())
            .map(|(h, x)| h * x)
            .sum()
    }
}

/// Windowed-sinc low-pass design using a Hamming window; tap count picked
/// from the requested transition width via the standard Hamming-window
/// approximation `N ≈ 3.3 / (Δf / Fs)`, rounded up to an odd length for
/// linear phase.
fn design_lowpass_taps(sample_rate_hz: f64, cutoff_hz: f64, transition_width_hz: f64) -> Vec<f64> {
    let normalized_transition = (transition_width_hz / sample_rate_hz).max(1e-6);
    let mut n = (3.3 / normalized_transition).ceil() as usize;
    if n % 2 == 0 {
        n += 1;
    }
    n = n.clamp(3, 2001);

    let fc = cutoff_hz / sample_rate_hz; // normalized cutoff, cycles/sample
    let m = (n - 1) as f64;
    let mut taps = Vec::with_capacity(n);
    let mut sum = 0.0;
    for i in 0..n {
        let k = i as f64 - m / 2.0;
        let sinc = if k.abs() < 1e-9 {
            2.0 * fc
        } else {
            (2.0 * PI * fc * k).sin() / (PI * k)
        };
        let window = 0.54 - 0.46 * (2.0 * PI * i as f64 / m).cos();
        let tap = sinc * window;
        taps.push(tap);
        sum += tap;
    }
    // Normalize for unity DC gain.
    if sum.abs() > 1e-12 {
        for t in taps.iter_mut() {
            *t /= sum;
        }
    }
    taps
}

/// Drives both branches from a single stream of raw input frames, tagging
/// each output frame with calculated time derived from the input's sample
/// index (never from wall-clock reads).
pub struct DualDownsampler {
    proc_filter: FirDecimator,
    proc_rate: u32,
    rec_filter: Option<FirDecimator>,
    rec_rate: Option<u32>,
    input_rate: u32,
    samples_consumed: u64,
}

impl DualDownsampler {
    pub fn new(
        input_rate: u32,
        max_required_proc_freq: f64,
        trans_width_proc: f64,
        trans_width_rec: f64,
        recording_rate: Option<u32>,
    ) -> Result<Self, DownsampleError> {
        let params = best_working_parameters(input_rate, max_required_proc_freq, recording_rate)?;

        let proc_filter = FirDecimator::design(
            input_rate as f64,
            max_required_proc_freq,
            trans_width_proc,
            params.dproc,
        );
        let proc_rate = (input_rate as f64 / params.dproc as f64).round() as u32;

        let (rec_filter, rec_rate) = match params.drec {
            None => (None, None),
            Some(drec) => {
                let rec_rate = (input_rate as f64 / drec as f64).round() as u32;
                let cutoff = input_rate as f64 / (2.0 * drec as f64);
                (
                    Some(FirDecimator::design(
                        input_rate as f64,
                        cutoff,
                        trans_width_rec,
                        drec,
                    )),
                    Some(rec_rate),
                )
            }
        };

        Ok(Self {
            proc_filter,
            proc_rate,
            rec_filter,
            rec_rate,
            input_rate,
            samples_consumed: 0,
        })
    }

    pub fn proc_sample_rate(&self) -> u32 {
        self.proc_rate
    }

    pub fn rec_sample_rate(&self) -> Option<u32> {
        self.rec_rate
    }

    /// Filters `input` (raw samples at `input_rate`) through both branches.
    /// Output calculated time is derived from `samples_consumed`, the number
    /// of input samples seen before this call.
    pub fn process(&mut self, input: &[f32]) -> (ProcessedFrame, Option<RecordFrame>) {
        let start_calc = CalcTime::new(self.samples_consumed, self.input_rate);
        self.samples_consumed += input.len() as u64;

        let proc_samples = self.proc_filter.process(input);
        let proc_frame = ProcessedFrame {
            samples: proc_samples,
            calc_time: start_calc.rescale(self.proc_rate),
            sample_rate: self.proc_rate,
        };

        let rec_frame = self.rec_filter.as_mut().map(|f| RecordFrame {
            samples: f.process(input),
            calc_time: start_calc.rescale(self.rec_rate.unwrap()),
            sample_rate: self.rec_rate.unwrap(),
        });

        (proc_frame, rec_frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dproc_backs_off_a_prime_factor() {
        // floor(44100 / (2*3000)) = 7, which is prime, so it should step
        // down to 6.
        let params = best_working_parameters(44_100, 3_000.0, None).unwrap();
        assert_eq!(params.dproc, 6);
        assert!(params.drec.is_none());
    }

    #[test]
    fn dproc_is_a_multiple_of_drec_when_recording_is_requested() {
        let params = best_working_parameters(48_000, 3_000.0, Some(8_000)).unwrap();
        let drec = params.drec.unwrap();
        assert_eq!(params.dproc % drec, 0);
    }

    #[test]
    fn decimated_output_length_matches_floor_division() {
        let mut filter = FirDecimator::design(48_000.0, 3_000.0, 400.0, 8);
        let input = vec![0.0f32; 800];
        let out = filter.process(&input);
        assert_eq!(out.len(), 100);
    }

    #[test]
    fn dc_input_passes_through_at_unity_gain() {
        let mut filter = FirDecimator::design(48_000.0, 3_000.0, 400.0, 4);
        let input = vec![1.0f32; 4_000];
        let out = filter.process(&input);
        let tail_avg: f32 = out[out.len() - 20..].iter().sum::<f32>() / 20.0;
        assert!((tail_avg - 1.0).abs() < 0.05);
    }

    #[test]
    fn calculated_time_advances_by_samples_consumed() {
        let mut ds = DualDownsampler::new(48_000, 3_000.0, 400.0, 400.0, Some(8_000)).unwrap();
        let (frame1, _) = ds.process(&vec![0.0f32; 4_800]);
        let (frame2, _) = ds.process(&vec![0.0f32; 4_800]);
        assert!(frame2.calc_time.sample_index() > frame1.calc_time.sample_index());
    }
}
