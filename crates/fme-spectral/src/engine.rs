//! A single STFT branch (fine-time or fine-frequency), SPEC_FULL.md §4.3.
//!
//! Grounded on `SpectralAnalyzer` (spectral analysis with a pre-allocated
//! conversion buffer, `tracing::debug!` on a failed transform) but built on
//! `rustfft` directly rather than `spectrum_analyzer`, which doesn't expose
//! per-peak prominence or parabolic interpolation — both required here.

use crate::types::{Peak, PeakFrame};
use fme_foundation::{CalcTime, SpectralError};
use rustfft::{num_complex::Complex32, Fft, FftPlanner};
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct StftParams {
    pub window_len_ms: f64,
    pub fft_size: usize,
    pub overlap: f64,
    pub delta: f64,
    pub max_num_peaks: usize,
}

pub struct SpectrogramEngine {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    window_samples: usize,
    hop_samples: usize,
    fft_size: usize,
    delta: f64,
    max_num_peaks: usize,
    sample_rate: u32,
    buffer: VecDeque<f32>,
    samples_consumed: u64,
}

impl SpectrogramEngine {
    pub fn new(sample_rate: u32, params: &StftParams) -> Result<Self, SpectralError> {
        if !(0.0..1.0).contains(&params.overlap) {
            return Err(SpectralError::InvalidOverlap(params.overlap));
        }
        let window_samples =
            ((params.window_len_ms / 1000.0) * sample_rate as f64).round() as usize;
        if window_samples > params.fft_size {
            return Err(SpectralError::WindowTooLarge {
                window: window_samples,
                fft_size: params.fft_size,
            });
        }
        let hop_samples =
            ((window_samples as f64) * (1.0 - params.overlap)).round().max(1.0) as usize;

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(params.fft_size);
        let window = hann_window(window_samples);

        Ok(Self {
            fft,
            window,
            window_samples,
            hop_samples,
            fft_size: params.fft_size,
            delta: params.delta,
            max_num_peaks: params.max_num_peaks,
            sample_rate,
            buffer: VecDeque::new(),
            samples_consumed: 0,
        })
    }

    /// Feeds newly-available processing-branch samples and returns every hop
    /// that became ready to analyze (zero, one, or several).
    pub fn push(&mut self, samples: &[f32]) -> Vec<PeakFrame> {
        self.buffer.extend(samples.iter().copied());
        let mut out = Vec::new();

        while self.buffer.len() >= self.window_samples {
            let windowed: Vec<f32> = self
                .buffer
                .iter()
                .take(self.window_samples)
                .zip(self.window.iter())
                .map(|(s, w)| s * w)
                .collect();

            let reference_time = Instant::now();
            let calc_time = CalcTime::new(self.samples_consumed, self.sample_rate);
            out.push(PeakFrame {
                reference_time,
                calc_time,
                peaks: self.analyze_hop(&windowed),
            });

            let drain = self.hop_samples.min(self.buffer.len());
            self.buffer.drain(..drain);
            self.samples_consumed += drain as u64;
        }

        out
    }

    fn analyze_hop(&self, windowed: &[f32]) -> Vec<Peak> {
        let mut spectrum: Vec<Complex32> = windowed
            .iter()
            .map(|&s| Complex32::new(s, 0.0))
            .chain(std::iter::repeat(Complex32::new(0.0, 0.0)))
            .take(self.fft_size)
            .collect();
        self.fft.process(&mut spectrum);

        let half = self.fft_size / 2;
        let magnitudes: Vec<f64> = spectrum[..half]
            .iter()
            .map(|c| (c.norm() as f64) / self.fft_size as f64)
            .collect();

        let candidates = prominent_peaks(&magnitudes, self.delta);
        let mut peaks: Vec<Peak> = candidates
            .into_iter()
            .map(|bin| {
                let (refined_bin, level) = parabolic_refine(&magnitudes, bin);
                Peak {
                    frequency: refined_bin * self.sample_rate as f64 / self.fft_size as f64,
                    level,
                }
            })
            .collect();

        if peaks.len() > self.max_num_peaks {
            // Frames noisier than the configured peak budget are treated as
            // noise and emitted empty rather than truncated, per spec.
            peaks.clear();
        } else {
            peaks.sort_by(|a, b| a.frequency.partial_cmp(&b.frequency).unwrap());
        }
        peaks
    }
}

fn hann_window(n: usize) -> Vec<f32> {
    if n <= 1 {
        return vec![1.0; n];
    }
    (0..n)
        .map(|i| {
            (0.5 - 0.5 * (2.0 * PI * i as f64 / (n - 1) as f64).cos()) as f32
        })
        .collect()
}

/// Local maxima whose prominence (the drop to the nearest lower valley on
/// the lower-frequency side) exceeds `delta` times the peak-normalized
/// maximum magnitude.
fn prominent_peaks(magnitudes: &[f64], delta: f64) -> Vec<usize> {
    if magnitudes.is_empty() {
        return Vec::new();
    }
    let global_max = magnitudes.iter().cloned().fold(0.0, f64::max);
    if global_max <= 0.0 {
        return Vec::new();
    }
    let threshold = delta * global_max;

    let mut peaks = Vec::new();
    for i in 1..magnitudes.len().saturating_sub(1) {
        if magnitudes[i] > magnitudes[i - 1] && magnitudes[i] >= magnitudes[i + 1] {
            // Walk left to the nearest valley before the next rise.
            let mut valley = magnitudes[i];
            let mut j = i;
            while j > 0 && magnitudes[j - 1] <= magnitudes[j] {
                j -= 1;
                valley = valley.min(magnitudes[j]);
            }
            let prominence = magnitudes[i] - valley;
            if prominence >= threshold {
                peaks.push(i);
            }
        }
    }
    peaks
}

/// Refines a bin index to a fractional bin via parabolic interpolation over
/// the bin and its two neighbors, returning `(fractional_bin, peak_level)`.
fn parabolic_refine(magnitudes: &[f64], bin: usize) -> (f64, f64) {
    if bin == 0 || bin + 1 >= magnitudes.len() {
        return (bin as f64, magnitudes[bin]);
    }
    let (left, center, right) = (magnitudes[bin - 1], magnitudes[bin], magnitudes[bin + 1]);
    let denom = left - 2.0 * center + right;
    if denom.abs() < 1e-12 {
        return (bin as f64, center);
    }
    let offset = 0.5 * (left - right) / denom;
    let refined_bin = bin as f64 + offset;
    let refined_level = center - 0.25 * (left - right) * offset;
    (refined_bin, refined_level)
}
