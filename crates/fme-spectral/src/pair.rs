//! Spectrogram Pair, SPEC_FULL.md §4.3: the fine-time and fine-frequency
//! branches run on independent threads so a slow hop on one branch never
//! stalls the other; the Tone Searcher reorders by calculated time itself.

use crate::engine::{SpectrogramEngine, StftParams};
use crate::types::PeakFrame;
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub struct SpectrogramPair {
    input_tx_time: Sender<Arc<[f32]>>,
    input_tx_freq: Sender<Arc<[f32]>>,
    fine_time_rx: Receiver<PeakFrame>,
    fine_freq_rx: Receiver<PeakFrame>,
    workers: Vec<JoinHandle<()>>,
}

impl SpectrogramPair {
    pub fn spawn(
        sample_rate: u32,
        fine_time: StftParams,
        fine_freq: StftParams,
    ) -> Result<Self, fme_foundation::SpectralError> {
        // Construct both engines up front so a bad parameter fails before any
        // thread is spawned.
        let mut engine_time = SpectrogramEngine::new(sample_rate, &fine_time)?;
        let mut engine_freq = SpectrogramEngine::new(sample_rate, &fine_freq)?;

        // Each branch gets its own input channel; a cloned `Receiver` would
        // share one queue between both threads (load-balanced, not
        // broadcast), so every chunk would reach only one branch.
        let (input_tx_time, input_rx_time) = crossbeam_channel::unbounded::<Arc<[f32]>>();
        let (input_tx_freq, input_rx_freq) = crossbeam_channel::unbounded::<Arc<[f32]>>();

        let (fine_time_tx, fine_time_rx) = crossbeam_channel::unbounded();
        let (fine_freq_tx, fine_freq_rx) = crossbeam_channel::unbounded();

        let time_handle = thread::Builder::new()
            .name("fme-stft-fine-time".to_string())
            .spawn(move || {
                while let Ok(chunk) = input_rx_time.recv() {
                    for frame in engine_time.push(&chunk) {
                        if fine_time_tx.send(frame).is_err() {
                            break;
                        }
                    }
                }
            })
            .expect("failed to spawn fine-time STFT thread");

        let freq_handle = thread::Builder::new()
            .name("fme-stft-fine-freq".to_string())
            .spawn(move || {
                while let Ok(chunk) = input_rx_freq.recv() {
                    for frame in engine_freq.push(&chunk) {
                        if fine_freq_tx.send(frame).is_err() {
                            break;
                        }
                    }
                }
            })
            .expect("failed to spawn fine-frequency STFT thread");

        Ok(Self {
            input_tx_time,
            input_tx_freq,
            fine_time_rx,
            fine_freq_rx,
            workers: vec![time_handle, freq_handle],
        })
    }

    /// Feeds one chunk of processing-branch samples to both branches.
    pub fn push(&self, samples: &[f32]) {
        let shared: Arc<[f32]> = Arc::from(samples);
        let _ = self.input_tx_time.send(shared.clone());
        let _ = self.input_tx_freq.send(shared);
    }

    pub fn fine_time_receiver(&self) -> Receiver<PeakFrame> {
        self.fine_time_rx.clone()
    }

    pub fn fine_freq_receiver(&self) -> Receiver<PeakFrame> {
        self.fine_freq_rx.clone()
    }
}

impl Drop for SpectrogramPair {
    fn drop(&mut self) {
        // Dropping both input senders closes each worker's receiver; join what's left.
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn params(window_ms: f64, fft_size: usize) -> StftParams {
        StftParams {
            window_len_ms: window_ms,
            fft_size,
            overlap: 0.5,
            delta: 0.1,
            max_num_peaks: 4,
        }
    }

    #[test]
    fn both_branches_emit_frames_for_the_same_input() {
        let pair = SpectrogramPair::spawn(8_000, params(40.0, 512), params(160.0, 2048)).unwrap();
        let rx_time = pair.fine_time_receiver();
        let rx_freq = pair.fine_freq_receiver();

        let signal: Vec<f32> = (0..16_000)
            .map(|i| (2.0 * std::f64::consts::PI * 1060.0 * i as f64 / 8_000.0).sin() as f32)
            .collect();
        pair.push(&signal);
        drop(pair);

        let got_time = rx_time.recv_timeout(Duration::from_secs(2)).is_ok();
        let got_freq = rx_freq.recv_timeout(Duration::from_secs(2)).is_ok();
        assert!(got_time);
        assert!(got_freq);
    }
}
