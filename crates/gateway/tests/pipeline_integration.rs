//! Cross-crate integration test: a synthetic five-tone signal, generated
//! in this file (a cfg(test)-only generator in another crate isn't visible
//! to an external integration test binary), is pushed through the real
//! Dual Downsampler, Spectrogram Pair, Tone Searcher and Sequence Validator
//! and checked against the digits it encodes.
//!
//! Parameters below are the same fixtures already proven individually in
//! each stage's own colocated tests (`fme_spectral::engine`,
//! `fme_tonesearch::searcher`, `fme_sequence::validator`), composed here
//! instead of the full production tuning so the synthetic buffer stays
//! small.

use fme_audio::DualDownsampler;
use fme_sequence::{SequenceValidator, ValidatorParams};
use fme_spectral::{SpectrogramPair, StftParams};
use fme_tonesearch::{SearcherParams, ToneSearcher};
use std::f64::consts::PI;
use std::time::Duration;

const SEARCH_FREQS: [f64; 11] = [
    2_400.0, 1_060.0, 1_160.0, 1_270.0, 1_400.0, 1_530.0, 1_670.0, 1_830.0, 2_000.0, 2_200.0,
    2_800.0,
];

fn digits_to_slots(digits: &[u8]) -> Vec<usize> {
    let mut slots = Vec::with_capacity(digits.len());
    for (i, &d) in digits.iter().enumerate() {
        if i > 0 && d == digits[i - 1] {
            slots.push(10);
        } else if d == 0 {
            slots.push(9);
        } else {
            slots.push((d - 1) as usize);
        }
    }
    slots
}

/// Renders `digits` as a mono buffer at `sample_rate`: `lead_in_secs` of
/// silence, then one tone per `tone_len_secs` spaced `cycle_secs` apart,
/// then `tail_secs` of trailing silence so the last tone's offset and the
/// searcher's lookahead both have something to close against.
fn generate_samples(
    digits: &[u8],
    sample_rate: u32,
    lead_in_secs: f64,
    tone_len_secs: f64,
    cycle_secs: f64,
    tail_secs: f64,
) -> Vec<f32> {
    let slots = digits_to_slots(digits);
    let total_secs = lead_in_secs + cycle_secs * slots.len() as f64 + tail_secs;
    let mut buf = vec![0.0f64; (total_secs * sample_rate as f64).ceil() as usize];

    for (i, &slot) in slots.iter().enumerate() {
        let freq = SEARCH_FREQS[slot];
        let start_secs = lead_in_secs + cycle_secs * i as f64;
        let start_sample = (start_secs * sample_rate as f64).round() as usize;
        let n_samples = (tone_len_secs * sample_rate as f64).round() as usize;
        for s in 0..n_samples {
            let idx = start_sample + s;
            if idx >= buf.len() {
                break;
            }
            let t = s as f64 / sample_rate as f64;
            buf[idx] = (2.0 * PI * freq * t).sin();
        }
    }

    buf.into_iter().map(|s| s as f32).collect()
}

#[test]
fn synthetic_25634_survives_downsample_spectrogram_search_and_validation() {
    let input_rate = 8_000u32;
    let samples = generate_samples(&[2, 5, 6, 3, 4], input_rate, 0.05, 0.085, 0.090, 0.300);

    let mut downsampler =
        DualDownsampler::new(input_rate, 3_500.0, 600.0, 600.0, None).expect("downsampler design");
    assert_eq!(downsampler.proc_sample_rate(), input_rate); // no decimation at this rate

    let fine_time = StftParams {
        window_len_ms: 40.0,
        fft_size: 512,
        overlap: 0.5,
        delta: 0.1,
        max_num_peaks: 4,
    };
    let fine_freq = StftParams {
        window_len_ms: 80.0,
        fft_size: 1_024,
        overlap: 0.5,
        delta: 0.1,
        max_num_peaks: 4,
    };
    let spectrogram = SpectrogramPair::spawn(input_rate, fine_time, fine_freq)
        .expect("spectrogram pair spawn");
    let fine_time_rx = spectrogram.fine_time_receiver();
    let fine_freq_rx = spectrogram.fine_freq_receiver();

    // Feed the capture-adapter-stub's output in fixed-size chunks, the way
    // the real worker thread hands buffers to the downsampler.
    for chunk in samples.chunks(256) {
        let (proc_frame, _rec_frame) = downsampler.process(chunk);
        spectrogram.push(&proc_frame.samples);
    }

    let mut searcher = ToneSearcher::new(SearcherParams {
        max_delta_f: 0.03,
        max_freq_dev_constrained: 0.35,
        max_freq_dev_unconstrained: 0.1,
        num_neighbours: 2,
        eval_tone_length_secs: 0.2,
        search_freqs: SEARCH_FREQS.to_vec(),
    })
    .expect("tone searcher construction");

    // Drain both STFT branches; the worker threads run asynchronously from
    // `push`, so give them a moment to catch up on this small buffer.
    while let Ok(frame) = fine_time_rx.recv_timeout(Duration::from_millis(500)) {
        searcher.push_fine(frame);
    }
    while let Ok(frame) = fine_freq_rx.recv_timeout(Duration::from_millis(500)) {
        searcher.push_coarse(frame);
    }

    let mut validator = SequenceValidator::new(ValidatorParams {
        code_length: 5,
        min_length_secs: 0.070,
        max_length_secs: 0.100,
        excess_time_secs: 0.015,
        delta_t_max_twice_secs: 0.150,
        max_tone_level_ratio: 3.0,
        zero_slot: 9,
        repetition_slot: 10,
    })
    .expect("validator construction");

    let mut decoded = None;
    loop {
        match searcher.step() {
            Ok(tones) => {
                for tone in tones {
                    if let Some((_, code)) = validator.push(tone) {
                        decoded = Some(code);
                    }
                }
            }
            Err(_) => break, // InsufficientLookahead: no more complete windows
        }
    }

    let code = decoded.expect("expected a validated five-tone sequence");
    let digits: Vec<u8> = code.tones.iter().map(|t| t.digit).collect();
    assert_eq!(digits, vec![2, 5, 6, 3, 4]);
}
