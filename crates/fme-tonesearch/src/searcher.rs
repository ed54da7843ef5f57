//! The Tone Searcher, SPEC_FULL.md §4.4.
//!
//! Ported from the algorithm in `CToneSearch` (`ToneSearch.h`):
//! `CreateFoundFrequencyTable` + `SearchForTonesTwoStreams` (coarse match),
//! `DefineFrequencyLimits` (adaptive bounds), `FindStartStopTimes` (onset and
//! offset refinement), and the carry-over handled at the top of each
//! `PerformToneSearch` call — not transliterated, since the original spreads
//! state across output iterators and `streamLengthException`-driven retry;
//! here a small struct owns two frame buffers and the open-tone state
//! persists naturally across `step()` calls instead of being threaded
//! through by hand.

use crate::types::{OpenTone, PossibleTone, SearchFrequency, Tone};
use fme_foundation::ToneSearchError;
use fme_spectral::PeakFrame;
use std::collections::VecDeque;

pub struct SearcherParams {
    pub max_delta_f: f64,
    pub max_freq_dev_constrained: f64,
    pub max_freq_dev_unconstrained: f64,
    pub num_neighbours: usize,
    pub eval_tone_length_secs: f64,
    pub search_freqs: Vec<f64>,
}

pub struct ToneSearcher {
    search_freqs: Vec<SearchFrequency>,
    max_delta_f: f64,
    max_freq_dev_constrained: f64,
    max_freq_dev_unconstrained: f64,
    num_neighbours: usize,
    eval_tone_length_secs: f64,

    coarse_buf: VecDeque<PeakFrame>,
    fine_buf: VecDeque<PeakFrame>,
    open: Vec<Option<OpenTone>>,
}

impl ToneSearcher {
    pub fn new(params: SearcherParams) -> Result<Self, ToneSearchError> {
        if params.search_freqs.len() < 10 {
            return Err(ToneSearchError::TooFewSearchFrequencies(
                params.search_freqs.len(),
            ));
        }
        let search_freqs: Vec<SearchFrequency> = params
            .search_freqs
            .iter()
            .enumerate()
            .map(|(slot, &nominal_hz)| SearchFrequency { slot, nominal_hz })
            .collect();
        let num_slots = search_freqs.len();

        Ok(Self {
            search_freqs,
            max_delta_f: params.max_delta_f,
            max_freq_dev_constrained: params.max_freq_dev_constrained,
            max_freq_dev_unconstrained: params.max_freq_dev_unconstrained,
            num_neighbours: params.num_neighbours,
            eval_tone_length_secs: params.eval_tone_length_secs,
            coarse_buf: VecDeque::new(),
            fine_buf: VecDeque::new(),
            open: vec![None; num_slots],
        })
    }

    pub fn push_coarse(&mut self, frame: PeakFrame) {
        self.coarse_buf.push_back(frame);
    }

    pub fn push_fine(&mut self, frame: PeakFrame) {
        self.fine_buf.push_back(frame);
    }

    /// Attempts one analysis step. `Err(InsufficientLookahead)` means there
    /// isn't enough buffered data yet; it is not a real error, the caller
    /// should push more frames and retry.
    pub fn step(&mut self) -> Result<Vec<Tone>, ToneSearchError> {
        let Some(first_coarse) = self.coarse_buf.front() else {
            return Err(ToneSearchError::InsufficientLookahead);
        };
        let window_start = first_coarse.calc_time.as_seconds();
        let window_end = window_start + self.eval_tone_length_secs;

        if !self
            .coarse_buf
            .iter()
            .any(|f| f.calc_time.as_seconds() >= window_end)
        {
            return Err(ToneSearchError::InsufficientLookahead);
        }

        let fine_window_len = self
            .fine_buf
            .iter()
            .take_while(|f| f.calc_time.as_seconds() < window_end)
            .count();
        let lookahead_len = self
            .fine_buf
            .iter()
            .skip(fine_window_len)
            .take(self.num_neighbours)
            .count();
        if lookahead_len < self.num_neighbours {
            return Err(ToneSearchError::InsufficientLookahead);
        }

        let coarse_window: Vec<PeakFrame> = self
            .coarse_buf
            .iter()
            .take_while(|f| f.calc_time.as_seconds() < window_end)
            .cloned()
            .collect();
        let table_frames: Vec<PeakFrame> = self
            .fine_buf
            .iter()
            .take(fine_window_len + self.num_neighbours)
            .cloned()
            .collect();

        let mut table: Vec<Vec<Option<PossibleTone>>> =
            vec![vec![None; self.search_freqs.len()]; table_frames.len()];

        self.coarse_match(&coarse_window, &table_frames, window_end, &mut table);
        self.define_frequency_limits(&mut table);
        let emitted = self.find_start_stop_times(&table_frames[..fine_window_len], &table);

        // Retire consumed coarse frames and the (non-lookahead) fine frames.
        while self
            .coarse_buf
            .front()
            .map(|f| f.calc_time.as_seconds() < window_end)
            .unwrap_or(false)
        {
            self.coarse_buf.pop_front();
        }
        for _ in 0..fine_window_len {
            self.fine_buf.pop_front();
        }

        Ok(emitted)
    }

    fn coarse_match(
        &self,
        coarse_window: &[PeakFrame],
        table_frames: &[PeakFrame],
        window_end: f64,
        table: &mut [Vec<Option<PossibleTone>>],
    ) {
        for (ci, coarse_frame) in coarse_window.iter().enumerate() {
            let coarse_start = coarse_frame.calc_time.as_seconds();
            let coarse_stop = coarse_window
                .get(ci + 1)
                .map(|f| f.calc_time.as_seconds())
                .unwrap_or(window_end);

            for peak in &coarse_frame.peaks {
                for search in &self.search_freqs {
                    let rel_err = (peak.frequency - search.nominal_hz).abs() / search.nominal_hz;
                    if rel_err > self.max_delta_f {
                        continue;
                    }

                    let Some(center_idx) = table_frames
                        .iter()
                        .position(|f| f.calc_time.as_seconds() >= coarse_start)
                    else {
                        continue;
                    };

                    let lo = center_idx.saturating_sub(self.num_neighbours);
                    let hi = (center_idx + self.num_neighbours).min(table_frames.len() - 1);
                    for j in lo..=hi {
                        let t = table_frames[j].calc_time.as_seconds();
                        if t < coarse_start || t >= coarse_stop {
                            continue;
                        }
                        let cell = table[j][search.slot].get_or_insert(PossibleTone {
                            center_freq: peak.frequency,
                            lower_bound: peak.frequency,
                            upper_bound: peak.frequency,
                            level: 0.0,
                        });
                        if peak.level > cell.level {
                            cell.center_freq = peak.frequency;
                        }
                        cell.level = cell.level.max(peak.level);
                    }
                }
            }
        }
    }

    fn define_frequency_limits(&self, table: &mut [Vec<Option<PossibleTone>>]) {
        let num_slots = self.search_freqs.len();
        for row in table.iter_mut() {
            for slot in 0..num_slots {
                let Some(cell) = row[slot] else { continue };
                let nominal = self.search_freqs[slot].nominal_hz;

                let lower_margin = if slot > 0 && row[slot - 1].is_some() {
                    self.max_freq_dev_constrained * (nominal - self.search_freqs[slot - 1].nominal_hz).abs()
                } else {
                    self.max_freq_dev_unconstrained * nominal
                };
                let upper_margin = if slot + 1 < num_slots && row[slot + 1].is_some() {
                    self.max_freq_dev_constrained * (self.search_freqs[slot + 1].nominal_hz - nominal).abs()
                } else {
                    self.max_freq_dev_unconstrained * nominal
                };

                row[slot] = Some(PossibleTone {
                    lower_bound: cell.center_freq - lower_margin,
                    upper_bound: cell.center_freq + upper_margin,
                    ..cell
                });
            }
        }
    }

    fn find_start_stop_times(
        &mut self,
        window_frames: &[PeakFrame],
        table: &[Vec<Option<PossibleTone>>],
    ) -> Vec<Tone> {
        let mut emitted = Vec::new();

        for (j, frame) in window_frames.iter().enumerate() {
            for slot in 0..self.search_freqs.len() {
                let matched_peak = table[j][slot].and_then(|cell| {
                    frame
                        .peaks
                        .iter()
                        .find(|p| p.frequency >= cell.lower_bound && p.frequency <= cell.upper_bound)
                        .map(|p| (cell, p))
                });

                match (matched_peak, self.open[slot]) {
                    (Some((cell, peak)), None) => {
                        self.open[slot] = Some(OpenTone {
                            slot,
                            reference_start: frame.reference_time,
                            calc_start: frame.calc_time,
                            calc_end: frame.calc_time,
                            frequency: peak.frequency,
                            peak_level: cell.level.max(peak.level),
                        });
                    }
                    (Some((cell, peak)), Some(mut open_tone)) => {
                        open_tone.calc_end = frame.calc_time;
                        open_tone.peak_level = open_tone.peak_level.max(cell.level).max(peak.level);
                        self.open[slot] = Some(open_tone);
                    }
                    (None, Some(open_tone)) => {
                        emitted.push(open_tone.into_tone());
                        self.open[slot] = None;
                    }
                    (None, None) => {}
                }
            }
        }

        emitted.sort_by(|a, b| a.calc_start.cmp(&b.calc_start));
        emitted
    }
}
