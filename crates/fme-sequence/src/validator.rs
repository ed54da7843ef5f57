//! Sequence Validator, SPEC_FULL.md §4.5.
//!
//! Grounded on `original_source/Core/FME.h`'s rule parameters (tone length
//! window, `deltaTMaxTwice`, level ratio, `excessTime`) and `Search.h`'s
//! sliding five-tone window, expressed here as a small streaming struct
//! rather than the original's buffered-iterator pipeline.

use crate::types::{CodeData, CodeTone};
use fme_foundation::ValidatorError;
use fme_tonesearch::Tone;
use std::collections::VecDeque;

pub struct ValidatorParams {
    pub code_length: usize,
    pub min_length_secs: f64,
    pub max_length_secs: f64,
    pub excess_time_secs: f64,
    pub delta_t_max_twice_secs: f64,
    pub max_tone_level_ratio: f64,
    /// Slot index mapped to digit 0 (the 10th configured search frequency).
    pub zero_slot: usize,
    /// Slot index of the repetition tone "R" (the 11th search frequency).
    pub repetition_slot: usize,
}

impl ValidatorParams {
    fn validate_self(&self) -> Result<(), ValidatorError> {
        if self.code_length == 0 {
            return Err(ValidatorError::InvalidRules("code_length must be > 0".into()));
        }
        if self.min_length_secs > self.max_length_secs {
            return Err(ValidatorError::InvalidRules(
                "min_length_secs must be <= max_length_secs".into(),
            ));
        }
        if self.max_tone_level_ratio < 1.0 {
            return Err(ValidatorError::InvalidRules(
                "max_tone_level_ratio must be >= 1.0".into(),
            ));
        }
        Ok(())
    }
}

pub struct SequenceValidator {
    params: ValidatorParams,
    window: VecDeque<Tone>,
}

impl SequenceValidator {
    pub fn new(params: ValidatorParams) -> Result<Self, ValidatorError> {
        params.validate_self()?;
        let capacity = params.code_length;
        Ok(Self {
            params,
            window: VecDeque::with_capacity(capacity),
        })
    }

    /// Feeds one tone from the Tone Searcher's output stream. Returns the
    /// completed code together with its first tone (callers need the first
    /// tone's timestamps to build a `Sequence`) whenever the current window
    /// completes a valid sequence.
    pub fn push(&mut self, tone: Tone) -> Option<(Tone, CodeData)> {
        let padded_min = self.params.min_length_secs - self.params.excess_time_secs;
        let padded_max = self.params.max_length_secs + self.params.excess_time_secs;
        let length_secs = tone.calc_end.as_seconds() - tone.calc_start.as_seconds();
        if length_secs < padded_min || length_secs > padded_max {
            self.window.clear();
            return None;
        }

        if let Some(last) = self.window.back() {
            let gap = tone.calc_start.as_seconds() - last.calc_start.as_seconds();
            if gap > self.params.delta_t_max_twice_secs {
                self.window.clear();
            }
        }

        self.window.push_back(tone);
        if self.window.len() > self.params.code_length {
            self.window.pop_front();
        }
        if self.window.len() < self.params.code_length {
            return None;
        }

        match self.try_resolve() {
            Some(code) => {
                let first = *self.window.front().expect("window is full here");
                self.window.clear();
                Some((first, code))
            }
            None => {
                // Level ratio failed; slide the window and keep trying.
                self.window.pop_front();
                None
            }
        }
    }

    fn try_resolve(&self) -> Option<CodeData> {
        let tones: Vec<&Tone> = self.window.iter().collect();
        let l1 = tones[0].peak_level;
        if l1 <= 0.0 {
            return None;
        }

        let mut digits = Vec::with_capacity(tones.len());
        let mut prev_digit: Option<u8> = None;
        for t in &tones {
            let digit = self.digit_for_slot(t.tone_index, prev_digit)?;
            digits.push(digit);
            prev_digit = Some(digit);
        }

        for t in &tones[1..] {
            let ratio = t.peak_level / l1;
            let bound = self.params.max_tone_level_ratio;
            if ratio < 1.0 / bound || ratio > bound {
                return None;
            }
        }

        let mut code_tones = Vec::with_capacity(tones.len());
        let mut prev_start = tones[0].calc_start.as_seconds();
        for (i, t) in tones.iter().enumerate() {
            let start = t.calc_start.as_seconds();
            let period = if i == 0 { 0.0 } else { start - prev_start };
            code_tones.push(CodeTone {
                digit: digits[i],
                length_secs: t.calc_end.as_seconds() - start,
                period_secs: period,
                frequency: t.frequency,
                peak_level: t.peak_level,
            });
            prev_start = start;
        }

        Some(CodeData { tones: code_tones })
    }

    fn digit_for_slot(&self, slot: usize, prev_digit: Option<u8>) -> Option<u8> {
        if slot == self.params.repetition_slot {
            return prev_digit;
        }
        if slot == self.params.zero_slot {
            return Some(0);
        }
        if slot < self.params.zero_slot {
            return Some((slot + 1) as u8);
        }
        None
    }
}
