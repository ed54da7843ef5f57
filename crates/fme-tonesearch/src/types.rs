use fme_foundation::CalcTime;
use std::time::Instant;

/// A fully-resolved tone, handed to the Sequence Validator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub tone_index: usize,
    pub reference_start: Instant,
    pub calc_start: CalcTime,
    pub calc_end: CalcTime,
    pub frequency: f64,
    pub peak_level: f64,
}

/// One configured search tone: its slot index (0..=9 are digits, with slot
/// 9 meaning digit 0; slot 10 is the repetition tone "R") and nominal
/// frequency.
#[derive(Debug, Clone, Copy)]
pub struct SearchFrequency {
    pub slot: usize,
    pub nominal_hz: f64,
}

/// A table cell: whether a search tone was coarsely matched at this
/// fine-time frame, and if so, its adaptive frequency bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct PossibleTone {
    pub center_freq: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub level: f64,
}

/// A tone still open at the end of an analysis window, carried into the
/// next one per the boundary carry-over rule.
#[derive(Debug, Clone, Copy)]
pub struct OpenTone {
    pub slot: usize,
    pub reference_start: Instant,
    pub calc_start: CalcTime,
    pub calc_end: CalcTime,
    pub frequency: f64,
    pub peak_level: f64,
}

impl OpenTone {
    pub fn into_tone(self) -> Tone {
        Tone {
            tone_index: self.slot,
            reference_start: self.reference_start,
            calc_start: self.calc_start,
            calc_end: self.calc_end,
            frequency: self.frequency,
            peak_level: self.peak_level,
        }
    }
}
