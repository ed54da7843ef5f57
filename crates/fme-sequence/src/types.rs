use fme_foundation::CalcTime;
use std::time::Instant;

/// One tone inside a validated sequence, with the digit already resolved
/// (the repetition tone "R" has been replaced by its predecessor's digit).
#[derive(Debug, Clone, PartialEq)]
pub struct CodeTone {
    pub digit: u8,
    /// Seconds, `calc_end - calc_start`.
    pub length_secs: f64,
    /// Seconds, this tone's start minus the previous tone's start (0 for the
    /// first tone).
    pub period_secs: f64,
    pub frequency: f64,
    pub peak_level: f64,
}

/// The five-tone body of a validated sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeData {
    pub tones: Vec<CodeTone>,
}

impl CodeData {
    pub fn digits(&self) -> Vec<u8> {
        self.tones.iter().map(|t| t.digit).collect()
    }
}

/// Terminal output of the detection core: one validated five-tone selcall.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    pub reference_start: Instant,
    pub calc_start: CalcTime,
    pub code: CodeData,
    pub info: Option<String>,
}

/// Summary view handed to listeners that only need the digits, per
/// SPEC_FULL.md §4.7's two dispatch flavors.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceSummary {
    pub reference_start: Instant,
    pub digits: Vec<u8>,
    pub info: Option<String>,
}

impl From<&Sequence> for SequenceSummary {
    fn from(seq: &Sequence) -> Self {
        Self {
            reference_start: seq.reference_start,
            digits: seq.code.digits(),
            info: seq.info.clone(),
        }
    }
}
