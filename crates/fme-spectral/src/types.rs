use fme_foundation::CalcTime;
use std::time::Instant;

/// A single local maximum extracted from one STFT hop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Hz, refined by parabolic interpolation across the three bins
    /// straddling the maximum.
    pub frequency: f64,
    /// Peak-normalized absolute level, proportional to the bin's PSD.
    pub level: f64,
}

/// One hop's worth of retained peaks, timestamped both ways per
/// SPEC_FULL.md §3: `reference_time` for labeling, `calc_time` for ordering.
#[derive(Debug, Clone)]
pub struct PeakFrame {
    pub reference_time: Instant,
    pub calc_time: CalcTime,
    pub peaks: Vec<Peak>,
}
