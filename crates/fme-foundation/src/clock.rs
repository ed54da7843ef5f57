//! Time abstractions used throughout the pipeline.
//!
//! SPEC_FULL.md distinguishes two notions of time per sample:
//!
//! - **Reference time**: wall-clock time captured once per buffer, used only
//!   for labeling output. Approximate, never used to order work.
//! - **Calculated time**: reconstructed purely from the sampling frequency
//!   and a single per-buffer anchor. Drift-free and monotone by construction,
//!   because it is an integer sample count rather than a wall-clock read.

use std::time::{Duration, Instant};

/// A sample-accurate point in a stream, represented as an integer sample
/// index rather than a float duration so that equality comparisons (used by
/// the Tone Searcher's boundary carry-over merge, SPEC_FULL.md open question)
/// are exact rather than subject to floating-point accumulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CalcTime {
    sample_index: u64,
    sample_rate: u32,
}

impl CalcTime {
    pub fn new(sample_index: u64, sample_rate: u32) -> Self {
        Self {
            sample_index,
            sample_rate,
        }
    }

    pub fn sample_index(&self) -> u64 {
        self.sample_index
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Advance by `n` samples at this clock's rate.
    pub fn advance(&self, n: u64) -> Self {
        Self {
            sample_index: self.sample_index + n,
            sample_rate: self.sample_rate,
        }
    }

    pub fn as_seconds(&self) -> f64 {
        self.sample_index as f64 / self.sample_rate as f64
    }

    /// Re-express this instant at a different sample rate, rounding to the
    /// nearest sample. Used when mapping between the processing and
    /// recording branches, which run at different decimated rates.
    pub fn rescale(&self, new_rate: u32) -> Self {
        if new_rate == self.sample_rate {
            return *self;
        }
        let seconds = self.as_seconds();
        Self {
            sample_index: (seconds * new_rate as f64).round() as u64,
            sample_rate: new_rate,
        }
    }
}

/// Clock trait for wall-clock reference timestamps, abstracted so tests can
/// run on virtual time instead of real `Instant`s.
pub trait WallClock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Real-time wall clock used in production.
#[derive(Default)]
pub struct RealClock;

impl WallClock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock for deterministic tests of worker loops that sleep on a
/// cycle time.
pub struct TestClock {
    current: std::sync::Mutex<Instant>,
}

impl Default for TestClock {
    fn default() -> Self {
        Self {
            current: std::sync::Mutex::new(Instant::now()),
        }
    }
}

impl TestClock {
    pub fn advance(&self, duration: Duration) {
        let mut t = self.current.lock().unwrap();
        *t += duration;
    }
}

impl WallClock for TestClock {
    fn now(&self) -> Instant {
        *self.current.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
        std::thread::yield_now();
    }
}

pub type SharedClock = std::sync::Arc<dyn WallClock>;

pub fn real_clock() -> SharedClock {
    std::sync::Arc::new(RealClock)
}

pub fn test_clock() -> SharedClock {
    std::sync::Arc::new(TestClock::default())
}
