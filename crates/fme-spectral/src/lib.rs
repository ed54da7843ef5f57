//! Dual-resolution short-time spectral analysis, SPEC_FULL.md §4.3.
//!
//! Two STFT branches run against the same processing-branch sample stream:
//! a fine-time branch (short window, coarse frequency resolution) and a
//! fine-frequency branch (long window, fine frequency resolution). The Tone
//! Searcher fuses their peak streams to get both precise onset/offset and
//! reliable frequency identity.

pub mod engine;
pub mod pair;
pub mod types;

pub use engine::{SpectrogramEngine, StftParams};
pub use pair::SpectrogramPair;
pub use types::{Peak, PeakFrame};
