pub mod searcher;
pub mod types;

pub use searcher::{SearcherParams, ToneSearcher};
pub use types::{OpenTone, PossibleTone, SearchFrequency, Tone};
