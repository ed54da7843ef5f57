pub mod supervisor;

pub use supervisor::{AudioFrontController, ErrorCallback};
