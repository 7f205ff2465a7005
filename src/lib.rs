pub mod config;
pub mod detector;
pub mod error;
pub mod pcm;
pub mod resample;
pub mod silero_model;
pub mod stream;

// Re-export key components for easier access
pub use config::{read_vad_config, VadConfig};
pub use detector::{VadDetector, VadResult, VadSegment};
pub use error::VadError;
pub use silero_model::SileroModel;
pub use stream::VadStream;

/// Engine version tag.
pub const VERSION: &str = "1.0.0-silero-v5";
