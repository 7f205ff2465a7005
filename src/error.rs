use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the detector and its streaming overlay.
#[derive(Debug, Error)]
pub enum VadError {
    /// The model file is missing, unreadable, or its graph does not carry the
    /// expected `input`/`state`/`sr` inputs and `output`/`stateN` outputs.
    #[error("failed to load VAD model from {path:?}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    /// The configuration was rejected at initialization.
    #[error("invalid detector configuration: {0}")]
    Config(String),

    /// A frame of the wrong length was passed to `process_chunk`. The
    /// detector state is untouched.
    #[error("expected a frame of {expected} samples, got {got}")]
    BadFrameSize { expected: usize, got: usize },

    /// A forward pass through the model failed.
    #[error("VAD inference failed: {0}")]
    Inference(#[from] ort::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<hound::Error> for VadError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => VadError::Io(e),
            other => VadError::Io(std::io::Error::other(other)),
        }
    }
}
