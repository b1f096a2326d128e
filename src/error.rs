use gs_lib::{PlanError, StoreError};
use thiserror::Error;

/// Engine-level errors. Missing chunks and decode failures never surface
/// here; they degrade to silence inside the stream pipeline. What does
/// surface is fatal to the whole request (bad plan, no manifests) or to an
/// explicit operation (export).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The operation was superseded or cancelled; not a failure. Callers
    /// drop the result and no side effects remain.
    #[error("cancelled")]
    Cancelled,

    #[error("no stream loaded")]
    NoStream,

    #[error("unsupported FFT size {0} (expected 512, 1024, 2048 or 4096)")]
    BadFftSize(usize),

    #[error("WAV export failed: {0}")]
    Export(#[from] hound::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
