use thiserror::Error;

use crate::engine::EngineError;
use crate::resample::ResampleError;

/// Errors surfaced by the serving pipeline.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("engine is not loaded yet")]
    EngineNotReady,

    #[error("unsupported mode: {0}")]
    UnsupportedMode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Resample(#[from] ResampleError),

    #[error("no audio data generated")]
    EmptyOutput,

    #[error("internal error: {0}")]
    Internal(String),
}

impl SynthesisError {
    /// Whether the caller sent something we cannot serve, as opposed to a
    /// failure on our side.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::UnsupportedMode(_) | Self::InvalidRequest(_))
    }
}
