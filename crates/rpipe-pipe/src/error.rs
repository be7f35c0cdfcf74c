//! Pipe errors

use crate::engine::EngineError;
use rpipe_proto::ProtoError;
use thiserror::Error;

pub type PipeResult<T> = Result<T, PipeError>;

/// Errors surfaced by pipe operations and through `on_error`
#[derive(Debug, Error)]
pub enum PipeError {
    /// Construction-time programmer error (conv 0, inconsistent key)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Transport error: {0}")]
    Transport(#[from] EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No destination endpoint for outbound packet")]
    NoPeer,

    #[error("Pipe closed")]
    Closed,

    #[error("Pipe not initialized")]
    NotInitialized,

    #[error("No {0} callback installed")]
    Unwired(&'static str),

    #[error("Re-entrant call into {0}")]
    Reentrant(&'static str),
}

impl From<ProtoError> for PipeError {
    fn from(err: ProtoError) -> Self {
        PipeError::InvariantViolation(err.to_string())
    }
}
