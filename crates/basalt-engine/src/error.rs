//! Error types of the verification engines

use basalt_logic::SolverError;
use thiserror::Error;

/// Errors surfaced by the engines. Only [`VerifierError::SolverUnknown`] and
/// [`VerifierError::Timeout`] are recoverable (the top-level driver maps them
/// to an `Unknown` verdict); everything else aborts the session.
#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("invalid transition system: {0}")]
    InvalidSystem(String),

    #[error("solver returned unknown: {0}")]
    SolverUnknown(String),

    #[error("internal inconsistency: {0}")]
    Internal(String),

    #[error("deadline exceeded")]
    Timeout,

    #[error("unrecognised option: {0}")]
    BadOption(String),
}

impl From<SolverError> for VerifierError {
    fn from(err: SolverError) -> Self {
        match err {
            SolverError::Incomplete(msg) => VerifierError::SolverUnknown(msg),
            SolverError::Internal(msg) => VerifierError::Internal(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, VerifierError>;
