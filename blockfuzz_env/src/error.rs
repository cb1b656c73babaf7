//! Error types for the application abstraction.

use thiserror::Error;

/// Errors an application can report through the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    /// Transaction could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Transaction was decoded but rejected by the state machine
    #[error("Transaction rejected (code {code}): {log}")]
    Rejected { code: u32, log: String },

    /// Genesis state could not be applied
    #[error("Genesis error: {0}")]
    Genesis(String),

    /// Unrecoverable internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Creates a rejection error.
    pub fn rejected(code: u32, log: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            log: log.into(),
        }
    }
}
