//! Ledger error types.

use blockfuzz_env::AppError;
use thiserror::Error;

/// Errors raised while applying ledger transactions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("malformed transaction: {0}")]
    Malformed(String),

    #[error("account {account} has {available}, needs {required}")]
    InsufficientFunds {
        account: String,
        available: u64,
        required: u64,
    },

    #[error("unknown account {0}")]
    UnknownAccount(String),

    #[error("unknown validator {0}")]
    UnknownValidator(String),

    #[error("delegation of {delegator} to {validator} is {available}, needs {required}")]
    InsufficientDelegation {
        delegator: String,
        validator: String,
        available: u64,
        required: u64,
    },

    #[error("amount must be positive")]
    ZeroAmount,

    #[error("invalid genesis: {0}")]
    Genesis(String),
}

impl LedgerError {
    /// Stable numeric code reported in rejections.
    pub fn code(&self) -> u32 {
        match self {
            LedgerError::Malformed(_) => 1,
            LedgerError::InsufficientFunds { .. } => 2,
            LedgerError::UnknownAccount(_) => 3,
            LedgerError::UnknownValidator(_) => 4,
            LedgerError::InsufficientDelegation { .. } => 5,
            LedgerError::ZeroAmount => 6,
            LedgerError::Genesis(_) => 7,
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Malformed(msg) => AppError::Decode(msg),
            LedgerError::Genesis(msg) => AppError::Genesis(msg),
            other => AppError::rejected(other.code(), other.to_string()),
        }
    }
}
