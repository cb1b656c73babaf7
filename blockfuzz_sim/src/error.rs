//! Error types for the simulation engine.

use blockfuzz_env::AppError;
use thiserror::Error;

/// Problems detected before the block loop starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed seed file {path}: {reason}")]
    SeedFile { path: String, reason: String },

    #[error("malformed params file {path}: {reason}")]
    ParamsFile { path: String, reason: String },

    #[error("invalid params: {0}")]
    Params(#[from] ParamsError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid genesis: {0}")]
    Genesis(String),

    #[error("no actions registered")]
    NoActions,

    #[error("unknown scenario: {0}")]
    UnknownScenario(String),
}

/// Invalid simulation parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamsError {
    #[error("transition matrix is empty")]
    EmptyMatrix,

    #[error("transition matrix row {row} has {len} entries, expected {expected}")]
    NotSquare {
        row: usize,
        len: usize,
        expected: usize,
    },

    #[error("transition matrix column {0} sums to zero")]
    ZeroColumn(usize),

    #[error("initial liveness weightings have {got} states, matrix has {expected}")]
    StateCount { got: usize, expected: usize },

    #[error("initial liveness weightings sum to zero")]
    ZeroWeightings,

    #[error("{name} = {value} is outside [0, 1]")]
    Fraction { name: &'static str, value: f64 },

    #[error("num_keys must be at least 1")]
    NoKeys,
}

/// Failure folding validator-set updates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidatorError {
    #[error("tried to remove nonexistent validator {0}")]
    NonexistentValidator(String),
}

/// Hard failure of an action; aborts the run.
///
/// Recoverable outcomes are reported as no-op [`crate::OperationMsg`]s instead.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("application error: {0}")]
    Application(#[from] AppError),

    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{0}")]
    Failed(String),
}

/// Terminal failure of a simulation run.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("application error at height {height}: {source}")]
    Application {
        height: u64,
        #[source]
        source: AppError,
    },

    #[error("operation {index} ({route}/{name}) failed at height {height}: {reason}")]
    ActionFailed {
        height: u64,
        index: usize,
        route: String,
        name: String,
        reason: String,
    },

    #[error("queued operation {name} failed at height {height}: {reason}")]
    QueuedOperationFailed {
        height: u64,
        name: String,
        reason: String,
    },

    #[error("validator set error at height {height}: {source}")]
    Validators {
        height: u64,
        #[source]
        source: ValidatorError,
    },

    #[error("panic at height {height} in {context}: {message}")]
    Panicked {
        height: u64,
        context: String,
        message: String,
    },

    #[error("stats table write failed at height {height}: {reason}")]
    StatsTable { height: u64, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("run {run} diverged from run 0: {detail}")]
    NonDeterministic { run: usize, detail: String },
}

impl SimError {
    /// Height the failure happened at, if it is tied to a block.
    pub fn height(&self) -> Option<u64> {
        match self {
            SimError::Application { height, .. }
            | SimError::ActionFailed { height, .. }
            | SimError::QueuedOperationFailed { height, .. }
            | SimError::Validators { height, .. }
            | SimError::Panicked { height, .. }
            | SimError::StatsTable { height, .. } => Some(*height),
            _ => None,
        }
    }
}
