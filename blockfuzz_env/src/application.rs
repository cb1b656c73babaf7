//! Core lifecycle trait for applications under simulation.

use crate::error::AppError;
use crate::types::{
    BeginBlockRequest, CommitResponse, DeliverResponse, EndBlockRequest, EndBlockResponse,
    InitChainRequest, InitChainResponse,
};

/// The central interface between the simulator and the system under test.
///
/// This trait abstracts the "state machine" so that the block driver can
/// fuzz any transaction-processing application through the same lifecycle.
///
/// # Call Order
///
/// The driver guarantees at most one in-flight call at any time:
///
/// ```text
/// init_chain ─► begin_block ─► deliver* ─► end_block ─► [commit] ─► begin_block ...
/// ```
///
/// # Determinism
///
/// Implementations must be deterministic given the same sequence of calls:
/// the simulator compares `last_commit_hash` across repeated runs of the
/// same seed to detect non-determinism in the application.
pub trait Application {
    /// Initializes the chain from serialized genesis state.
    ///
    /// Returns the initial validator set the simulator starts from.
    fn init_chain(&mut self, req: InitChainRequest) -> Result<InitChainResponse, AppError>;

    /// Opens a new block.
    ///
    /// `req` carries the header, the synthesized last-commit votes and any
    /// fabricated double-sign evidence.
    fn begin_block(&mut self, req: BeginBlockRequest) -> Result<(), AppError>;

    /// Delivers one encoded transaction.
    ///
    /// # Returns
    /// * `Ok(DeliverResponse)` - The transaction was applied
    /// * `Err(AppError)` - The transaction was rejected
    fn deliver(&mut self, tx: &[u8]) -> Result<DeliverResponse, AppError>;

    /// Closes the current block and reports validator-set changes.
    ///
    /// Updates returned for block N take effect in the simulator's validator
    /// set for block N+2 (one block of consensus delay).
    fn end_block(&mut self, req: EndBlockRequest) -> Result<EndBlockResponse, AppError>;

    /// Persists the state of the last closed block.
    fn commit(&mut self) -> CommitResponse;

    /// Returns the app hash of the last commit (empty before the first).
    fn last_commit_hash(&self) -> Vec<u8>;
}
