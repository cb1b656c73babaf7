//! blockfuzz Application Abstraction Layer
//!
//! This crate defines the narrow contract between the block-simulation
//! engine and the state machine it fuzzes.
//!
//! # Core Concept: The Opaque Application
//!
//! The engine never looks inside the system under test. It only drives the
//! ABCI-style lifecycle:
//! - `init_chain` once, with the generated genesis
//! - `begin_block` → `deliver`* → `end_block` for every simulated block
//! - `commit` when persistence semantics are under test
//!
//! Everything the application reports back (validator updates, app hashes,
//! delivery results) is plain data defined here, so any state machine can be
//! plugged into the driver without depending on the engine itself.
//!
//! # Example
//!
//! ```ignore
//! use blockfuzz_env::{Application, BeginBlockRequest, EndBlockRequest};
//!
//! fn run_block<A: Application>(app: &mut A, req: BeginBlockRequest, txs: &[Vec<u8>]) {
//!     let height = req.header.height;
//!     app.begin_block(req).unwrap();
//!     for tx in txs {
//!         let _ = app.deliver(tx);
//!     }
//!     let updates = app.end_block(EndBlockRequest { height }).unwrap();
//!     app.commit();
//! }
//! ```

mod application;
mod error;
mod types;

pub use application::Application;
pub use error::AppError;
pub use types::{
    BeginBlockRequest, CommitResponse, ConsensusParams, DeliverResponse, EndBlockRequest,
    EndBlockResponse, Evidence, EvidenceKind, Header, InitChainRequest, InitChainResponse,
    Validator, ValidatorUpdate, VoteInfo,
};
