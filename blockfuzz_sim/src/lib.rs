//! blockfuzz Block-Simulation Engine
//!
//! This crate fuzzes an ABCI-style application by driving it through long
//! sequences of randomized blocks, all reproducible from a single seed.
//!
//! # Core Principle: One Seed, Separated Streams
//!
//! Every random decision is drawn from a named stream derived from the root
//! seed:
//! - **Actions**: which action fills each slot of a block, and its inputs
//! - **Validators**: liveness, votes, double-sign evidence, proposers
//! - **Timing**: block sizes and the time between blocks
//!
//! Adding, removing or reordering one consumer of randomness leaves every
//! other stream untouched, so a failing seed keeps reproducing while the
//! code around it changes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         BlockDriver                          │
//! │                                                              │
//! │  RandomnessManager ──► block {h} ──► operation {i} ...       │
//! │        │                   │              │                  │
//! │  ┌─────▼──────────┐  ┌─────▼──────┐  ┌────▼───────────┐      │
//! │  │ ValidatorSet   │  │ Operation  │  │ ActionRegistry │      │
//! │  │ Simulator      │  │ Queue      │  │ (weighted)     │      │
//! │  └─────┬──────────┘  └─────┬──────┘  └────┬───────────┘      │
//! │        │ votes, evidence   │ due ops      │ sampled actions  │
//! │  ┌─────▼───────────────────▼──────────────▼───────────┐      │
//! │  │        Application (system under test)             │      │
//! │  └─────┬───────────────────────────────────────────────┘     │
//! │        │ validator updates (effective two blocks later)      │
//! │        ▼                                                     │
//! │  EventStats / StatsTable / OperationLog                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use blockfuzz_core::Ledger;
//! use blockfuzz_sim::{ledger_actions, simulate_from_seed, LedgerGenesisProvider, SimConfig};
//!
//! let config = SimConfig::new(42).with_blocks(200);
//! let (report, ledger) =
//!     simulate_from_seed(config, Ledger::new(), ledger_actions(), &LedgerGenesisProvider)?;
//! ```

pub mod action;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod genesis;
pub mod keys;
pub mod ledger;
pub mod log;
pub mod params;
pub mod queue;
pub mod randomness;
pub mod scenarios;
pub mod selector;
pub mod stats;
pub mod validators;

pub use action::{
    actions_from_weighted_operations, deliver_msg, Action, ActionsWithMetadata, Frequency,
    FutureOperation, Operation, OperationMsg, OperationOutput, WeightTable, WeightedOperation,
};
pub use config::SimConfig;
pub use context::SimCtx;
pub use driver::{
    check_determinism, simulate_from_seed, BlockDriver, DriverState, SimulationReport, StopHandle,
    StopReason,
};
pub use error::{ActionError, ConfigError, ParamsError, SimError, ValidatorError};
pub use genesis::{GenesisProvider, GenesisState};
pub use keys::Account;
pub use ledger::{ledger_actions, LedgerGenesisProvider};
pub use log::{EntryKind, OperationEntry, OperationLog};
pub use params::{Params, TransitionMatrix};
pub use queue::{OperationQueue, Schedule};
pub use randomness::{RandomnessManager, SimRng};
pub use scenarios::ScenarioId;
pub use selector::ActionRegistry;
pub use stats::{EventStats, StatsRow, StatsTable};
pub use validators::{MockValidator, ValidatorSetSimulator};
