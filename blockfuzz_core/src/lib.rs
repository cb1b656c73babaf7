//! blockfuzz Core - Reference Ledger Application
//!
//! A deliberately small account/staking state machine that implements
//! [`blockfuzz_env::Application`]. It exists so the simulation engine has a
//! concrete system under test:
//! 1. **Bank**: balances, transfers and burns
//! 2. **Staking**: delegations that define validator voting power
//! 3. **Slashing**: double-sign evidence shrinks the offender's stake
//!
//! All state lives in ordered maps and the app hash is a SHA-256 digest of
//! the canonical JSON encoding, so two runs fed the same calls always agree.

pub mod error;
pub mod ledger;
pub mod tx;

pub use error::LedgerError;
pub use ledger::Ledger;
pub use tx::{GenesisAccount, GenesisValidator, LedgerGenesis, LedgerTx, TxReceipt};
