//! Transaction and genesis encodings.
//!
//! Both are plain JSON; the engine treats the bytes as opaque.

use crate::error::LedgerError;
use serde::{Deserialize, Serialize};

/// A ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerTx {
    /// Move funds between accounts (creates the recipient if needed)
    Transfer { from: String, to: String, amount: u64 },

    /// Bond funds to a validator, creating the validator if it is new
    Delegate {
        delegator: String,
        /// Uppercase hex public key of the validator
        validator: String,
        amount: u64,
    },

    /// Unbond funds from a validator back to the delegator's balance
    Undelegate {
        delegator: String,
        validator: String,
        amount: u64,
    },

    /// Destroy funds
    Burn { account: String, amount: u64 },
}

impl LedgerTx {
    /// Encodes the transaction to bytes.
    pub fn encode(&self) -> Vec<u8> {
        // Serializing a plain enum of strings and integers cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Decodes a transaction from bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, LedgerError> {
        serde_json::from_slice(bytes).map_err(|e| LedgerError::Malformed(e.to_string()))
    }

    /// Short name of the transaction kind.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerTx::Transfer { .. } => "transfer",
            LedgerTx::Delegate { .. } => "delegate",
            LedgerTx::Undelegate { .. } => "undelegate",
            LedgerTx::Burn { .. } => "burn",
        }
    }
}

/// Result payload returned in `DeliverResponse::data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Transaction kind
    pub kind: String,

    /// Sequence number of the transaction within the chain
    pub sequence: u64,

    /// Balance of the signing account after execution
    pub balance_after: u64,
}

/// A funded account at genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub address: String,
    pub balance: u64,
}

/// A bonded validator at genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisValidator {
    /// Uppercase hex public key
    pub pub_key: String,

    /// Account that self-delegated the initial stake
    pub delegator: String,

    pub power: u64,
}

/// Serialized genesis application state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerGenesis {
    pub accounts: Vec<GenesisAccount>,
    pub validators: Vec<GenesisValidator>,
}

impl LedgerGenesis {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LedgerError> {
        serde_json::from_slice(bytes).map_err(|e| LedgerError::Genesis(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_tagged_encoding() {
        let tx = LedgerTx::Burn {
            account: "AA".to_string(),
            amount: 3,
        };

        let value: serde_json::Value = serde_json::from_slice(&tx.encode()).unwrap();
        assert_eq!(value["type"], "burn");
        assert_eq!(tx.kind(), "burn");
    }

    #[test]
    fn test_decode_garbage_is_malformed() {
        let err = LedgerTx::decode(b"not json").unwrap_err();
        assert!(matches!(err, LedgerError::Malformed(_)));
    }
}
