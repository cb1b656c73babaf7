//! Request/response types exchanged with the application.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Header of a simulated block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Chain identifier
    pub chain_id: String,

    /// Block height (starts at 1)
    pub height: u64,

    /// Simulated wall-clock time of the block
    pub time: SystemTime,

    /// Public key bytes of the proposing validator (`None` once the
    /// validator set is empty)
    pub proposer: Option<Vec<u8>>,

    /// App hash after the previous commit
    pub app_hash: Vec<u8>,
}

impl Header {
    /// Returns the block time as seconds since the Unix epoch.
    pub fn unix_secs(&self) -> u64 {
        self.time
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs()
    }
}

/// A validator as seen in votes and evidence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Validator {
    /// Ed25519 public key bytes
    pub pub_key: Vec<u8>,

    /// Voting power
    pub power: u64,
}

impl Validator {
    /// Returns the uppercase hex form of the public key.
    pub fn key_hex(&self) -> String {
        hex::encode_upper(&self.pub_key)
    }
}

/// Whether a validator signed the previous block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteInfo {
    pub validator: Validator,
    pub signed_last_block: bool,
}

/// Kind of misbehavior evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvidenceKind {
    /// Validator signed two conflicting blocks at the same height
    DuplicateVote,
}

/// Byzantine evidence handed to the application at begin-block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub kind: EvidenceKind,

    /// Offending validator
    pub validator: Validator,

    /// Height the misbehavior happened at
    pub height: u64,

    /// Time of that height
    pub time: SystemTime,

    /// Total voting power of the set at that height
    pub total_voting_power: u64,
}

/// A validator-set change reported by the application.
///
/// `power == 0` removes the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorUpdate {
    pub pub_key: Vec<u8>,
    pub power: u64,
}

impl ValidatorUpdate {
    pub fn new(pub_key: Vec<u8>, power: u64) -> Self {
        Self { pub_key, power }
    }
}

/// Consensus parameters passed at init-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParams {
    /// Maximum block size in bytes
    pub max_block_bytes: u64,

    /// Maximum gas per block (`None` = unlimited)
    pub max_gas: Option<u64>,

    /// Evidence older than this many blocks is ignored
    pub evidence_max_age_blocks: u64,

    /// Evidence older than this duration is ignored
    pub evidence_max_age: Duration,

    /// Application protocol version (must be 0 at init)
    pub app_version: u64,
}

/// Init-chain request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitChainRequest {
    /// Serialized genesis application state
    pub app_state_bytes: Vec<u8>,
    pub chain_id: String,
    pub consensus_params: ConsensusParams,
    pub time: SystemTime,
}

/// Init-chain response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitChainResponse {
    /// Genesis validator set
    pub validators: Vec<ValidatorUpdate>,

    /// App hash after genesis
    pub app_hash: Vec<u8>,
}

/// Begin-block request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeginBlockRequest {
    pub header: Header,

    /// Synthesized attendance of the current validator set
    pub last_commit_votes: Vec<VoteInfo>,

    /// Fabricated double-sign evidence
    pub byzantine_validators: Vec<Evidence>,
}

/// Result of delivering one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverResponse {
    /// Raw result payload
    pub data: Vec<u8>,
    pub gas_wanted: u64,
    pub gas_used: u64,

    /// Human-readable log
    pub log: String,
}

/// End-block request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EndBlockRequest {
    pub height: u64,
}

/// End-block response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndBlockResponse {
    pub validator_updates: Vec<ValidatorUpdate>,
}

/// Commit response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResponse {
    pub app_hash: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_unix_secs() {
        let header = Header {
            chain_id: "test".to_string(),
            height: 1,
            time: UNIX_EPOCH + Duration::from_secs(1704067200),
            proposer: Some(vec![1, 2, 3]),
            app_hash: Vec::new(),
        };

        assert_eq!(header.unix_secs(), 1704067200);
    }

    #[test]
    fn test_validator_key_hex() {
        let validator = Validator {
            pub_key: vec![0xab, 0x01],
            power: 10,
        };

        assert_eq!(validator.key_hex(), "AB01");
    }

    #[test]
    fn test_evidence_serializes_kind_by_name() {
        let evidence = Evidence {
            kind: EvidenceKind::DuplicateVote,
            validator: Validator {
                pub_key: vec![1],
                power: 5,
            },
            height: 3,
            time: UNIX_EPOCH,
            total_voting_power: 20,
        };

        let json = serde_json::to_value(&evidence).unwrap();
        assert_eq!(json["kind"], "DuplicateVote");
        assert_eq!(json["total_voting_power"], 20);
    }
}
