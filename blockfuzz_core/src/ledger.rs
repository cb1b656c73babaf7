//! The ledger state machine.

use crate::error::LedgerError;
use crate::tx::{LedgerGenesis, LedgerTx, TxReceipt};

use blockfuzz_env::{
    AppError, Application, BeginBlockRequest, CommitResponse, DeliverResponse, EndBlockRequest,
    EndBlockResponse, InitChainRequest, InitChainResponse, ValidatorUpdate,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Flat gas charged for every transaction.
const BASE_GAS: u64 = 1_000;

/// Gas charged per encoded byte.
const GAS_PER_BYTE: u64 = 10;

/// Extra gas a client requests on top of the expected usage.
const GAS_HEADROOM: u64 = 200;

/// Double-signing burns 1/20 (5%) of every delegation to the offender.
const SLASH_DIVISOR: u64 = 20;

/// Length of an Ed25519 public key.
const PUB_KEY_LEN: usize = 32;

/// Everything that contributes to the app hash.
#[derive(Debug, Clone, Default, Serialize)]
struct LedgerState {
    chain_id: String,
    height: u64,
    sequence: u64,
    balances: BTreeMap<String, u64>,
    /// validator key (hex) -> delegator -> bonded amount
    delegations: BTreeMap<String, BTreeMap<String, u64>>,
    /// validator key (hex) -> blocks not signed
    missed_blocks: BTreeMap<String, u64>,
    total_burned: u64,
    total_slashed: u64,
}

/// In-memory ledger implementing [`Application`].
///
/// Validator power is the sum of delegations bonded to it. Any change to a
/// validator's power during a block is reported at end-block.
#[derive(Debug, Default)]
pub struct Ledger {
    state: LedgerState,

    /// Power changes since the last end-block, keyed by validator hex
    pending_updates: BTreeMap<String, u64>,

    /// Power last reported to consensus, keyed by validator hex
    reported: BTreeMap<String, u64>,

    last_commit_hash: Vec<u8>,
}

impl Ledger {
    /// Creates an empty ledger; state arrives through `init_chain`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the balance of an account (0 if unknown).
    pub fn balance(&self, address: &str) -> u64 {
        self.state.balances.get(address).copied().unwrap_or(0)
    }

    /// Returns the voting power of a validator (0 if unbonded).
    pub fn validator_power(&self, validator: &str) -> u64 {
        self.state
            .delegations
            .get(validator)
            .map(|d| d.values().sum())
            .unwrap_or(0)
    }

    /// Returns all bonded validators with their power, sorted by key.
    pub fn validators(&self) -> Vec<(String, u64)> {
        self.state
            .delegations
            .keys()
            .map(|v| (v.clone(), self.validator_power(v)))
            .filter(|(_, power)| *power > 0)
            .collect()
    }

    /// Returns every (validator, delegator, amount) bond, sorted.
    pub fn delegations(&self) -> Vec<(String, String, u64)> {
        self.state
            .delegations
            .iter()
            .flat_map(|(validator, bonds)| {
                bonds
                    .iter()
                    .map(move |(delegator, amount)| (validator.clone(), delegator.clone(), *amount))
            })
            .collect()
    }

    /// Total liquid plus bonded funds.
    pub fn total_supply(&self) -> u64 {
        let liquid: u64 = self.state.balances.values().sum();
        let bonded: u64 = self
            .state
            .delegations
            .values()
            .flat_map(|bonds| bonds.values())
            .sum();
        liquid + bonded
    }

    /// Number of blocks a validator failed to sign.
    pub fn missed_blocks(&self, validator: &str) -> u64 {
        self.state.missed_blocks.get(validator).copied().unwrap_or(0)
    }

    /// Number of transactions applied so far.
    pub fn sequence(&self) -> u64 {
        self.state.sequence
    }

    /// Current block height.
    pub fn height(&self) -> u64 {
        self.state.height
    }

    /// Computes the hash of the current (possibly uncommitted) state.
    pub fn app_hash(&self) -> Vec<u8> {
        let encoded = serde_json::to_vec(&self.state).unwrap_or_default();
        Sha256::digest(&encoded).to_vec()
    }

    fn debit(&mut self, account: &str, amount: u64) -> Result<u64, LedgerError> {
        let balance = self
            .state
            .balances
            .get_mut(account)
            .ok_or_else(|| LedgerError::UnknownAccount(account.to_string()))?;

        if *balance < amount {
            return Err(LedgerError::InsufficientFunds {
                account: account.to_string(),
                available: *balance,
                required: amount,
            });
        }

        *balance -= amount;
        Ok(*balance)
    }

    fn credit(&mut self, account: &str, amount: u64) {
        *self.state.balances.entry(account.to_string()).or_insert(0) += amount;
    }

    fn mark_power_change(&mut self, validator: &str) {
        let power = self.validator_power(validator);
        self.pending_updates.insert(validator.to_string(), power);
    }

    fn apply(&mut self, tx: LedgerTx) -> Result<TxReceipt, LedgerError> {
        let kind = tx.kind().to_string();

        let balance_after = match tx {
            LedgerTx::Transfer { from, to, amount } => {
                if amount == 0 {
                    return Err(LedgerError::ZeroAmount);
                }
                self.debit(&from, amount)?;
                self.credit(&to, amount);
                self.balance(&from)
            }
            LedgerTx::Delegate {
                delegator,
                validator,
                amount,
            } => {
                if amount == 0 {
                    return Err(LedgerError::ZeroAmount);
                }
                validate_key(&validator)?;
                let remaining = self.debit(&delegator, amount)?;
                *self
                    .state
                    .delegations
                    .entry(validator.clone())
                    .or_default()
                    .entry(delegator)
                    .or_insert(0) += amount;
                self.mark_power_change(&validator);
                remaining
            }
            LedgerTx::Undelegate {
                delegator,
                validator,
                amount,
            } => {
                if amount == 0 {
                    return Err(LedgerError::ZeroAmount);
                }
                {
                    let bonds = self
                        .state
                        .delegations
                        .get_mut(&validator)
                        .ok_or_else(|| LedgerError::UnknownValidator(validator.clone()))?;
                    let available = bonds.get(&delegator).copied().unwrap_or(0);
                    if available < amount {
                        return Err(LedgerError::InsufficientDelegation {
                            delegator: delegator.clone(),
                            validator: validator.clone(),
                            available,
                            required: amount,
                        });
                    }
                    if available == amount {
                        bonds.remove(&delegator);
                    } else {
                        bonds.insert(delegator.clone(), available - amount);
                    }
                    if bonds.is_empty() {
                        self.state.delegations.remove(&validator);
                    }
                }
                self.credit(&delegator, amount);
                self.mark_power_change(&validator);
                self.balance(&delegator)
            }
            LedgerTx::Burn { account, amount } => {
                if amount == 0 {
                    return Err(LedgerError::ZeroAmount);
                }
                let remaining = self.debit(&account, amount)?;
                self.state.total_burned += amount;
                remaining
            }
        };

        self.state.sequence += 1;
        Ok(TxReceipt {
            kind,
            sequence: self.state.sequence,
            balance_after,
        })
    }

    fn slash(&mut self, validator: &str) {
        let Some(bonds) = self.state.delegations.get_mut(validator) else {
            debug!("Ignoring evidence for unbonded validator {}", validator);
            return;
        };

        let mut slashed = 0;
        for amount in bonds.values_mut() {
            let cut = (*amount / SLASH_DIVISOR).max(1).min(*amount);
            *amount -= cut;
            slashed += cut;
        }
        bonds.retain(|_, amount| *amount > 0);
        if bonds.is_empty() {
            self.state.delegations.remove(validator);
        }

        self.state.total_slashed += slashed;
        self.mark_power_change(validator);
        debug!("Slashed validator {} by {}", validator, slashed);
    }
}

fn validate_key(validator: &str) -> Result<Vec<u8>, LedgerError> {
    let bytes = hex::decode(validator)
        .map_err(|e| LedgerError::Malformed(format!("validator key {}: {}", validator, e)))?;
    if bytes.len() != PUB_KEY_LEN {
        return Err(LedgerError::Malformed(format!(
            "validator key {} has {} bytes",
            validator,
            bytes.len()
        )));
    }
    Ok(bytes)
}

impl Application for Ledger {
    fn init_chain(&mut self, req: InitChainRequest) -> Result<InitChainResponse, AppError> {
        if req.consensus_params.app_version != 0 {
            return Err(AppError::Genesis(format!(
                "app version must be 0 at genesis, got {}",
                req.consensus_params.app_version
            )));
        }

        let genesis = LedgerGenesis::from_bytes(&req.app_state_bytes)?;
        let mut state = LedgerState {
            chain_id: req.chain_id,
            ..Default::default()
        };

        for account in genesis.accounts {
            if state
                .balances
                .insert(account.address.clone(), account.balance)
                .is_some()
            {
                return Err(LedgerError::Genesis(format!(
                    "duplicate account {}",
                    account.address
                ))
                .into());
            }
        }

        for validator in genesis.validators {
            validate_key(&validator.pub_key)?;
            if validator.power == 0 {
                return Err(LedgerError::Genesis(format!(
                    "validator {} has zero power",
                    validator.pub_key
                ))
                .into());
            }
            *state
                .delegations
                .entry(validator.pub_key)
                .or_default()
                .entry(validator.delegator)
                .or_insert(0) += validator.power;
        }

        self.state = state;
        self.pending_updates.clear();
        self.reported = self.validators().into_iter().collect();

        let validators = self
            .validators()
            .into_iter()
            .filter_map(|(key, power)| {
                hex::decode(&key)
                    .ok()
                    .map(|bytes| ValidatorUpdate::new(bytes, power))
            })
            .collect::<Vec<_>>();

        info!(
            "Ledger genesis: {} accounts, {} validators, supply {}",
            self.state.balances.len(),
            validators.len(),
            self.total_supply()
        );

        Ok(InitChainResponse {
            validators,
            app_hash: self.app_hash(),
        })
    }

    fn begin_block(&mut self, req: BeginBlockRequest) -> Result<(), AppError> {
        self.state.height = req.header.height;

        for vote in &req.last_commit_votes {
            if !vote.signed_last_block {
                *self
                    .state
                    .missed_blocks
                    .entry(vote.validator.key_hex())
                    .or_insert(0) += 1;
            }
        }

        for evidence in &req.byzantine_validators {
            self.slash(&evidence.validator.key_hex());
        }

        Ok(())
    }

    fn deliver(&mut self, tx: &[u8]) -> Result<DeliverResponse, AppError> {
        let decoded = LedgerTx::decode(tx)?;
        let receipt = self.apply(decoded)?;

        let gas_used = BASE_GAS + GAS_PER_BYTE * tx.len() as u64;
        let data = serde_json::to_vec(&receipt).map_err(|e| AppError::Internal(e.to_string()))?;

        Ok(DeliverResponse {
            data,
            gas_wanted: gas_used + GAS_HEADROOM,
            gas_used,
            log: format!("{} #{}", receipt.kind, receipt.sequence),
        })
    }

    fn end_block(&mut self, req: EndBlockRequest) -> Result<EndBlockResponse, AppError> {
        let mut validator_updates = Vec::new();

        for (key, power) in std::mem::take(&mut self.pending_updates) {
            // Only report actual changes to keys consensus knows about
            let known = self.reported.get(&key).copied();
            if known == Some(power) || (known.is_none() && power == 0) {
                continue;
            }
            let Ok(bytes) = hex::decode(&key) else {
                continue;
            };

            if power == 0 {
                self.reported.remove(&key);
            } else {
                self.reported.insert(key, power);
            }
            validator_updates.push(ValidatorUpdate::new(bytes, power));
        }

        if !validator_updates.is_empty() {
            debug!(
                "Block {}: {} validator updates",
                req.height,
                validator_updates.len()
            );
        }

        Ok(EndBlockResponse { validator_updates })
    }

    fn commit(&mut self) -> CommitResponse {
        self.last_commit_hash = self.app_hash();
        CommitResponse {
            app_hash: self.last_commit_hash.clone(),
        }
    }

    fn last_commit_hash(&self) -> Vec<u8> {
        self.last_commit_hash.clone()
    }
}
