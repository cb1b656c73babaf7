//! Simulated validator set: liveness, votes, evidence and delayed updates.
//!
//! Each validator carries a liveness state evolved once per block through
//! the liveness Markov chain:
//! - state 0 (online) always signs
//! - state 1 (flaky) signs half the time
//! - state 2 and above (offline) never sign
//!
//! Two snapshots model a one-block consensus delay. Updates returned at the
//! end of block N land in `next`, which becomes `current` at the end of
//! block N+1. The proposer of block N+1 is drawn from `current` right after
//! the roll at the end of block N, so it never sees block N's updates;
//! block N+2's proposer does.

use crate::error::ValidatorError;
use crate::params::{member_of_initial_state, Params, TransitionMatrix};
use crate::randomness::SimRng;
use crate::stats::EventStats;

use blockfuzz_env::{
    BeginBlockRequest, Evidence, EvidenceKind, Header, Validator, ValidatorUpdate, VoteInfo,
};
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Liveness state that always signs.
pub const ONLINE: usize = 0;

/// Liveness state that signs with probability 1/2.
pub const FLAKY: usize = 1;

/// A validator as tracked by the simulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MockValidator {
    pub pub_key: Vec<u8>,
    pub power: u64,
    pub liveness: usize,
}

impl MockValidator {
    pub fn to_validator(&self) -> Validator {
        Validator {
            pub_key: self.pub_key.clone(),
            power: self.power,
        }
    }

    pub fn key_hex(&self) -> String {
        hex::encode_upper(&self.pub_key)
    }
}

/// Validators keyed by public key; iteration is always sorted by key.
pub type ValidatorSet = BTreeMap<Vec<u8>, MockValidator>;

/// What happened at one past height, kept for past evidence.
#[derive(Debug, Clone)]
struct BlockRecord {
    height: u64,
    time: SystemTime,
    votes: Vec<VoteInfo>,
}

/// The validator model of one simulation run.
#[derive(Debug)]
pub struct ValidatorSetSimulator {
    /// Set signing the block being simulated
    current: ValidatorSet,

    /// Set that takes over after the next roll
    next: ValidatorSet,

    /// Begin-block history, oldest first, bounded by the evidence age
    history: VecDeque<BlockRecord>,

    /// Evidence age limits from the consensus params
    max_age_blocks: u64,
    max_age: Duration,

    liveness_matrix: TransitionMatrix,
    initial_weightings: Vec<u64>,
    evidence_fraction: f64,
    past_evidence_fraction: f64,
}

impl ValidatorSetSimulator {
    /// Builds both snapshots from the genesis validators.
    ///
    /// Zero-power entries are ignored.
    pub fn new(params: &Params, rng: &mut SimRng, genesis: &[ValidatorUpdate]) -> Self {
        let mut current = ValidatorSet::new();
        for update in genesis.iter().filter(|u| u.power > 0) {
            current.insert(
                update.pub_key.clone(),
                MockValidator {
                    pub_key: update.pub_key.clone(),
                    power: update.power,
                    liveness: member_of_initial_state(rng, &params.initial_liveness_weightings),
                },
            );
        }

        Self {
            next: current.clone(),
            current,
            history: VecDeque::new(),
            max_age_blocks: u64::MAX,
            max_age: Duration::MAX,
            liveness_matrix: params.liveness_transition_matrix.clone(),
            initial_weightings: params.initial_liveness_weightings.clone(),
            evidence_fraction: params.evidence_fraction,
            past_evidence_fraction: params.past_evidence_fraction,
        }
    }

    /// Forgets heights once they are older than either evidence age limit.
    pub fn with_evidence_max_age(mut self, blocks: u64, age: Duration) -> Self {
        self.max_age_blocks = blocks.max(1);
        self.max_age = age;
        self
    }

    pub fn current(&self) -> &ValidatorSet {
        &self.current
    }

    pub fn next(&self) -> &ValidatorSet {
        &self.next
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Number of heights remembered for past evidence.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Synthesizes the begin-block request for `header`.
    ///
    /// Evolves every current validator's liveness, derives its vote, then
    /// fabricates evidence. The block is then remembered for future past
    /// evidence.
    pub fn begin_block(
        &mut self,
        rng: &mut SimRng,
        header: &Header,
        stats: &mut EventStats,
    ) -> BeginBlockRequest {
        let mut votes = Vec::with_capacity(self.current.len());

        for validator in self.current.values_mut() {
            validator.liveness = self.liveness_matrix.next_state(rng, validator.liveness);

            let signed = match validator.liveness {
                ONLINE => true,
                FLAKY => rng.gen::<f64>() >= 0.5,
                _ => false,
            };
            stats.tally("begin_block", "signing", if signed { "signed" } else { "missed" });

            votes.push(VoteInfo {
                validator: validator.to_validator(),
                signed_last_block: signed,
            });
        }

        let evidence = self.random_evidence(rng, header, &votes, stats);

        self.history.push_back(BlockRecord {
            height: header.height,
            time: header.time,
            votes: votes.clone(),
        });
        self.prune_history(header);

        BeginBlockRequest {
            header: header.clone(),
            last_commit_votes: votes,
            byzantine_validators: evidence,
        }
    }

    fn prune_history(&mut self, header: &Header) {
        while let Some(oldest) = self.history.front() {
            let too_many = header.height.saturating_sub(oldest.height) >= self.max_age_blocks;
            let too_old = header
                .time
                .duration_since(oldest.time)
                .map(|elapsed| elapsed > self.max_age)
                .unwrap_or(false);
            if !(too_many || too_old) {
                break;
            }
            self.history.pop_front();
        }
    }

    /// Fabricates double-sign evidence with geometrically decaying odds.
    ///
    /// The n-th entry is added with probability `evidence_fraction / n`. No
    /// validator is punished twice in a block, and generation stops once
    /// fewer than `n` validators remain unpunished. Nothing is generated
    /// before the first block is in the history.
    fn random_evidence(
        &self,
        rng: &mut SimRng,
        header: &Header,
        votes: &[VoteInfo],
        stats: &mut EventStats,
    ) -> Vec<Evidence> {
        let mut evidence = Vec::new();
        if self.history.is_empty() {
            return evidence;
        }

        let mut punished: BTreeSet<Vec<u8>> = BTreeSet::new();
        let mut n = 1usize;

        while rng.gen::<f64>() < self.evidence_fraction / n as f64 {
            if self.current.len().saturating_sub(punished.len()) < n {
                break;
            }

            let (height, time, vals) =
                if header.height > 1 && rng.gen::<f64>() < self.past_evidence_fraction {
                    let record = &self.history[rng.gen_range(0..self.history.len())];
                    (record.height, record.time, record.votes.as_slice())
                } else {
                    (header.height, header.time, votes)
                };

            let candidates: Vec<&VoteInfo> = vals
                .iter()
                .filter(|v| !punished.contains(&v.validator.pub_key))
                .collect();
            if candidates.is_empty() {
                break;
            }

            let offender = candidates[rng.gen_range(0..candidates.len())].validator.clone();
            let total_voting_power = vals.iter().map(|v| v.validator.power).sum();

            punished.insert(offender.pub_key.clone());
            evidence.push(Evidence {
                kind: EvidenceKind::DuplicateVote,
                validator: offender,
                height,
                time,
                total_voting_power,
            });
            stats.tally("begin_block", "evidence", "ok");

            n += 1;
        }

        evidence
    }

    /// Rolls the snapshots and folds in the application's updates.
    ///
    /// `next` becomes `current` (keeping the liveness evolved in the old
    /// current set), and `updates` applied to it becomes the new `next`.
    /// On error neither snapshot changes.
    pub fn fold_updates(
        &mut self,
        rng: &mut SimRng,
        updates: &[ValidatorUpdate],
        stats: &mut EventStats,
    ) -> Result<(), ValidatorError> {
        let mut rolled = self.next.clone();
        for (key, validator) in rolled.iter_mut() {
            if let Some(previous) = self.current.get(key) {
                validator.liveness = previous.liveness;
            }
        }

        let (updated, events) = self.apply_updates(rng, rolled.clone(), updates)?;

        for event in events {
            stats.tally("end_block", "validator_updates", event);
        }
        debug!(
            "Validator roll: current={} next={} updates={}",
            rolled.len(),
            updated.len(),
            updates.len()
        );

        self.current = rolled;
        self.next = updated;
        Ok(())
    }

    fn apply_updates(
        &self,
        rng: &mut SimRng,
        mut set: ValidatorSet,
        updates: &[ValidatorUpdate],
    ) -> Result<(ValidatorSet, Vec<&'static str>), ValidatorError> {
        let mut events = Vec::with_capacity(updates.len());

        for update in updates {
            if update.power == 0 {
                if set.remove(&update.pub_key).is_none() {
                    return Err(ValidatorError::NonexistentValidator(hex::encode_upper(
                        &update.pub_key,
                    )));
                }
                events.push("kicked");
            } else if let Some(existing) = set.get_mut(&update.pub_key) {
                existing.power = update.power;
                events.push("updated");
            } else {
                set.insert(
                    update.pub_key.clone(),
                    MockValidator {
                        pub_key: update.pub_key.clone(),
                        power: update.power,
                        liveness: member_of_initial_state(rng, &self.initial_weightings),
                    },
                );
                events.push("added");
            }
        }

        Ok((set, events))
    }

    /// Picks a proposer uniformly among the current keys.
    pub fn random_proposer(&self, rng: &mut SimRng) -> Option<Vec<u8>> {
        if self.current.is_empty() {
            return None;
        }
        let index = rng.gen_range(0..self.current.len());
        self.current.keys().nth(index).cloned()
    }
}
