//! Simulation-wide tunables and the Markov chains they drive.

use crate::error::ParamsError;
use crate::randomness::SimRng;

use blockfuzz_env::ConsensusParams;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A Markov transition matrix.
///
/// `weights[to][from]` is the relative weight of moving from state `from` to
/// state `to`, so each column describes the outgoing distribution of one
/// state. Serializes as the bare weight grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<u64>>", into = "Vec<Vec<u64>>")]
pub struct TransitionMatrix {
    weights: Vec<Vec<u64>>,
    column_totals: Vec<u64>,
}

impl TransitionMatrix {
    /// Validates and builds a matrix.
    ///
    /// The grid must be square and every column must have positive total
    /// weight.
    pub fn new(weights: Vec<Vec<u64>>) -> Result<Self, ParamsError> {
        let n = weights.len();
        if n == 0 {
            return Err(ParamsError::EmptyMatrix);
        }

        for (row, entries) in weights.iter().enumerate() {
            if entries.len() != n {
                return Err(ParamsError::NotSquare {
                    row,
                    len: entries.len(),
                    expected: n,
                });
            }
        }

        let column_totals: Vec<u64> = (0..n)
            .map(|from| weights.iter().map(|row| row[from]).sum())
            .collect();

        if let Some(col) = column_totals.iter().position(|total| *total == 0) {
            return Err(ParamsError::ZeroColumn(col));
        }

        Ok(Self {
            weights,
            column_totals,
        })
    }

    /// Number of states.
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Samples the state following `current`.
    pub fn next_state(&self, rng: &mut SimRng, current: usize) -> usize {
        let from = current.min(self.len() - 1);
        let mut x = rng.gen_range(0..self.column_totals[from]);

        for (to, row) in self.weights.iter().enumerate() {
            let weight = row[from];
            if x < weight {
                return to;
            }
            x -= weight;
        }

        // Unreachable while column_totals matches the grid
        from
    }

    /// Weight of moving from `from` to `to`.
    pub fn weight(&self, from: usize, to: usize) -> u64 {
        self.weights[to][from]
    }
}

impl TryFrom<Vec<Vec<u64>>> for TransitionMatrix {
    type Error = ParamsError;

    fn try_from(weights: Vec<Vec<u64>>) -> Result<Self, Self::Error> {
        Self::new(weights)
    }
}

impl From<TransitionMatrix> for Vec<Vec<u64>> {
    fn from(matrix: TransitionMatrix) -> Self {
        matrix.weights
    }
}

/// Samples an initial state from a weight vector.
pub fn member_of_initial_state(rng: &mut SimRng, weights: &[u64]) -> usize {
    let total: u64 = weights.iter().sum();
    if total == 0 {
        return 0;
    }

    let mut x = rng.gen_range(0..total);
    for (state, weight) in weights.iter().enumerate() {
        if x < *weight {
            return state;
        }
        x -= weight;
    }
    0
}

/// Liveness chain: online, flaky, offline.
pub fn default_liveness_matrix() -> TransitionMatrix {
    TransitionMatrix {
        weights: vec![vec![90, 20, 1], vec![10, 50, 5], vec![0, 10, 1000]],
        column_totals: vec![100, 80, 1006],
    }
}

/// Block-size chain: stuffed, normal, empty.
pub fn default_block_size_matrix() -> TransitionMatrix {
    TransitionMatrix {
        weights: vec![vec![85, 5, 0], vec![15, 92, 1], vec![0, 3, 99]],
        column_totals: vec![100, 100, 100],
    }
}

/// Simulation-wide tunables, sampled once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    /// Probability that a piece of evidence refers to a past block
    pub past_evidence_fraction: f64,

    /// Number of accounts generated at genesis
    pub num_keys: usize,

    /// Base probability of fabricating evidence in a block
    pub evidence_fraction: f64,

    /// Relative weight of each liveness state for new validators
    pub initial_liveness_weightings: Vec<u64>,

    pub liveness_transition_matrix: TransitionMatrix,

    pub block_size_transition_matrix: TransitionMatrix,
}

impl Params {
    /// Samples a parameter set from the stream.
    pub fn random(rng: &mut SimRng) -> Self {
        Self {
            past_evidence_fraction: rng.gen::<f64>(),
            num_keys: rng.gen_range(2..2500),
            evidence_fraction: rng.gen::<f64>(),
            initial_liveness_weightings: vec![
                rng.gen_range(1..80),
                rng.gen_range(0..10),
                rng.gen_range(0..10),
            ],
            liveness_transition_matrix: default_liveness_matrix(),
            block_size_transition_matrix: default_block_size_matrix(),
        }
    }

    /// Checks the invariants a loaded parameter file may violate.
    pub fn validate(&self) -> Result<(), ParamsError> {
        check_fraction("past_evidence_fraction", self.past_evidence_fraction)?;
        check_fraction("evidence_fraction", self.evidence_fraction)?;

        if self.num_keys == 0 {
            return Err(ParamsError::NoKeys);
        }

        let states = self.liveness_transition_matrix.len();
        if self.initial_liveness_weightings.len() != states {
            return Err(ParamsError::StateCount {
                got: self.initial_liveness_weightings.len(),
                expected: states,
            });
        }
        if self.initial_liveness_weightings.iter().sum::<u64>() == 0 {
            return Err(ParamsError::ZeroWeightings);
        }

        Ok(())
    }
}

fn check_fraction(name: &'static str, value: f64) -> Result<(), ParamsError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ParamsError::Fraction { name, value })
    }
}

/// Advances the block-size chain and samples the next block's size.
///
/// State 0 ("stuffed") draws from `[0, 4*avg)`, state 1 ("normal") from
/// `[0, 2*avg)`, any other state yields an empty block. The long-run mean
/// stays close to `avg`.
pub fn next_block_size(
    rng: &mut SimRng,
    matrix: &TransitionMatrix,
    state: usize,
    avg: usize,
) -> (usize, usize) {
    let next = matrix.next_state(rng, state);
    let size = match next {
        0 if avg > 0 => rng.gen_range(0..avg.saturating_mul(4)),
        1 if avg > 0 => rng.gen_range(0..avg.saturating_mul(2)),
        _ => 0,
    };
    (next, size)
}

/// Samples consensus parameters for init-chain.
///
/// Evidence age limits are derived from a random unbonding period of one to
/// three weeks.
pub fn random_consensus_params(rng: &mut SimRng, avg_block_time: Duration) -> ConsensusParams {
    let unbonding = Duration::from_secs(rng.gen_range(1..=21) * 24 * 60 * 60);
    let block_secs = avg_block_time.as_secs().max(1);

    ConsensusParams {
        max_block_bytes: rng.gen_range(20_000_000..30_000_000),
        max_gas: None,
        evidence_max_age_blocks: (unbonding.as_secs() / block_secs).max(1),
        evidence_max_age: unbonding,
        app_version: 0,
    }
}
