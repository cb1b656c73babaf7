//! Weighted action selection.

use crate::action::{ActionsWithMetadata, WeightTable};
use crate::error::ConfigError;
use crate::randomness::SimRng;

use rand::Rng;
use tracing::warn;

/// Fixed, ordered list of actions with resolved weights.
///
/// Selection draws `x` uniformly from `[0, total)` and walks the list,
/// returning the first action with `x < weight` and otherwise subtracting
/// that action's weight. Each action therefore owns a half-open slice of
/// the range of exactly its weight.
pub struct ActionRegistry<A> {
    actions: Vec<ActionsWithMetadata<A>>,
    weights: Vec<u64>,
    total: u64,
}

impl<A> ActionRegistry<A> {
    /// Resolves every action's weight through `table`.
    pub fn new(
        actions: Vec<ActionsWithMetadata<A>>,
        table: WeightTable,
    ) -> Result<Self, ConfigError> {
        if actions.is_empty() {
            return Err(ConfigError::NoActions);
        }

        let weights: Vec<u64> = actions.iter().map(|a| a.weight(&table) as u64).collect();
        let total = weights.iter().sum();
        if total == 0 {
            return Err(ConfigError::Invalid("total action weight is zero".to_string()));
        }

        Ok(Self {
            actions,
            weights,
            total,
        })
    }

    /// Picks an action index.
    pub fn select_index(&self, rng: &mut SimRng) -> usize {
        let mut x = rng.gen_range(0..self.total);

        for (index, weight) in self.weights.iter().enumerate() {
            if x < *weight {
                return index;
            }
            x -= weight;
        }

        warn!(
            "Action selection exhausted {} actions (total weight {}), using the first",
            self.actions.len(),
            self.total
        );
        0
    }

    /// Picks an action.
    pub fn select(&self, rng: &mut SimRng) -> &ActionsWithMetadata<A> {
        &self.actions[self.select_index(rng)]
    }

    pub fn get(&self, index: usize) -> Option<&ActionsWithMetadata<A>> {
        self.actions.get(index)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
