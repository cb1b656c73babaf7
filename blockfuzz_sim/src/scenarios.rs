//! Named presets that skew params and action frequencies.

use crate::action::{ActionsWithMetadata, Frequency};
use crate::error::ParamsError;
use crate::params::{Params, TransitionMatrix};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// Params exactly as sampled from the seed
    #[default]
    Random,

    /// No evidence, every validator stays online
    Quiet,

    /// Evidence in most blocks, much of it about past heights
    Byzantine,

    /// Validators start and stay mostly flaky or offline
    FlakyNetwork,

    /// Staking actions dominate, so the validator set keeps changing
    ValidatorChurn,

    /// Block sizes swing between stuffed and empty
    Bursty,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Random,
            ScenarioId::Quiet,
            ScenarioId::Byzantine,
            ScenarioId::FlakyNetwork,
            ScenarioId::ValidatorChurn,
            ScenarioId::Bursty,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Random => "random",
            ScenarioId::Quiet => "quiet",
            ScenarioId::Byzantine => "byzantine",
            ScenarioId::FlakyNetwork => "flaky_network",
            ScenarioId::ValidatorChurn => "validator_churn",
            ScenarioId::Bursty => "bursty",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Random => "Sampled params, default action frequencies",
            ScenarioId::Quiet => "All validators online, no double-sign evidence",
            ScenarioId::Byzantine => "Evidence in ~90% of blocks, half of it for past heights",
            ScenarioId::FlakyNetwork => "Liveness chain skewed toward flaky and offline",
            ScenarioId::ValidatorChurn => "Staking actions promoted to frequent",
            ScenarioId::Bursty => "Block-size chain jumps between stuffed and empty",
        }
    }

    /// Applies the preset to sampled params.
    pub fn adjust_params(&self, params: &mut Params) -> Result<(), ParamsError> {
        match self {
            ScenarioId::Random | ScenarioId::ValidatorChurn => {}
            ScenarioId::Quiet => {
                params.evidence_fraction = 0.0;
                params.past_evidence_fraction = 0.0;
                params.initial_liveness_weightings = vec![1, 0, 0];
                params.liveness_transition_matrix = TransitionMatrix::new(vec![
                    vec![1, 0, 0],
                    vec![0, 1, 0],
                    vec![0, 0, 1],
                ])?;
            }
            ScenarioId::Byzantine => {
                params.evidence_fraction = 0.9;
                params.past_evidence_fraction = 0.5;
            }
            ScenarioId::FlakyNetwork => {
                params.initial_liveness_weightings = vec![2, 5, 3];
                params.liveness_transition_matrix = TransitionMatrix::new(vec![
                    vec![50, 30, 10],
                    vec![40, 50, 30],
                    vec![10, 20, 60],
                ])?;
            }
            ScenarioId::Bursty => {
                params.block_size_transition_matrix = TransitionMatrix::new(vec![
                    vec![60, 0, 40],
                    vec![0, 20, 0],
                    vec![40, 80, 60],
                ])?;
            }
        }
        Ok(())
    }

    /// Applies the preset to the registered actions.
    pub fn adjust_actions<A>(
        &self,
        actions: Vec<ActionsWithMetadata<A>>,
    ) -> Vec<ActionsWithMetadata<A>> {
        match self {
            ScenarioId::ValidatorChurn => actions
                .into_iter()
                .map(|a| {
                    if a.module() == "staking" {
                        a.with_frequency(Frequency::Frequent)
                    } else {
                        a
                    }
                })
                .collect(),
            _ => actions,
        }
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScenarioId::all()
            .into_iter()
            .find(|id| id.name() == s.to_lowercase().replace('-', "_"))
            .ok_or_else(|| format!("Unknown scenario: {}", s))
    }
}
