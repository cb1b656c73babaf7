//! Run configuration.
//!
//! One immutable [`SimConfig`] is built at startup (by the CLI or a test)
//! and handed to the driver; nothing reads process-wide state mid-run.

use crate::action::WeightTable;
use crate::error::ConfigError;
use crate::params::Params;
use crate::randomness::SimRng;
use crate::scenarios::ScenarioId;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for a simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Root seed
    pub seed: u64,

    /// File holding the seed; overrides `seed` when set
    pub seed_file: Option<PathBuf>,

    /// Chain identifier
    pub chain_id: String,

    /// Height of the first simulated block (0 is treated as 1)
    pub initial_block_height: u64,

    /// Number of blocks to simulate
    pub num_blocks: u64,

    /// Long-run average number of actions per block
    pub block_size: usize,

    /// Lower bound of the time between blocks
    pub min_time_per_block: Duration,

    /// Upper bound of the time between blocks
    pub max_time_per_block: Duration,

    /// Commit application state after every block
    pub commit: bool,

    /// Omit no-op messages from the operation log
    pub lean: bool,

    /// Panic when a randomness separator is reused
    pub debug_rand: bool,

    /// Preset applied to params and action frequencies
    pub scenario: ScenarioId,

    /// Action weight per frequency tier
    pub weights: WeightTable,

    /// Overrides the sampled number of genesis accounts
    pub num_keys: Option<usize>,

    /// JSON params file; random params are sampled when unset
    pub params_file: Option<PathBuf>,

    /// Where to write the params actually used
    pub export_params_path: Option<PathBuf>,

    /// Where to write the event statistics JSON
    pub export_stats_path: Option<PathBuf>,

    /// Where to append one JSON line per executed action
    pub stats_table_path: Option<PathBuf>,

    /// Where to write the operation log
    pub export_log_path: Option<PathBuf>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            seed_file: None,
            chain_id: "blockfuzz-sim".to_string(),
            initial_block_height: 1,
            num_blocks: 100,
            block_size: 30,
            min_time_per_block: Duration::from_secs(5_000),
            max_time_per_block: Duration::from_secs(10_000),
            commit: true,
            lean: false,
            debug_rand: false,
            scenario: ScenarioId::Random,
            weights: WeightTable::default(),
            num_keys: None,
            params_file: None,
            export_params_path: None,
            export_stats_path: None,
            stats_table_path: None,
            export_log_path: None,
        }
    }
}

impl SimConfig {
    /// Creates a default config with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ..Default::default()
        }
    }

    pub fn with_blocks(mut self, num_blocks: u64) -> Self {
        self.num_blocks = num_blocks;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_num_keys(mut self, num_keys: usize) -> Self {
        self.num_keys = Some(num_keys);
        self
    }

    pub fn with_scenario(mut self, scenario: ScenarioId) -> Self {
        self.scenario = scenario;
        self
    }

    pub fn with_block_time(mut self, min: Duration, max: Duration) -> Self {
        self.min_time_per_block = min;
        self.max_time_per_block = max;
        self
    }

    /// Height of the first block.
    pub fn first_height(&self) -> u64 {
        self.initial_block_height.max(1)
    }

    /// Midpoint of the block-time range.
    pub fn avg_block_time(&self) -> Duration {
        (self.min_time_per_block + self.max_time_per_block) / 2
    }

    /// Rejects contradictory settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_blocks == 0 {
            return Err(ConfigError::Invalid("num_blocks must be positive".to_string()));
        }
        if self.block_size == 0 {
            return Err(ConfigError::Invalid("block_size must be positive".to_string()));
        }
        if self.max_time_per_block < self.min_time_per_block {
            return Err(ConfigError::Invalid(format!(
                "max_time_per_block ({:?}) is below min_time_per_block ({:?})",
                self.max_time_per_block, self.min_time_per_block
            )));
        }
        if self.chain_id.trim().is_empty() {
            return Err(ConfigError::Invalid("chain_id must not be empty".to_string()));
        }
        if self.num_keys == Some(0) {
            return Err(ConfigError::Invalid("num_keys must be positive".to_string()));
        }
        if self.first_height().checked_add(self.num_blocks).is_none() {
            return Err(ConfigError::Invalid("block range overflows".to_string()));
        }
        Ok(())
    }

    /// Returns the seed, reading the seed file if one is configured.
    pub fn resolve_seed(&self) -> Result<u64, ConfigError> {
        let Some(path) = &self.seed_file else {
            return Ok(self.seed);
        };

        let text = read_file(path)?;
        text.trim().parse::<u64>().map_err(|e| ConfigError::SeedFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Config for the `offset`-th of several consecutive seeds.
    ///
    /// The seed file is read once here and dropped from the result, so each
    /// offset gets its own seed.
    pub fn with_seed_offset(&self, offset: u64) -> Result<Self, ConfigError> {
        let seed = self.resolve_seed()?.wrapping_add(offset);
        Ok(Self {
            seed,
            seed_file: None,
            ..self.clone()
        })
    }

    /// Loads params from the params file, or samples them from `rng`.
    ///
    /// The scenario preset and the `num_keys` override are applied on top.
    pub fn load_params(&self, rng: &mut SimRng) -> Result<Params, ConfigError> {
        let mut params = match &self.params_file {
            Some(path) => {
                let text = read_file(path)?;
                serde_json::from_str::<Params>(&text).map_err(|e| ConfigError::ParamsFile {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?
            }
            None => Params::random(rng),
        };

        self.scenario.adjust_params(&mut params)?;
        if let Some(num_keys) = self.num_keys {
            params.num_keys = num_keys;
        }

        params.validate()?;
        Ok(params)
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = SimConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.avg_block_time(), Duration::from_secs(7_500));
    }

    #[test]
    fn test_initial_height_zero_means_one() {
        let config = SimConfig {
            initial_block_height: 0,
            ..Default::default()
        };
        assert_eq!(config.first_height(), 1);
    }

    #[test]
    fn test_validate_rejects_contradictions() {
        let inverted =
            SimConfig::new(1).with_block_time(Duration::from_secs(10), Duration::from_secs(5));
        assert!(matches!(inverted.validate(), Err(ConfigError::Invalid(_))));

        let no_blocks = SimConfig::new(1).with_blocks(0);
        assert!(matches!(no_blocks.validate(), Err(ConfigError::Invalid(_))));

        let empty_blocks = SimConfig::new(1).with_block_size(0);
        assert!(matches!(empty_blocks.validate(), Err(ConfigError::Invalid(_))));

        let no_keys = SimConfig::new(1).with_num_keys(0);
        assert!(matches!(no_keys.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_seed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, " 1234 ").unwrap();

        let config = SimConfig {
            seed_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert_eq!(config.resolve_seed().unwrap(), 1234);
    }

    #[test]
    fn test_malformed_seed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not-a-seed").unwrap();

        let config = SimConfig {
            seed_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(config.resolve_seed(), Err(ConfigError::SeedFile { .. })));
    }

    #[test]
    fn test_seed_offsets_apply_to_seed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1234").unwrap();

        let config = SimConfig {
            seed_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let seeds: Vec<u64> = (0..3)
            .map(|offset| config.with_seed_offset(offset).unwrap().resolve_seed().unwrap())
            .collect();
        assert_eq!(seeds, vec![1234, 1235, 1236]);

        let plain = SimConfig::new(u64::MAX).with_seed_offset(1).unwrap();
        assert_eq!(plain.seed, 0);
    }

    #[test]
    fn test_missing_seed_file() {
        let config = SimConfig {
            seed_file: Some(PathBuf::from("/nonexistent/blockfuzz/seed")),
            ..Default::default()
        };
        assert!(matches!(config.resolve_seed(), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_params_file_round_trip_through_loader() {
        let params = Params::random(&mut SimRng::seed_from_u64(3));
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(&params).unwrap()).unwrap();

        let config = SimConfig {
            params_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let loaded = config.load_params(&mut SimRng::seed_from_u64(99)).unwrap();

        assert_eq!(loaded, params);
    }

    #[test]
    fn test_params_file_with_bad_matrix() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "past_evidence_fraction": 0.1,
                "num_keys": 5,
                "evidence_fraction": 0.1,
                "initial_liveness_weightings": [1, 1, 1],
                "liveness_transition_matrix": [[1, 0, 0], [0, 1, 0]],
                "block_size_transition_matrix": [[1]]
            }}"#
        )
        .unwrap();

        let config = SimConfig {
            params_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(
            config.load_params(&mut SimRng::seed_from_u64(1)),
            Err(ConfigError::ParamsFile { .. })
        ));
    }

    #[test]
    fn test_num_keys_override() {
        let config = SimConfig::new(1).with_num_keys(7);
        let params = config.load_params(&mut SimRng::seed_from_u64(1)).unwrap();
        assert_eq!(params.num_keys, 7);
    }
}
