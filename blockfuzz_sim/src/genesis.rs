//! Genesis generation contract.

use crate::config::SimConfig;
use crate::error::ConfigError;
use crate::keys::{self, Account};
use crate::randomness::SimRng;

use rand::Rng;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// 2024-01-01 00:00:00 UTC
pub const GENESIS_EPOCH_SECS: u64 = 1_704_067_200;

/// Genesis times are spread over one year after the epoch.
const GENESIS_SPREAD_SECS: u64 = 365 * 24 * 60 * 60;

/// Everything needed to call `init_chain`.
#[derive(Debug, Clone)]
pub struct GenesisState {
    /// Serialized application genesis
    pub app_state_bytes: Vec<u8>,

    /// Accounts available to actions for the whole run
    pub accounts: Vec<Account>,

    pub chain_id: String,
    pub genesis_time: SystemTime,
}

/// Application-specific genesis construction.
pub trait GenesisProvider {
    /// Generates the candidate account set.
    fn random_accounts(&self, rng: &mut SimRng, n: usize) -> Vec<Account> {
        keys::random_accounts(rng, n)
    }

    /// Builds the serialized genesis state for `accounts`.
    ///
    /// May drop or add accounts; the returned set is the one actions see.
    fn app_state(
        &self,
        rng: &mut SimRng,
        accounts: Vec<Account>,
        config: &SimConfig,
    ) -> Result<GenesisState, ConfigError>;
}

/// Samples a genesis time within a year of 2024-01-01.
pub fn random_genesis_time(rng: &mut SimRng) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(GENESIS_EPOCH_SECS + rng.gen_range(0..GENESIS_SPREAD_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_genesis_time_range() {
        let mut rng = SimRng::seed_from_u64(1);
        for _ in 0..100 {
            let secs = random_genesis_time(&mut rng)
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs();
            assert!(secs >= GENESIS_EPOCH_SECS);
            assert!(secs < GENESIS_EPOCH_SECS + GENESIS_SPREAD_SECS);
        }
    }
}
