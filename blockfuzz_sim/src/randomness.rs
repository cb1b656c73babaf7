//! Reproducible, domain-separated random streams derived from one seed.
//!
//! Every stream is a ChaCha8 generator. Three ways to get one:
//! - [`RandomnessManager::get_rand`]: a fresh stream per call, derived from
//!   an internal counter. Its values depend on call order.
//! - [`RandomnessManager::get_seeded_rand`]: one stream per domain string,
//!   memoized for the manager's lifetime. Its values depend only on the seed
//!   and the domain, never on what other domains were drawn from.
//! - [`RandomnessManager::wrap_rand`]: a child manager rooted at
//!   `seed + hash64(separator)`, for isolating a nested scope.
//!
//! A manager is not safe for concurrent access; the engine only ever
//! touches it from the driver thread.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// The generator behind every simulation stream.
pub type SimRng = ChaCha8Rng;

/// Golden-ratio multiplier spreading counter values across the seed space.
const COUNTER_MIX: u64 = 0x9e3779b97f4a7c15;

/// Maps a domain string to a well-distributed 64-bit value.
///
/// Uses the first 8 bytes (big-endian) of the SHA-256 digest.
pub fn hash64(domain: &str) -> u64 {
    let digest = Sha256::digest(domain.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Owner of all randomness for one scope of the simulation.
#[derive(Debug)]
pub struct RandomnessManager {
    /// Root seed of this manager
    internal_seed: u64,

    /// Number of `get_rand` calls so far
    counter: u64,

    /// Memoized per-domain streams
    seeded: BTreeMap<String, SimRng>,

    /// Separators already handed to `wrap_rand` (debug mode only)
    separators: BTreeSet<String>,

    /// Panic on repeated `wrap_rand` separators
    debug: bool,
}

impl RandomnessManager {
    /// Creates a manager rooted at `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            internal_seed: seed,
            counter: 0,
            seeded: BTreeMap::new(),
            separators: BTreeSet::new(),
            debug: false,
        }
    }

    /// Enables or disables separator-reuse detection.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Returns the root seed.
    pub fn seed(&self) -> u64 {
        self.internal_seed
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Returns a fresh one-shot stream.
    ///
    /// Successive calls return uncorrelated streams; reordering calls changes
    /// which stream each caller gets.
    pub fn get_rand(&mut self) -> SimRng {
        self.counter += 1;
        let seed = self.internal_seed ^ self.counter.wrapping_mul(COUNTER_MIX);
        SimRng::seed_from_u64(seed)
    }

    /// Returns the stream for `domain`, creating it on first use.
    ///
    /// The same domain always yields the same stream instance, so draws
    /// continue where the previous caller left off.
    pub fn get_seeded_rand(&mut self, domain: &str) -> &mut SimRng {
        let seed = self.internal_seed.wrapping_add(hash64(domain));
        self.seeded
            .entry(domain.to_string())
            .or_insert_with(|| SimRng::seed_from_u64(seed))
    }

    /// Derives a child manager for a nested scope.
    ///
    /// Drawing from the child never advances any of the parent's streams.
    ///
    /// # Panics
    ///
    /// In debug mode, panics if `separator` was already used on this manager.
    pub fn wrap_rand(&mut self, separator: &str) -> RandomnessManager {
        if self.debug && !self.separators.insert(separator.to_string()) {
            panic!(
                "randomness separator {:?} reused under seed {}",
                separator, self.internal_seed
            );
        }

        RandomnessManager::new(self.internal_seed.wrapping_add(hash64(separator)))
            .with_debug(self.debug)
    }
}
