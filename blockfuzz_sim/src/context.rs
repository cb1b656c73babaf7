//! Execution context handed to actions and queued operations.

use crate::keys::Account;
use crate::randomness::{RandomnessManager, SimRng};

use blockfuzz_env::Header;
use rand::Rng;
use std::time::SystemTime;

/// View of the simulation available to one action.
///
/// Owns the action's private randomness scope, so nothing an action draws
/// can shift the draws of other actions in the block.
pub struct SimCtx<'a> {
    /// Randomness scope of this action
    rand: RandomnessManager,

    /// Genesis accounts
    accounts: &'a [Account],

    /// Header of the block being simulated
    header: &'a Header,
}

impl<'a> SimCtx<'a> {
    pub fn new(rand: RandomnessManager, accounts: &'a [Account], header: &'a Header) -> Self {
        Self {
            rand,
            accounts,
            header,
        }
    }

    pub fn header(&self) -> &'a Header {
        self.header
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn block_time(&self) -> SystemTime {
        self.header.time
    }

    pub fn chain_id(&self) -> &'a str {
        &self.header.chain_id
    }

    pub fn accounts(&self) -> &'a [Account] {
        self.accounts
    }

    /// Seed of this action's randomness scope.
    pub fn sub_seed(&self) -> u64 {
        self.rand.seed()
    }

    /// Stream for `domain` within this action's scope.
    pub fn seeded_rand(&mut self, domain: &str) -> &mut SimRng {
        self.rand.get_seeded_rand(domain)
    }

    /// Derives a nested scope.
    pub fn wrap_rand(&mut self, separator: &str) -> RandomnessManager {
        self.rand.wrap_rand(separator)
    }

    /// Picks a uniformly random account.
    pub fn random_account(&mut self) -> Option<&'a Account> {
        self.random_account_where(|_| true)
    }

    /// Picks a uniformly random account among those matching `pred`.
    pub fn random_account_where<F>(&mut self, pred: F) -> Option<&'a Account>
    where
        F: Fn(&Account) -> bool,
    {
        let accounts = self.accounts;
        let candidates: Vec<&'a Account> = accounts.iter().filter(|acc| pred(acc)).collect();
        if candidates.is_empty() {
            return None;
        }

        let index = self
            .rand
            .get_seeded_rand("select account")
            .gen_range(0..candidates.len());
        Some(candidates[index])
    }
}
