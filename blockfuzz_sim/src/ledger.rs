//! Actions and genesis for the reference [`Ledger`] application.
//!
//! | module  | action         | frequency              |
//! |---------|----------------|------------------------|
//! | bank    | transfer       | frequent               |
//! | bank    | delayed_refund | rare                   |
//! | bank    | burn           | legacy weight 20       |
//! | staking | delegate       | common                 |
//! | staking | undelegate     | infrequent             |
//!
//! Every action only builds transactions the current ledger state accepts,
//! and reports a no-op otherwise. A rejected delivery is therefore a bug in
//! the ledger and aborts the run.

use crate::action::{
    actions_from_weighted_operations, deliver_msg, Action, ActionsWithMetadata, Frequency,
    FutureOperation, Operation, OperationOutput, WeightedOperation,
};
use crate::config::SimConfig;
use crate::context::SimCtx;
use crate::error::{ActionError, ConfigError};
use crate::genesis::{random_genesis_time, GenesisProvider, GenesisState};
use crate::keys::Account;
use crate::randomness::SimRng;

use blockfuzz_core::{GenesisAccount, GenesisValidator, Ledger, LedgerGenesis, LedgerTx};
use rand::Rng;
use std::time::Duration;

/// Upper bound on genesis validators.
const MAX_GENESIS_VALIDATORS: usize = 50;

/// Range of genesis account balances.
const MIN_GENESIS_BALANCE: u64 = 1_000;
const MAX_GENESIS_BALANCE: u64 = 1_000_000;

/// Range of genesis self-delegations.
const MIN_GENESIS_POWER: u64 = 10;
const MAX_GENESIS_POWER: u64 = 10_000;

/// Probability that a delegation goes to an already bonded validator.
const EXISTING_VALIDATOR_BIAS: f64 = 0.8;

/// Legacy weight of the burn operation.
const BURN_WEIGHT: u32 = 20;

/// Refunds scheduled by height land 1..=5 blocks later.
const MAX_REFUND_DELAY_BLOCKS: u64 = 5;

/// Refunds scheduled by time land up to this long after the block.
const MAX_REFUND_DELAY_SECS: u64 = 30_000;

/// Genesis for the ledger: every account funded, the first few
/// self-bonded as validators.
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerGenesisProvider;

impl GenesisProvider for LedgerGenesisProvider {
    fn app_state(
        &self,
        rng: &mut SimRng,
        accounts: Vec<Account>,
        config: &SimConfig,
    ) -> Result<GenesisState, ConfigError> {
        if accounts.is_empty() {
            return Err(ConfigError::Genesis(
                "ledger genesis needs at least one account".to_string(),
            ));
        }

        let genesis_accounts = accounts
            .iter()
            .map(|account| GenesisAccount {
                address: account.address.clone(),
                balance: rng.gen_range(MIN_GENESIS_BALANCE..=MAX_GENESIS_BALANCE),
            })
            .collect();

        let num_validators = rng.gen_range(1..=accounts.len().min(MAX_GENESIS_VALIDATORS));
        let validators = accounts[..num_validators]
            .iter()
            .map(|account| GenesisValidator {
                pub_key: account.pub_key_hex(),
                delegator: account.address.clone(),
                power: rng.gen_range(MIN_GENESIS_POWER..=MAX_GENESIS_POWER),
            })
            .collect();

        let genesis = LedgerGenesis {
            accounts: genesis_accounts,
            validators,
        };

        Ok(GenesisState {
            app_state_bytes: genesis.to_bytes(),
            accounts,
            chain_id: config.chain_id.clone(),
            genesis_time: random_genesis_time(rng),
        })
    }
}

/// All ledger actions, ready for the registry.
pub fn ledger_actions() -> Vec<ActionsWithMetadata<Ledger>> {
    let mut actions = vec![
        ActionsWithMetadata::new("bank", Transfer),
        ActionsWithMetadata::new("bank", DelayedRefund),
        ActionsWithMetadata::new("staking", Delegate),
        ActionsWithMetadata::new("staking", Undelegate),
    ];
    actions.extend(actions_from_weighted_operations(
        "bank",
        vec![WeightedOperation::new(BURN_WEIGHT, Burn)],
    ));
    actions
}

fn funded<'a>(sim: &mut SimCtx<'a>, ledger: &Ledger) -> Option<(&'a Account, u64)> {
    let account = sim.random_account_where(|a| ledger.balance(&a.address) > 0)?;
    Some((account, ledger.balance(&account.address)))
}

/// Sends part of a random funded account's balance to a random account.
pub struct Transfer;

impl Action<Ledger> for Transfer {
    fn name(&self) -> &str {
        "transfer"
    }

    fn frequency(&self) -> Frequency {
        Frequency::Frequent
    }

    fn execute(
        &self,
        sim: &mut SimCtx<'_>,
        ledger: &mut Ledger,
    ) -> Result<OperationOutput<Ledger>, ActionError> {
        let Some((from, balance)) = funded(sim, ledger) else {
            return Ok(OperationOutput::no_op("bank", "transfer", "no funded account"));
        };
        let Some(to) = sim.random_account() else {
            return Ok(OperationOutput::no_op("bank", "transfer", "no recipient"));
        };
        let amount = sim.seeded_rand("amount").gen_range(1..=balance);

        let tx = LedgerTx::Transfer {
            from: from.address.clone(),
            to: to.address.clone(),
            amount,
        };
        deliver_msg(ledger, "bank", "transfer", &tx)
    }
}

/// Transfers funds, then schedules partial refunds by height and by time.
pub struct DelayedRefund;

impl Action<Ledger> for DelayedRefund {
    fn name(&self) -> &str {
        "delayed_refund"
    }

    fn frequency(&self) -> Frequency {
        Frequency::Rare
    }

    fn execute(
        &self,
        sim: &mut SimCtx<'_>,
        ledger: &mut Ledger,
    ) -> Result<OperationOutput<Ledger>, ActionError> {
        let Some((from, balance)) = funded(sim, ledger) else {
            return Ok(OperationOutput::no_op("bank", "delayed_refund", "no funded account"));
        };
        let Some(to) = sim.random_account_where(|a| a.address != from.address) else {
            return Ok(OperationOutput::no_op("bank", "delayed_refund", "no distinct recipient"));
        };
        let amount = sim.seeded_rand("amount").gen_range(1..=balance);

        let tx = LedgerTx::Transfer {
            from: from.address.clone(),
            to: to.address.clone(),
            amount,
        };
        let output = deliver_msg(ledger, "bank", "delayed_refund", &tx)?;

        let refund = Refund {
            from: to.address.clone(),
            to: from.address.clone(),
            amount: (amount / 2).max(1),
        };
        let (height, now) = (sim.height(), sim.block_time());
        let rng = sim.seeded_rand("schedule");
        let at_height = height.saturating_add(rng.gen_range(1..=MAX_REFUND_DELAY_BLOCKS));
        let at_time = now + Duration::from_secs(rng.gen_range(1..=MAX_REFUND_DELAY_SECS));

        Ok(output
            .with_future_op(FutureOperation::at_height(at_height, refund.clone()))
            .with_future_op(FutureOperation::at_time(at_time, refund)))
    }
}

/// Queued follow-up of [`DelayedRefund`]: sends funds back if they are
/// still there.
#[derive(Debug, Clone)]
pub struct Refund {
    from: String,
    to: String,
    amount: u64,
}

impl Operation<Ledger> for Refund {
    fn name(&self) -> &str {
        "refund"
    }

    fn run(
        &self,
        _sim: &mut SimCtx<'_>,
        ledger: &mut Ledger,
    ) -> Result<OperationOutput<Ledger>, ActionError> {
        if ledger.balance(&self.from) < self.amount {
            return Ok(OperationOutput::no_op("bank", "refund", "refund source spent"));
        }

        let tx = LedgerTx::Transfer {
            from: self.from.clone(),
            to: self.to.clone(),
            amount: self.amount,
        };
        deliver_msg(ledger, "bank", "refund", &tx)
    }
}

/// Bonds funds to an existing validator, or self-bonds a new one.
pub struct Delegate;

impl Action<Ledger> for Delegate {
    fn name(&self) -> &str {
        "delegate"
    }

    fn frequency(&self) -> Frequency {
        Frequency::Common
    }

    fn execute(
        &self,
        sim: &mut SimCtx<'_>,
        ledger: &mut Ledger,
    ) -> Result<OperationOutput<Ledger>, ActionError> {
        let Some((delegator, balance)) = funded(sim, ledger) else {
            return Ok(OperationOutput::no_op("staking", "delegate", "no funded account"));
        };

        let validators = ledger.validators();
        let rng = sim.seeded_rand("validator");
        let validator = if !validators.is_empty() && rng.gen_bool(EXISTING_VALIDATOR_BIAS) {
            validators[rng.gen_range(0..validators.len())].0.clone()
        } else {
            delegator.pub_key_hex()
        };
        let amount = sim.seeded_rand("amount").gen_range(1..=(balance / 2).max(1));

        let tx = LedgerTx::Delegate {
            delegator: delegator.address.clone(),
            validator,
            amount,
        };
        deliver_msg(ledger, "staking", "delegate", &tx)
    }
}

/// Unbonds part or all of a random delegation.
///
/// Never removes the last remaining validator.
pub struct Undelegate;

impl Action<Ledger> for Undelegate {
    fn name(&self) -> &str {
        "undelegate"
    }

    fn frequency(&self) -> Frequency {
        Frequency::Infrequent
    }

    fn execute(
        &self,
        sim: &mut SimCtx<'_>,
        ledger: &mut Ledger,
    ) -> Result<OperationOutput<Ledger>, ActionError> {
        let delegations = ledger.delegations();
        if delegations.is_empty() {
            return Ok(OperationOutput::no_op("staking", "undelegate", "no delegations"));
        }

        let rng = sim.seeded_rand("delegation");
        let (validator, delegator, bonded) =
            delegations[rng.gen_range(0..delegations.len())].clone();
        let amount = sim.seeded_rand("amount").gen_range(1..=bonded);

        if ledger.validators().len() == 1 && ledger.validator_power(&validator) == amount {
            return Ok(OperationOutput::no_op(
                "staking",
                "undelegate",
                "would remove the last validator",
            ));
        }

        let tx = LedgerTx::Undelegate {
            delegator,
            validator,
            amount,
        };
        deliver_msg(ledger, "staking", "undelegate", &tx)
    }
}

/// Legacy operation: burns a small share of a funded account.
pub struct Burn;

impl Operation<Ledger> for Burn {
    fn name(&self) -> &str {
        "burn"
    }

    fn run(
        &self,
        sim: &mut SimCtx<'_>,
        ledger: &mut Ledger,
    ) -> Result<OperationOutput<Ledger>, ActionError> {
        let Some((account, balance)) = funded(sim, ledger) else {
            return Ok(OperationOutput::no_op("bank", "burn", "no funded account"));
        };
        let amount = sim.seeded_rand("amount").gen_range(1..=(balance / 10).max(1));

        let tx = LedgerTx::Burn {
            account: account.address.clone(),
            amount,
        };
        deliver_msg(ledger, "bank", "burn", &tx)
    }
}
