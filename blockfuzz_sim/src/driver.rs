//! The block driver: the simulation main loop.
//!
//! A run moves through `Init -> SimulatingBlock* -> Finished | StoppedEarly`.
//! Each block:
//! 1. halts the run if no validator is left to propose
//! 2. samples the block size from the block-size chain
//! 3. synthesizes votes and evidence and calls `begin_block`
//! 4. runs operations queued for this height, then time-due ones
//! 5. samples every action slot of the block up front
//! 6. executes the sampled actions, queuing any future operations
//! 7. calls `end_block` and folds the validator updates
//! 8. advances height and time and picks the next proposer
//! 9. commits, if configured
//!
//! Every block runs in its own randomness scope (`block {h}`), and every
//! action slot in a child of it (`operation {i}`), so skipping or changing
//! one action never shifts the draws of the others.
//!
//! The driver is single-threaded and holds `Rc` action handles, so it is
//! neither `Send` nor `Sync`. A [`StopHandle`] is the only way to reach it
//! from another thread.

use crate::action::{ActionsWithMetadata, FutureOperation, Operation, OperationMsg};
use crate::config::SimConfig;
use crate::context::SimCtx;
use crate::error::{ConfigError, SimError};
use crate::genesis::GenesisProvider;
use crate::keys::Account;
use crate::log::{OperationEntry, OperationLog};
use crate::params::{next_block_size, random_consensus_params, Params};
use crate::queue::{OperationQueue, Schedule};
use crate::randomness::RandomnessManager;
use crate::scenarios::ScenarioId;
use crate::selector::ActionRegistry;
use crate::stats::{EventStats, StatsRow, StatsTable};
use crate::validators::ValidatorSetSimulator;

use blockfuzz_env::{Application, EndBlockRequest, Header, InitChainRequest};
use rand::Rng;
use serde::Serialize;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// Cross-thread request to stop a run early.
///
/// Observed between blocks and between operations; never interrupts an
/// operation in flight.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Lifecycle state of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    Init,
    SimulatingBlock,
    Finished,
    StoppedEarly,
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every configured block was simulated
    Completed,

    /// The validator set became empty
    NoProposer,

    /// A stop was requested through the [`StopHandle`]
    Interrupted,
}

/// Summary of a finished (or stopped) run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Seed actually used
    pub seed: u64,

    pub scenario: ScenarioId,
    pub state: DriverState,
    pub stop_reason: StopReason,

    /// Blocks fully simulated
    pub blocks: u64,

    /// Actions and queued operations executed
    pub operations: u64,

    /// Height the next block would have had
    pub final_height: u64,

    pub genesis_time: SystemTime,
    pub final_time: SystemTime,

    /// Hex of the application's last commit hash
    pub app_hash: String,

    /// Size of the current validator set at the end
    pub validators: usize,

    pub stats: EventStats,
    pub params: Params,
}

/// Drives an [`Application`] through randomized blocks.
pub struct BlockDriver<A: Application> {
    config: SimConfig,
    seed: u64,
    app: A,
    registry: ActionRegistry<A>,

    /// Root randomness scope
    rand: RandomnessManager,

    params: Params,
    validators: ValidatorSetSimulator,
    queue: OperationQueue<Box<dyn Operation<A>>>,
    accounts: Vec<Account>,

    /// Header of the next block to simulate
    header: Header,
    genesis_time: SystemTime,

    stats: EventStats,
    log: OperationLog,
    table: Option<StatsTable>,
    stop: StopHandle,
    state: DriverState,

    /// Current state of the block-size chain
    block_size_state: usize,

    blocks: u64,
    operations: u64,
}

impl<A: Application> BlockDriver<A> {
    /// Validates the config, generates genesis and initializes the chain.
    ///
    /// Every configuration problem surfaces here, before any block runs.
    pub fn new(
        config: SimConfig,
        mut app: A,
        actions: Vec<ActionsWithMetadata<A>>,
        genesis: &dyn GenesisProvider,
    ) -> Result<Self, SimError> {
        config.validate()?;
        let seed = config.resolve_seed()?;
        let registry =
            ActionRegistry::new(config.scenario.adjust_actions(actions), config.weights)?;
        let mut rand = RandomnessManager::new(seed).with_debug(config.debug_rand);

        info!(
            "Starting simulation: seed={} scenario={} blocks={} block_size={}",
            seed, config.scenario, config.num_blocks, config.block_size
        );

        let params = config.load_params(rand.get_seeded_rand("params"))?;
        debug!("Simulation params: {}", serde_json::to_string(&params)?);
        if let Some(path) = &config.export_params_path {
            std::fs::write(path, serde_json::to_string_pretty(&params)?)?;
            info!("Exported params to {}", path.display());
        }

        let candidates = genesis.random_accounts(rand.get_seeded_rand("accounts"), params.num_keys);
        let genesis_state =
            genesis.app_state(rand.get_seeded_rand("genesis"), candidates, &config)?;
        if genesis_state.accounts.is_empty() {
            return Err(ConfigError::Genesis("genesis produced no accounts".to_string()).into());
        }

        let consensus_params = random_consensus_params(
            rand.get_seeded_rand("consensus params"),
            config.avg_block_time(),
        );
        let evidence_max_age_blocks = consensus_params.evidence_max_age_blocks;
        let evidence_max_age = consensus_params.evidence_max_age;
        let res = app
            .init_chain(InitChainRequest {
                app_state_bytes: genesis_state.app_state_bytes,
                chain_id: genesis_state.chain_id.clone(),
                consensus_params,
                time: genesis_state.genesis_time,
            })
            .map_err(|source| SimError::Application { height: 0, source })?;

        let validators = ValidatorSetSimulator::new(
            &params,
            rand.get_seeded_rand("initial validators"),
            &res.validators,
        )
        .with_evidence_max_age(evidence_max_age_blocks, evidence_max_age);
        let proposer = validators.random_proposer(rand.get_seeded_rand("initial proposer"));

        let header = Header {
            chain_id: genesis_state.chain_id,
            height: config.first_height(),
            time: genesis_state.genesis_time,
            proposer,
            app_hash: res.app_hash,
        };

        info!(
            "Genesis: {} accounts, {} validators, {} actions, chain {} at unix time {}",
            genesis_state.accounts.len(),
            validators.current().len(),
            registry.len(),
            header.chain_id,
            header.unix_secs()
        );

        let table = match &config.stats_table_path {
            Some(path) => Some(StatsTable::open(path)?),
            None => None,
        };

        Ok(Self {
            log: OperationLog::new(config.lean),
            seed,
            app,
            registry,
            rand,
            params,
            validators,
            queue: OperationQueue::new(),
            accounts: genesis_state.accounts,
            genesis_time: header.time,
            header,
            stats: EventStats::new(),
            table,
            stop: StopHandle::new(),
            state: DriverState::Init,
            block_size_state: 0,
            blocks: 0,
            operations: 0,
            config,
        })
    }

    /// Replaces the stop handle, typically with one shared with a signal
    /// listener.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn validators(&self) -> &ValidatorSetSimulator {
        &self.validators
    }

    pub fn stats(&self) -> &EventStats {
        &self.stats
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn into_app(self) -> A {
        self.app
    }

    /// Operations still waiting in the queue.
    pub fn pending_operations(&self) -> usize {
        self.queue.len()
    }

    /// Simulates blocks until the configured count is reached, the
    /// validator set empties, or a stop is requested.
    ///
    /// Statistics and logs are exported in all three cases. On a fatal
    /// error the full operation log is printed to stderr first.
    pub fn run(&mut self) -> Result<SimulationReport, SimError> {
        self.state = DriverState::SimulatingBlock;
        let end_height = self.config.first_height() + self.config.num_blocks;

        let reason = loop {
            if self.stop.is_stopped() {
                break StopReason::Interrupted;
            }
            if self.header.height >= end_height {
                break StopReason::Completed;
            }
            if self.header.proposer.is_none() {
                break StopReason::NoProposer;
            }
            self.simulate_block()?;
        };

        self.state = match reason {
            StopReason::Interrupted => DriverState::StoppedEarly,
            _ => DriverState::Finished,
        };
        self.finish(reason)
    }

    fn simulate_block(&mut self) -> Result<(), SimError> {
        let height = self.header.height;
        let mut block_rand = self.rand.wrap_rand(&format!("block {}", height));

        let (size_state, block_size) = next_block_size(
            block_rand.get_seeded_rand("block size"),
            &self.params.block_size_transition_matrix,
            self.block_size_state,
            self.config.block_size,
        );
        self.block_size_state = size_state;

        let request = self.validators.begin_block(
            block_rand.get_seeded_rand("begin block"),
            &self.header,
            &mut self.stats,
        );
        let evidence = request.byzantine_validators.len();
        self.log.push(OperationEntry::begin_block(height, block_rand.seed()));
        if let Err(source) = self.app.begin_block(request) {
            return Err(self.fatal(SimError::Application { height, source }));
        }

        let queued = self.run_queued_operations(&mut block_rand)?;

        // Draw every slot before executing any of them
        let planned: Vec<(usize, RandomnessManager)> = (0..block_size)
            .map(|i| {
                let mut op_rand = block_rand.wrap_rand(&format!("operation {}", i));
                let index = self.registry.select_index(op_rand.get_seeded_rand("action select"));
                (index, op_rand)
            })
            .collect();

        let mut executed = 0;
        for (order, (index, op_rand)) in planned.into_iter().enumerate() {
            if self.stop.is_stopped() {
                let skipped = block_size - order;
                warn!(
                    "Stop requested at height {}: skipping {} remaining operations",
                    height, skipped
                );
                self.stats.add("block", "operations", "skipped", skipped as u64);
                break;
            }
            self.execute_action(height, order, index, op_rand)?;
            executed += 1;
        }

        let res = match self.app.end_block(EndBlockRequest { height }) {
            Ok(res) => res,
            Err(source) => return Err(self.fatal(SimError::Application { height, source })),
        };
        self.log.push(OperationEntry::end_block(height, block_rand.seed()));

        if let Err(source) = self.validators.fold_updates(
            block_rand.get_seeded_rand("validator updates"),
            &res.validator_updates,
            &mut self.stats,
        ) {
            return Err(self.fatal(SimError::Validators { height, source }));
        }

        let span_ms =
            (self.config.max_time_per_block - self.config.min_time_per_block).as_millis() as u64;
        let jitter_ms = if span_ms == 0 {
            0
        } else {
            block_rand.get_seeded_rand("block time").gen_range(0..span_ms)
        };
        self.header.time += self.config.min_time_per_block + Duration::from_millis(jitter_ms);
        self.header.height += 1;
        self.header.proposer = self
            .validators
            .random_proposer(block_rand.get_seeded_rand("proposer"));

        if self.config.commit {
            self.header.app_hash = self.app.commit().app_hash;
        }

        self.blocks += 1;
        debug!(
            "Block {}: size={} executed={} queued={} evidence={} updates={} validators={}",
            height,
            block_size,
            executed,
            queued,
            evidence,
            res.validator_updates.len(),
            self.validators.current().len()
        );

        if self.header.proposer.is_none() {
            warn!("Validator set is empty after height {}", height);
        }

        Ok(())
    }

    /// Runs operations due at the current height, then those due by the
    /// current block time.
    ///
    /// Future operations returned by queued operations are rejected. On a
    /// stop request the operations not yet run go back into the queue.
    fn run_queued_operations(
        &mut self,
        block_rand: &mut RandomnessManager,
    ) -> Result<usize, SimError> {
        let height = self.header.height;
        let mut due: Vec<(Schedule, Box<dyn Operation<A>>)> = self
            .queue
            .drain_height(height)
            .into_iter()
            .map(|op| (Schedule::AtHeight(height), op))
            .collect();
        due.extend(
            self.queue
                .drain_due(self.header.time)
                .into_iter()
                .map(|(time, op)| (Schedule::AtTime(time), op)),
        );
        let total = due.len();

        let mut due = due.into_iter().enumerate();
        while let Some((order, (schedule, op))) = due.next() {
            if self.stop.is_stopped() {
                let mut rest = vec![(schedule, op)];
                rest.extend(due.map(|(_, entry)| entry));
                warn!(
                    "Stop requested at height {}: returning {} queued operations to the queue",
                    height,
                    rest.len()
                );
                self.stats.add("queued", "operations", "requeued", rest.len() as u64);
                self.queue.requeue_front(rest);
                return Ok(order);
            }

            let op_rand = block_rand.wrap_rand(&format!("queued operation {}", order));
            let sub_seed = op_rand.seed();
            let header = self.header.clone();
            let outcome = {
                let mut ctx = SimCtx::new(op_rand, &self.accounts, &header);
                let app = &mut self.app;
                catch_unwind(AssertUnwindSafe(|| op.run(&mut ctx, app)))
            };

            let output = match outcome {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    return Err(self.fatal(SimError::QueuedOperationFailed {
                        height,
                        name: op.name().to_string(),
                        reason: e.to_string(),
                    }))
                }
                Err(payload) => {
                    return Err(self.fatal(SimError::Panicked {
                        height,
                        context: format!("queued operation {}", op.name()),
                        message: panic_message(payload.as_ref()),
                    }))
                }
            };

            output.msg.log_event(&mut self.stats);
            self.log.push(OperationEntry::queued_msg(
                height,
                order as u64,
                sub_seed,
                &output.msg,
                &output.result_data,
            ));
            let recorded =
                self.record_row(height, &output.msg.route, &output.msg, &output.result_data);
            if let Err(e) = recorded {
                return Err(self.fatal(e));
            }

            if !output.future_ops.is_empty() {
                warn!(
                    "Queued operation {} returned {} future operations; rejecting them",
                    op.name(),
                    output.future_ops.len()
                );
                self.stats.add(
                    "queued",
                    "rejected_future_ops",
                    op.name(),
                    output.future_ops.len() as u64,
                );
            }

            self.operations += 1;
        }

        Ok(total)
    }

    fn execute_action(
        &mut self,
        height: u64,
        order: usize,
        index: usize,
        op_rand: RandomnessManager,
    ) -> Result<(), SimError> {
        let Some(action) = self.registry.get(index).cloned() else {
            return Err(SimError::ActionFailed {
                height,
                index: order,
                route: String::new(),
                name: String::new(),
                reason: format!("no action registered at index {}", index),
            });
        };

        let sub_seed = op_rand.seed();
        let header = self.header.clone();
        let outcome = {
            let mut ctx = SimCtx::new(op_rand, &self.accounts, &header);
            let app = &mut self.app;
            catch_unwind(AssertUnwindSafe(|| action.action().execute(&mut ctx, app)))
        };

        let mut output = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(self.fatal(SimError::ActionFailed {
                    height,
                    index: order,
                    route: action.module().to_string(),
                    name: action.name().to_string(),
                    reason: e.to_string(),
                }))
            }
            Err(payload) => {
                return Err(self.fatal(SimError::Panicked {
                    height,
                    context: format!("operation {} ({}/{})", order, action.module(), action.name()),
                    message: panic_message(payload.as_ref()),
                }))
            }
        };

        output.msg.route = action.module().to_string();
        output.msg.log_event(&mut self.stats);
        self.log.push(OperationEntry::msg(
            height,
            order as u64,
            sub_seed,
            &output.msg,
            &output.result_data,
        ));
        if !output.msg.ok {
            debug!(
                "No-op {}/{} at height {}: {}",
                output.msg.route, output.msg.name, height, output.msg.comment
            );
        }
        let recorded = self.record_row(height, action.module(), &output.msg, &output.result_data);
        if let Err(e) = recorded {
            return Err(self.fatal(e));
        }

        for future in output.future_ops {
            self.schedule(height, future);
        }

        self.operations += 1;
        Ok(())
    }

    fn schedule(&mut self, height: u64, future: FutureOperation<A>) {
        let name = future.operation.name().to_string();
        match future.schedule {
            Schedule::AtHeight(target) if target <= height => {
                warn!(
                    "Dropping future operation {} for past height {} (current {})",
                    name, target, height
                );
                self.stats.tally("queued", &name, "dropped_past_height");
            }
            schedule => {
                self.stats.tally("queued", &name, "scheduled");
                self.queue.enqueue(schedule, future.operation);
            }
        }
    }

    fn record_row(
        &mut self,
        height: u64,
        module: &str,
        msg: &OperationMsg,
        result: &[u8],
    ) -> Result<(), SimError> {
        if self.table.is_none() {
            return Ok(());
        }

        let row = StatsRow {
            height,
            module: module.to_string(),
            name: msg.name.clone(),
            comment: msg.comment.clone(),
            passed: msg.ok,
            gas_wanted: msg.gas_wanted,
            gas_used: msg.gas_used,
            msg: msg.msg.clone(),
            result_data: hex::encode_upper(result),
            app_hash: hex::encode_upper(self.app.last_commit_hash()),
        };

        match self.table.as_mut() {
            Some(table) => table.append(&row).map_err(|e| SimError::StatsTable {
                height,
                reason: e.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Logs a fatal error and dumps the operation log to stderr.
    fn fatal(&mut self, err: SimError) -> SimError {
        error!("Simulation failed with seed {}: {}", self.seed, err);
        eprintln!(
            "Simulation halted at height {} after {} operations; operation log follows",
            self.header.height, self.operations
        );
        if let Err(e) = self.log.print_logs(&mut std::io::stderr().lock()) {
            error!("Failed to print operation log: {}", e);
        }
        if let Some(table) = self.table.as_mut() {
            if let Err(e) = table.flush() {
                error!("Failed to flush stats table: {}", e);
            }
        }
        err
    }

    fn finish(&mut self, reason: StopReason) -> Result<SimulationReport, SimError> {
        match reason {
            StopReason::Completed => info!(
                "Simulation finished: {} blocks, {} operations, seed {}",
                self.blocks, self.operations, self.seed
            ),
            StopReason::NoProposer => warn!(
                "Simulation halted at height {}: no validator left to propose",
                self.header.height
            ),
            StopReason::Interrupted => warn!(
                "Simulation stopped early at height {} after {} operations",
                self.header.height, self.operations
            ),
        }

        if let Some(table) = self.table.as_mut() {
            table.flush()?;
        }
        if let Some(path) = &self.config.export_stats_path {
            self.stats.export_json(path)?;
        }
        if let Some(path) = &self.config.export_log_path {
            self.log.write_to_file(path)?;
        }

        Ok(self.report(reason))
    }

    /// Builds the summary of the run so far.
    pub fn report(&self, reason: StopReason) -> SimulationReport {
        SimulationReport {
            seed: self.seed,
            scenario: self.config.scenario,
            state: self.state,
            stop_reason: reason,
            blocks: self.blocks,
            operations: self.operations,
            final_height: self.header.height,
            genesis_time: self.genesis_time,
            final_time: self.header.time,
            app_hash: hex::encode_upper(self.app.last_commit_hash()),
            validators: self.validators.current().len(),
            stats: self.stats.clone(),
            params: self.params.clone(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs one simulation and hands the application back.
pub fn simulate_from_seed<A: Application>(
    config: SimConfig,
    app: A,
    actions: Vec<ActionsWithMetadata<A>>,
    genesis: &dyn GenesisProvider,
) -> Result<(SimulationReport, A), SimError> {
    let mut driver = BlockDriver::new(config, app, actions, genesis)?;
    let report = driver.run()?;
    Ok((report, driver.into_app()))
}

/// Runs the same configuration `runs` times on fresh applications and
/// fails if any run's operation log, final app hash or statistics differ
/// from the first run's.
///
/// Exports are only written by the first run. Every run shares `stop`; once
/// it is set the current run ends early and no further runs start.
pub fn check_determinism<A, F>(
    config: &SimConfig,
    runs: usize,
    genesis: &dyn GenesisProvider,
    stop: &StopHandle,
    mut factory: F,
) -> Result<SimulationReport, SimError>
where
    A: Application,
    F: FnMut() -> (A, Vec<ActionsWithMetadata<A>>),
{
    let runs = runs.max(1);
    let mut baseline: Option<(OperationLog, SimulationReport)> = None;

    for run in 0..runs {
        let mut run_config = config.clone();
        if run > 0 {
            run_config.export_params_path = None;
            run_config.export_stats_path = None;
            run_config.stats_table_path = None;
            run_config.export_log_path = None;
        }

        let (app, actions) = factory();
        let mut driver =
            BlockDriver::new(run_config, app, actions, genesis)?.with_stop_handle(stop.clone());
        let report = driver.run()?;

        if report.stop_reason == StopReason::Interrupted {
            warn!("Determinism check interrupted during run {}/{}", run + 1, runs);
            return Ok(report);
        }

        if baseline.is_none() {
            baseline = Some((driver.log().clone(), report));
            continue;
        }
        let Some((base_log, base_report)) = &baseline else {
            continue;
        };

        if let Some(i) = base_log.first_divergence(driver.log()) {
            return Err(SimError::NonDeterministic {
                run,
                detail: format!(
                    "operation log differs at entry {}: {:?} vs {:?}",
                    i,
                    base_log.entries().get(i),
                    driver.log().entries().get(i)
                ),
            });
        }
        if base_report.app_hash != report.app_hash {
            return Err(SimError::NonDeterministic {
                run,
                detail: format!(
                    "final app hash {} vs {}",
                    base_report.app_hash, report.app_hash
                ),
            });
        }
        if base_report.stats != report.stats {
            return Err(SimError::NonDeterministic {
                run,
                detail: "event statistics differ".to_string(),
            });
        }

        info!("Determinism run {}/{} matched run 1", run + 1, runs);
    }

    match baseline {
        Some((_, report)) => Ok(report),
        None => Err(ConfigError::Invalid("no determinism runs executed".to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{deliver_msg, Action, Frequency, OperationOutput};
    use crate::error::ActionError;
    use crate::genesis::{random_genesis_time, GenesisState};
    use crate::log::EntryKind;
    use crate::randomness::SimRng;
    use crate::stats::StatsTable;
    use blockfuzz_env::{
        AppError, BeginBlockRequest, CommitResponse, DeliverResponse, EndBlockResponse,
        InitChainResponse, ValidatorUpdate,
    };
    use std::cell::Cell;
    use std::rc::Rc;

    /// Counts deliveries; reports a fixed genesis validator set.
    #[derive(Default)]
    struct TestApp {
        genesis_validators: Vec<ValidatorUpdate>,
        delivered: u64,
        last_height: u64,
        hash: Vec<u8>,

        /// Updates returned by `end_block` at the given height
        updates_at: Option<(u64, Vec<ValidatorUpdate>)>,

        /// `(height, proposer, voters)` per begin-block
        seen: Vec<(u64, Option<Vec<u8>>, Vec<Vec<u8>>)>,
        ended: Vec<u64>,
    }

    impl TestApp {
        fn with_validators(n: u8) -> Self {
            Self {
                genesis_validators: (1..=n)
                    .map(|i| ValidatorUpdate::new(vec![i; 32], 10))
                    .collect(),
                ..Default::default()
            }
        }
    }

    impl Application for TestApp {
        fn init_chain(&mut self, _req: InitChainRequest) -> Result<InitChainResponse, AppError> {
            Ok(InitChainResponse {
                validators: self.genesis_validators.clone(),
                app_hash: vec![0],
            })
        }

        fn begin_block(&mut self, req: BeginBlockRequest) -> Result<(), AppError> {
            self.last_height = req.header.height;
            let voters = req
                .last_commit_votes
                .iter()
                .map(|v| v.validator.pub_key.clone())
                .collect();
            self.seen.push((req.header.height, req.header.proposer, voters));
            Ok(())
        }

        fn deliver(&mut self, tx: &[u8]) -> Result<DeliverResponse, AppError> {
            self.delivered += 1;
            Ok(DeliverResponse {
                data: tx.to_vec(),
                gas_wanted: 10,
                gas_used: 5,
                log: String::new(),
            })
        }

        fn end_block(&mut self, req: EndBlockRequest) -> Result<EndBlockResponse, AppError> {
            self.ended.push(req.height);
            let validator_updates = match &self.updates_at {
                Some((height, updates)) if *height == req.height => updates.clone(),
                _ => Vec::new(),
            };
            Ok(EndBlockResponse { validator_updates })
        }

        fn commit(&mut self) -> CommitResponse {
            self.hash = self.delivered.to_be_bytes().to_vec();
            CommitResponse {
                app_hash: self.hash.clone(),
            }
        }

        fn last_commit_hash(&self) -> Vec<u8> {
            self.hash.clone()
        }
    }

    struct TestGenesis;

    impl GenesisProvider for TestGenesis {
        fn app_state(
            &self,
            rng: &mut SimRng,
            accounts: Vec<Account>,
            config: &SimConfig,
        ) -> Result<GenesisState, ConfigError> {
            Ok(GenesisState {
                app_state_bytes: Vec::new(),
                accounts,
                chain_id: config.chain_id.clone(),
                genesis_time: random_genesis_time(rng),
            })
        }
    }

    struct Ping;

    impl Action<TestApp> for Ping {
        fn name(&self) -> &str {
            "ping"
        }

        fn frequency(&self) -> Frequency {
            Frequency::Frequent
        }

        fn execute(
            &self,
            sim: &mut SimCtx<'_>,
            app: &mut TestApp,
        ) -> Result<OperationOutput<TestApp>, ActionError> {
            let nonce = sim.seeded_rand("nonce").gen::<u32>();
            let to = sim.random_account().map(|a| a.address.clone()).unwrap_or_default();
            deliver_msg(app, "test", "ping", &serde_json::json!({ "nonce": nonce, "to": to }))
        }
    }

    struct Skip;

    impl Action<TestApp> for Skip {
        fn name(&self) -> &str {
            "skip"
        }

        fn frequency(&self) -> Frequency {
            Frequency::Common
        }

        fn execute(
            &self,
            _sim: &mut SimCtx<'_>,
            _app: &mut TestApp,
        ) -> Result<OperationOutput<TestApp>, ActionError> {
            Ok(OperationOutput::no_op("test", "skip", "nothing to do"))
        }
    }

    struct Fail;

    impl Action<TestApp> for Fail {
        fn name(&self) -> &str {
            "fail"
        }

        fn frequency(&self) -> Frequency {
            Frequency::Rare
        }

        fn execute(
            &self,
            _sim: &mut SimCtx<'_>,
            _app: &mut TestApp,
        ) -> Result<OperationOutput<TestApp>, ActionError> {
            Err(ActionError::Failed("boom".to_string()))
        }
    }

    struct Explode;

    impl Action<TestApp> for Explode {
        fn name(&self) -> &str {
            "explode"
        }

        fn frequency(&self) -> Frequency {
            Frequency::Rare
        }

        fn execute(
            &self,
            _sim: &mut SimCtx<'_>,
            _app: &mut TestApp,
        ) -> Result<OperationOutput<TestApp>, ActionError> {
            panic!("kaboom")
        }
    }

    /// Queued follow-up; optionally tries to queue another one.
    struct FollowUp {
        nested: bool,
        runs: Rc<Cell<u32>>,
    }

    impl Operation<TestApp> for FollowUp {
        fn name(&self) -> &str {
            "follow_up"
        }

        fn run(
            &self,
            sim: &mut SimCtx<'_>,
            app: &mut TestApp,
        ) -> Result<OperationOutput<TestApp>, ActionError> {
            self.runs.set(self.runs.get() + 1);
            let msg = serde_json::json!({ "height": sim.height() });
            let out = deliver_msg(app, "test", "follow_up", &msg)?;
            if self.nested {
                let again = FollowUp {
                    nested: false,
                    runs: Rc::clone(&self.runs),
                };
                return Ok(out.with_future_op(FutureOperation::at_height(sim.height() + 1, again)));
            }
            Ok(out)
        }
    }

    /// Schedules a follow-up at the next height and one at the current
    /// block time, plus one for a height already past.
    struct Defer {
        nested: bool,
        runs: Rc<Cell<u32>>,
    }

    impl Action<TestApp> for Defer {
        fn name(&self) -> &str {
            "defer"
        }

        fn frequency(&self) -> Frequency {
            Frequency::Frequent
        }

        fn execute(
            &self,
            sim: &mut SimCtx<'_>,
            _app: &mut TestApp,
        ) -> Result<OperationOutput<TestApp>, ActionError> {
            let make = || FollowUp {
                nested: self.nested,
                runs: Rc::clone(&self.runs),
            };
            Ok(OperationOutput::no_op("test", "defer", "scheduled follow-ups")
                .with_future_op(FutureOperation::at_height(sim.height() + 1, make()))
                .with_future_op(FutureOperation::at_time(sim.block_time(), make()))
                .with_future_op(FutureOperation::at_height(sim.height(), make())))
        }
    }

    /// Delivers once and requests a stop.
    struct Halt {
        stop: StopHandle,
    }

    impl Action<TestApp> for Halt {
        fn name(&self) -> &str {
            "halt"
        }

        fn frequency(&self) -> Frequency {
            Frequency::Frequent
        }

        fn execute(
            &self,
            _sim: &mut SimCtx<'_>,
            app: &mut TestApp,
        ) -> Result<OperationOutput<TestApp>, ActionError> {
            self.stop.stop();
            deliver_msg(app, "test", "halt", &serde_json::json!({}))
        }
    }

    /// Reports a route other than the module it is registered under.
    struct Misrouted;

    impl Action<TestApp> for Misrouted {
        fn name(&self) -> &str {
            "misrouted"
        }

        fn frequency(&self) -> Frequency {
            Frequency::Frequent
        }

        fn execute(
            &self,
            _sim: &mut SimCtx<'_>,
            app: &mut TestApp,
        ) -> Result<OperationOutput<TestApp>, ActionError> {
            deliver_msg(app, "elsewhere", "misrouted", &serde_json::json!({}))
        }
    }

    /// Queued operation that requests a stop when it runs.
    struct StopOp {
        stop: StopHandle,
    }

    impl Operation<TestApp> for StopOp {
        fn name(&self) -> &str {
            "stop_op"
        }

        fn run(
            &self,
            _sim: &mut SimCtx<'_>,
            app: &mut TestApp,
        ) -> Result<OperationOutput<TestApp>, ActionError> {
            self.stop.stop();
            deliver_msg(app, "test", "stop_op", &serde_json::json!({}))
        }
    }

    /// Queues two stopping operations for the next height.
    struct Plant {
        stop: StopHandle,
    }

    impl Action<TestApp> for Plant {
        fn name(&self) -> &str {
            "plant"
        }

        fn frequency(&self) -> Frequency {
            Frequency::Frequent
        }

        fn execute(
            &self,
            sim: &mut SimCtx<'_>,
            _app: &mut TestApp,
        ) -> Result<OperationOutput<TestApp>, ActionError> {
            let next = sim.height() + 1;
            let stop_op = || StopOp {
                stop: self.stop.clone(),
            };
            Ok(OperationOutput::no_op("test", "plant", "queued stops")
                .with_future_op(FutureOperation::at_height(next, stop_op()))
                .with_future_op(FutureOperation::at_height(next, stop_op())))
        }
    }

    fn config(seed: u64) -> SimConfig {
        SimConfig::new(seed)
            .with_blocks(10)
            .with_block_size(5)
            .with_num_keys(6)
            .with_scenario(ScenarioId::Quiet)
    }

    fn ping_actions() -> Vec<ActionsWithMetadata<TestApp>> {
        vec![
            ActionsWithMetadata::new("test", Ping),
            ActionsWithMetadata::new("test", Skip),
        ]
    }

    fn run(
        config: SimConfig,
        actions: Vec<ActionsWithMetadata<TestApp>>,
    ) -> Result<BlockDriver<TestApp>, SimError> {
        let mut driver =
            BlockDriver::new(config, TestApp::with_validators(3), actions, &TestGenesis)?;
        driver.run()?;
        Ok(driver)
    }

    #[test]
    fn test_run_completes_all_blocks() {
        let driver = run(config(1), ping_actions()).unwrap();
        let report = driver.report(StopReason::Completed);

        assert_eq!(driver.state(), DriverState::Finished);
        assert_eq!(report.blocks, 10);
        assert_eq!(report.final_height, 11);
        assert_eq!(driver.app().last_height, 10);

        let begins = driver
            .log()
            .entries()
            .iter()
            .filter(|e| e.kind == EntryKind::BeginBlock)
            .count();
        assert_eq!(begins, 10);
    }

    #[test]
    fn test_same_seed_same_log_and_hash() {
        let a = run(config(7), ping_actions()).unwrap();
        let b = run(config(7), ping_actions()).unwrap();

        assert_eq!(a.log().first_divergence(b.log()), None);
        assert_eq!(a.app().last_commit_hash(), b.app().last_commit_hash());
        assert_eq!(a.stats(), b.stats());
    }

    #[test]
    fn test_different_seed_different_log() {
        let a = run(config(7), ping_actions()).unwrap();
        let b = run(config(8), ping_actions()).unwrap();

        assert!(a.log().first_divergence(b.log()).is_some());
    }

    #[test]
    fn test_check_determinism_passes() {
        let report = check_determinism(&config(3), 3, &TestGenesis, &StopHandle::new(), || {
            (TestApp::with_validators(3), ping_actions())
        })
        .unwrap();

        assert_eq!(report.stop_reason, StopReason::Completed);
    }

    #[test]
    fn test_check_determinism_honors_stop() {
        let stop = StopHandle::new();
        stop.stop();
        let mut built = 0;

        let report = check_determinism(&config(3), 3, &TestGenesis, &stop, || {
            built += 1;
            (TestApp::with_validators(3), ping_actions())
        })
        .unwrap();

        assert_eq!(report.stop_reason, StopReason::Interrupted);
        assert_eq!(report.blocks, 0);
        assert_eq!(built, 1);
    }

    #[test]
    fn test_block_time_advances_within_bounds() {
        let cfg = config(5).with_block_time(Duration::from_secs(5), Duration::from_secs(10));
        let driver = run(cfg, ping_actions()).unwrap();
        let report = driver.report(StopReason::Completed);

        let elapsed = report
            .final_time
            .duration_since(report.genesis_time)
            .unwrap();
        assert!(elapsed >= Duration::from_secs(50));
        assert!(elapsed < Duration::from_secs(100));
    }

    #[test]
    fn test_no_ops_are_tallied_and_run_continues() {
        let driver = run(config(2).with_blocks(30), ping_actions()).unwrap();

        assert!(driver.stats().get("test", "skip", "failure") > 0);
        assert!(driver.stats().get("test", "ping", "ok") > 0);
        assert_eq!(
            driver.app().delivered,
            driver.stats().get("test", "ping", "ok")
        );
    }

    #[test]
    fn test_lean_log_omits_no_ops() {
        let mut cfg = config(2).with_blocks(30);
        cfg.lean = true;
        let driver = run(cfg, ping_actions()).unwrap();

        assert!(driver.stats().get("test", "skip", "failure") > 0);
        assert!(driver.log().entries().iter().all(|e| e.ok));
    }

    #[test]
    fn test_failing_action_is_fatal() {
        let actions = vec![ActionsWithMetadata::new("test", Fail)];
        let err = run(config(1), actions).err().unwrap();

        assert!(matches!(
            err,
            SimError::ActionFailed { ref name, ref reason, .. }
                if name == "fail" && reason == "boom"
        ));
    }

    #[test]
    fn test_panicking_action_is_caught() {
        let actions = vec![ActionsWithMetadata::new("test", Explode)];
        let err = run(config(1), actions).err().unwrap();

        assert!(matches!(err, SimError::Panicked { ref message, .. } if message == "kaboom"));
    }

    #[test]
    fn test_future_operations_run_later() {
        let runs = Rc::new(Cell::new(0));
        let actions = vec![ActionsWithMetadata::new(
            "test",
            Defer {
                nested: false,
                runs: Rc::clone(&runs),
            },
        )];
        let driver = run(config(4), actions).unwrap();

        assert!(runs.get() > 0);
        assert!(driver.stats().get("queued", "follow_up", "scheduled") > 0);
        assert!(driver.stats().get("queued", "follow_up", "dropped_past_height") > 0);

        let queued = driver
            .log()
            .entries()
            .iter()
            .filter(|e| e.kind == EntryKind::QueuedMsg)
            .count();
        assert_eq!(queued as u32, runs.get());
    }

    #[test]
    fn test_queued_operations_cannot_defer_again() {
        let runs = Rc::new(Cell::new(0));
        let actions = vec![ActionsWithMetadata::new(
            "test",
            Defer {
                nested: true,
                runs: Rc::clone(&runs),
            },
        )];
        let driver = run(config(4), actions).unwrap();

        assert!(runs.get() > 0);
        assert_eq!(
            driver.stats().get("queued", "rejected_future_ops", "follow_up"),
            runs.get() as u64
        );
    }

    #[test]
    fn test_validator_updates_take_effect_two_blocks_later() {
        let old = vec![1u8; 32];
        let new = vec![9u8; 32];
        let mut app = TestApp::with_validators(1);
        app.updates_at = Some((
            1,
            vec![ValidatorUpdate::new(new.clone(), 10), ValidatorUpdate::new(old.clone(), 0)],
        ));

        let mut driver =
            BlockDriver::new(config(11).with_blocks(4), app, ping_actions(), &TestGenesis).unwrap();
        driver.run().unwrap();

        let seen = &driver.app().seen;
        assert_eq!(seen[0], (1, Some(old.clone()), vec![old.clone()]));
        assert_eq!(seen[1], (2, Some(old.clone()), vec![old.clone()]));
        assert_eq!(seen[2], (3, Some(new.clone()), vec![new.clone()]));
        assert_eq!(seen[3], (4, Some(new.clone()), vec![new]));
    }

    #[test]
    fn test_stop_mid_block_still_closes_block() {
        let stop = StopHandle::new();
        let actions = vec![ActionsWithMetadata::new("test", Halt { stop: stop.clone() })];
        let cfg = config(6).with_blocks(50);
        let mut driver = BlockDriver::new(cfg, TestApp::with_validators(3), actions, &TestGenesis)
            .unwrap()
            .with_stop_handle(stop);

        let report = driver.run().unwrap();
        let stopped_at = report.final_height - 1;

        assert_eq!(report.state, DriverState::StoppedEarly);
        assert_eq!(report.stop_reason, StopReason::Interrupted);
        assert_eq!(report.operations, 1);
        assert_eq!(driver.app().delivered, 1);
        assert_eq!(driver.app().ended.last(), Some(&stopped_at));
        assert_eq!(driver.app().last_commit_hash(), 1u64.to_be_bytes().to_vec());
        assert_eq!(report.blocks, stopped_at);

        let last = driver.log().entries().last().unwrap();
        assert_eq!(last.kind, EntryKind::EndBlock);
        assert_eq!(last.height, stopped_at);
    }

    #[test]
    fn test_stop_between_queued_operations_keeps_the_rest_queued() {
        let stop = StopHandle::new();
        let actions = vec![ActionsWithMetadata::new("test", Plant { stop: stop.clone() })];
        let cfg = config(8).with_blocks(50);
        let mut driver = BlockDriver::new(cfg, TestApp::with_validators(3), actions, &TestGenesis)
            .unwrap()
            .with_stop_handle(stop);

        let report = driver.run().unwrap();
        let scheduled = driver.stats().get("queued", "stop_op", "scheduled");
        let ran = driver
            .log()
            .entries()
            .iter()
            .filter(|e| e.kind == EntryKind::QueuedMsg)
            .count();

        assert_eq!(report.stop_reason, StopReason::Interrupted);
        assert_eq!(ran, 1);
        assert!(scheduled >= 2);
        assert_eq!(driver.pending_operations() as u64, scheduled - 1);
        assert_eq!(
            driver.stats().get("queued", "operations", "requeued"),
            scheduled - 1
        );
    }

    #[test]
    fn test_stats_route_is_the_registered_module() {
        let mut cfg = config(12);
        let dir = tempfile::tempdir().unwrap();
        cfg.stats_table_path = Some(dir.path().join("table.jsonl"));
        let actions = vec![ActionsWithMetadata::new("test", Misrouted)];

        let driver = run(cfg, actions).unwrap();

        assert!(driver.stats().get("test", "misrouted", "ok") > 0);
        assert_eq!(driver.stats().get("elsewhere", "misrouted", "ok"), 0);

        let rows = StatsTable::read_rows(&dir.path().join("table.jsonl")).unwrap();
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|row| row.module == "test"));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_stats_table_write_failure_is_fatal() {
        let full = std::path::Path::new("/dev/full");
        if !full.exists() {
            return;
        }
        let mut cfg = config(13).with_blocks(100);
        cfg.stats_table_path = Some(full.to_path_buf());

        let err = run(cfg, ping_actions()).err().unwrap();

        assert!(matches!(err, SimError::StatsTable { .. }));
        assert!(err.height().is_some());
    }

    #[test]
    fn test_stop_before_first_block() {
        let dir = tempfile::tempdir().unwrap();
        let stats_path = dir.path().join("stats.json");
        let mut cfg = config(1);
        cfg.export_stats_path = Some(stats_path.clone());

        let stop = StopHandle::new();
        let app = TestApp::with_validators(3);
        let mut driver = BlockDriver::new(cfg, app, ping_actions(), &TestGenesis)
            .unwrap()
            .with_stop_handle(stop.clone());
        stop.stop();

        let report = driver.run().unwrap();

        assert_eq!(report.state, DriverState::StoppedEarly);
        assert_eq!(report.stop_reason, StopReason::Interrupted);
        assert_eq!(report.blocks, 0);
        assert!(stats_path.exists());
    }

    #[test]
    fn test_empty_validator_set_finishes() {
        let mut driver =
            BlockDriver::new(config(1), TestApp::with_validators(0), ping_actions(), &TestGenesis)
                .unwrap();

        let report = driver.run().unwrap();

        assert_eq!(report.state, DriverState::Finished);
        assert_eq!(report.stop_reason, StopReason::NoProposer);
        assert_eq!(report.blocks, 0);
    }

    #[test]
    fn test_no_actions_is_config_error() {
        let result =
            BlockDriver::new(config(1), TestApp::with_validators(1), Vec::new(), &TestGenesis);
        assert!(matches!(result, Err(SimError::Config(ConfigError::NoActions))));
    }

    #[test]
    fn test_exports() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(9);
        cfg.export_params_path = Some(dir.path().join("params.json"));
        cfg.export_log_path = Some(dir.path().join("log.json"));
        cfg.stats_table_path = Some(dir.path().join("table.jsonl"));

        let driver = run(cfg, ping_actions()).unwrap();
        let report = driver.report(StopReason::Completed);

        let params_json = std::fs::read_to_string(dir.path().join("params.json")).unwrap();
        let params: Params = serde_json::from_str(&params_json).unwrap();
        assert_eq!(&params, driver.params());

        let rows = StatsTable::read_rows(&dir.path().join("table.jsonl")).unwrap();
        assert_eq!(rows.len() as u64, report.operations);

        let log_json = std::fs::read_to_string(dir.path().join("log.json")).unwrap();
        let log: Vec<OperationEntry> = serde_json::from_str(&log_json).unwrap();
        assert_eq!(log.len(), driver.log().len());
    }

    #[test]
    #[should_panic(expected = "reused")]
    fn test_debug_rand_catches_separator_reuse() {
        let mut cfg = config(1);
        cfg.debug_rand = true;
        let mut driver =
            BlockDriver::new(cfg, TestApp::with_validators(1), ping_actions(), &TestGenesis)
                .unwrap();

        driver.rand.wrap_rand("block 1");
        driver.rand.wrap_rand("block 1");
    }
}
