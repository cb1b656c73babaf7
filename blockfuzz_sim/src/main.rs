//! blockfuzz Simulator CLI
//!
//! Fuzz the reference ledger with randomized blocks, one or more seeds and
//! scenario presets at a time.

use blockfuzz_core::Ledger;
use blockfuzz_sim::{
    check_determinism, ledger_actions, BlockDriver, LedgerGenesisProvider, ScenarioId, SimConfig,
    SimError, SimulationReport, StopHandle, StopReason,
};
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// blockfuzz randomized block-simulation CLI
#[derive(Parser, Debug)]
#[command(name = "blockfuzz-sim")]
#[command(
    about = "Fuzz an ABCI-style application with reproducible randomized blocks",
    long_about = None
)]
struct Args {
    /// Root seed (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Read the seed from a file instead
    #[arg(long)]
    seed_file: Option<PathBuf>,

    /// Number of consecutive seeds to run
    #[arg(long, default_value = "1")]
    seeds: u64,

    /// Number of blocks to simulate
    #[arg(short, long, default_value = "100")]
    blocks: u64,

    /// Average number of actions per block
    #[arg(long, default_value = "30")]
    block_size: usize,

    /// Scenario preset (random, quiet, byzantine, flaky_network, validator_churn, bursty, all)
    #[arg(short = 'S', long, default_value = "random")]
    scenario: String,

    /// Chain identifier
    #[arg(long, default_value = "blockfuzz-sim")]
    chain_id: String,

    /// Height of the first block
    #[arg(long, default_value = "1")]
    initial_height: u64,

    /// Minimum seconds between blocks
    #[arg(long, default_value = "5000")]
    min_block_time: u64,

    /// Maximum seconds between blocks
    #[arg(long, default_value = "10000")]
    max_block_time: u64,

    /// Override the sampled number of genesis accounts
    #[arg(long)]
    num_keys: Option<usize>,

    /// Skip committing after each block
    #[arg(long)]
    no_commit: bool,

    /// Leave no-op messages out of the operation log
    #[arg(long)]
    lean: bool,

    /// Panic on reused randomness separators
    #[arg(long)]
    debug_rand: bool,

    /// Run each configuration this many times and compare the runs
    #[arg(long, default_value = "1")]
    determinism_runs: usize,

    /// JSON params file (random params when absent)
    #[arg(long)]
    params_file: Option<PathBuf>,

    /// Write the params used to this file
    #[arg(long)]
    export_params: Option<PathBuf>,

    /// Write event statistics JSON to this file
    #[arg(long)]
    export_stats: Option<PathBuf>,

    /// Append one JSON line per executed action to this file
    #[arg(long)]
    stats_table: Option<PathBuf>,

    /// Write the operation log to this file
    #[arg(long)]
    export_log: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON summary on stdout for CI parsing
    #[arg(long)]
    json: bool,
}

impl Args {
    fn has_exports(&self) -> bool {
        self.export_params.is_some()
            || self.export_stats.is_some()
            || self.stats_table.is_some()
            || self.export_log.is_some()
    }

    fn config(&self, seed: u64, scenario: ScenarioId) -> SimConfig {
        SimConfig {
            seed,
            seed_file: self.seed_file.clone(),
            chain_id: self.chain_id.clone(),
            initial_block_height: self.initial_height,
            num_blocks: self.blocks,
            block_size: self.block_size,
            min_time_per_block: Duration::from_secs(self.min_block_time),
            max_time_per_block: Duration::from_secs(self.max_block_time),
            commit: !self.no_commit,
            lean: self.lean,
            debug_rand: self.debug_rand,
            scenario,
            num_keys: self.num_keys,
            params_file: self.params_file.clone(),
            export_params_path: self.export_params.clone(),
            export_stats_path: self.export_stats.clone(),
            stats_table_path: self.stats_table.clone(),
            export_log_path: self.export_log.clone(),
            ..Default::default()
        }
    }
}

struct RunOutcome {
    scenario: ScenarioId,
    seed: u64,
    result: Result<SimulationReport, SimError>,
}

fn run_one(
    config: SimConfig,
    determinism_runs: usize,
    stop: &StopHandle,
) -> Result<SimulationReport, SimError> {
    if determinism_runs > 1 {
        return check_determinism(&config, determinism_runs, &LedgerGenesisProvider, stop, || {
            (Ledger::new(), ledger_actions())
        });
    }

    let mut driver =
        BlockDriver::new(config, Ledger::new(), ledger_actions(), &LedgerGenesisProvider)?
            .with_stop_handle(stop.clone());
    driver.run()
}

/// Resolves once SIGINT or (on unix) SIGTERM arrives.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                let received = tokio::select! {
                    res = tokio::signal::ctrl_c() => res,
                    _ = terminate.recv() => Ok(()),
                };
                if let Err(e) = received {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                    terminate.recv().await;
                }
                return;
            }
            Err(e) => warn!("Failed to listen for SIGTERM: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Sets `stop` on SIGINT or SIGTERM from a dedicated thread.
fn spawn_interrupt_listener(stop: StopHandle) {
    let spawned = std::thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!("Interrupt handling unavailable: {}", e);
                    return;
                }
            };
            runtime.block_on(async {
                shutdown_signal().await;
                warn!("Interrupt received, stopping after the current operation");
                stop.stop();
            });
        });

    if let Err(e) = spawned {
        warn!("Failed to spawn interrupt listener: {}", e);
    }
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    if !args.json {
        info!("blockfuzz simulator v{}", env!("CARGO_PKG_VERSION"));
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!(
                "Available scenarios: random, quiet, byzantine, flaky_network, validator_churn, \
                 bursty, all"
            );
            std::process::exit(1);
        })]
    };

    let total_runs = scenarios.len() as u64 * args.seeds.max(1);
    if total_runs > 1 && args.has_exports() {
        eprintln!("Error: export paths only support a single scenario and seed");
        std::process::exit(1);
    }

    let base_seed = if args.seed == 0 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };

    let stop = StopHandle::new();
    spawn_interrupt_listener(stop.clone());

    let mut outcomes: Vec<RunOutcome> = Vec::new();

    'seeds: for offset in 0..args.seeds.max(1) {
        for scenario in &scenarios {
            let (seed, result) = match args.config(base_seed, *scenario).with_seed_offset(offset) {
                Ok(config) => (
                    config.seed,
                    run_one(config, args.determinism_runs, &stop),
                ),
                Err(e) => (base_seed.wrapping_add(offset), Err(SimError::from(e))),
            };

            if !args.json {
                match &result {
                    Ok(report) => {
                        info!(
                            "✓ {} (seed={}) {:?}: {} blocks, {} operations, app hash {}",
                            scenario.name(),
                            report.seed,
                            report.stop_reason,
                            report.blocks,
                            report.operations,
                            report.app_hash
                        );
                        if args.verbose {
                            if let Err(e) = report.stats.print(&mut std::io::stdout().lock()) {
                                error!("Failed to print statistics: {}", e);
                            }
                        }
                    }
                    Err(e) => error!("✗ {} (seed={}) FAILED: {}", scenario.name(), seed, e),
                }
            }

            outcomes.push(RunOutcome {
                scenario: *scenario,
                seed,
                result,
            });

            if stop.is_stopped() {
                break 'seeds;
            }
        }
    }

    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    let interrupted = outcomes
        .iter()
        .any(|o| matches!(&o.result, Ok(r) if r.stop_reason == StopReason::Interrupted));

    if args.json {
        let summary = serde_json::json!({
            "total": outcomes.len(),
            "passed": outcomes.len() - failed,
            "failed": failed,
            "interrupted": interrupted,
            "results": outcomes.iter().map(|o| match &o.result {
                Ok(report) => serde_json::json!({
                    "scenario": o.scenario.name(),
                    "seed": o.seed,
                    "passed": true,
                    "stop_reason": report.stop_reason,
                    "blocks": report.blocks,
                    "operations": report.operations,
                    "final_height": report.final_height,
                    "app_hash": report.app_hash,
                }),
                Err(e) => serde_json::json!({
                    "scenario": o.scenario.name(),
                    "seed": o.seed,
                    "passed": false,
                    "height": e.height(),
                    "failure_reason": e.to_string(),
                }),
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to encode summary: {}", e),
        }
    } else if failed == 0 {
        info!("All {} simulation runs passed", outcomes.len());
    } else {
        error!("{}/{} simulation runs failed", failed, outcomes.len());
        for outcome in &outcomes {
            if let Err(e) = &outcome.result {
                error!("  - {} seed={}: {}", outcome.scenario.name(), outcome.seed, e);
            }
        }
    }

    if failed > 0 {
        std::process::exit(1);
    }
}
