//! # lmig-rehearse
//!
//! Rehearses a migration batch against an in-memory ledger.
//!
//! ## Commands
//!
//! - `run`: execute the full pipeline for a supplier population
//!   - `--config`: TOML run configuration (required)
//!   - `--suppliers`: JSON array of supplier addresses (required)
//!   - `--only`: restrict the run to these population indices
//!   - `--seed`: override the mode-selection seed
//!   - `--json`: print the run report as JSON
//! - `check-config`: validate a configuration file
//!
//! Log verbosity follows `RUST_LOG` (default `info`). Any hard failure
//! exits non-zero.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lmig_ledger::{config, population, Address, MigrationConfig, SimulatedLedger, SimulationContracts};
use lmig_migrator::{MigrationPipeline, RunReport};

#[derive(Parser)]
#[command(version, about = "Rehearse a V1 → V2 supplier migration")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline against a simulated ledger.
    Run {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        suppliers: PathBuf,
        /// Population indices to keep (e.g. `--only 0 --only 3`)
        #[arg(long)]
        only: Vec<usize>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        json: bool,
    },

    /// Validate a configuration file and print the effective values.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

fn load_config(path: &Path) -> Result<MigrationConfig> {
    let cfg = config::load_from_file(path)
        .with_context(|| format!("loading config {}", path.display()))?;
    cfg.validate().context("invalid config")?;
    Ok(cfg)
}

fn simulated_ledger(cfg: &MigrationConfig, suppliers: &[Address]) -> Arc<SimulatedLedger> {
    let contracts = SimulationContracts {
        v1: cfg.v1_contract,
        v2: cfg.v2_contract,
        migrator: cfg.migrator,
    };
    let ledger = SimulatedLedger::with_latency(contracts, cfg.simulation.latency_ms);
    for supplier in suppliers {
        let (funds, v1) = cfg.simulation.balances_for(supplier);
        ledger.add_supplier(*supplier, funds, v1);
    }
    Arc::new(ledger)
}

fn print_summary(report: &RunReport) {
    println!("family:      {}", report.family);
    println!("seed:        {}", report.seed);
    println!("population:  {}", report.population);
    for (stage, n) in report.counts.iter() {
        println!("{:<12} {}", format!("{}:", stage), n);
    }
    for (mode, n) in &report.mode_counts {
        println!("{:<12} {}", format!("{}:", mode), n);
    }
    for exclusion in report.exclusions.iter() {
        println!("excluded     {} ({:?})", exclusion.supplier, exclusion.reason);
    }
}

fn check_config(path: &Path) -> Result<()> {
    let cfg = load_config(path)?;
    println!("{}", serde_json::to_string_pretty(&cfg)?);
    info!("{} is valid", path.display());
    Ok(())
}

async fn run(
    config_path: PathBuf,
    suppliers_path: PathBuf,
    only: Vec<usize>,
    seed: Option<u64>,
    json: bool,
) -> Result<()> {
    let mut cfg = load_config(&config_path)?;
    if seed.is_some() {
        cfg.mode_seed = seed;
    }

    let mut pop = population::load_json(&suppliers_path)
        .with_context(|| format!("loading suppliers {}", suppliers_path.display()))?;
    if !only.is_empty() {
        pop = pop.select(&only)?;
    }

    let ledger = simulated_ledger(&cfg, pop.suppliers());
    let pipeline = MigrationPipeline::new(ledger, &cfg)?;
    info!(seed = pipeline.seed(), "mode seed");

    let report = pipeline.run(&pop).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let result = match cli.cmd {
        Commands::Run { config, suppliers, only, seed, json } => {
            run(config, suppliers, only, seed, json).await
        }
        Commands::CheckConfig { config } => check_config(&config),
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
