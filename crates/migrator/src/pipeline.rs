//! # MigrationPipeline: Staged Scatter/Gather Orchestration
//!
//! ```text
//!            ┌──────────────────────────────────────────────┐
//!            │           MigrationPipeline::run             │
//!            └──────────────────────────────────────────────┘
//!   eligibility + authorization ──▶ barrier ──▶ exclusions, counts
//!   enrollment (soft)           ──▶ barrier ──▶ exclusions, counts
//!   executor funding (once)
//!   migrate + verify            ──▶ barrier ──▶ counts
//!   reconcile
//! ```
//!
//! Every stage fans out over the active suppliers on the calling task and
//! joins before the next stage starts. The context is only touched between
//! barriers, so it needs no lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info};

use lmig_ledger::{
    Address, Amount, ConfigError, ContractFamily, LedgerClient, MigrationConfig, MigrationMode,
    SupplierPopulation,
};

use crate::authorizer::AllowanceAuthorizer;
use crate::eligibility::EligibilityFilter;
use crate::enrollment::MarketEnrollment;
use crate::error::{collect_stage_results, PipelineError};
use crate::executor::{ExecutorFunding, MigrationExecutor};
use crate::family::{draw_seed, FamilyProfile, ModeSelector};
use crate::reconciler::{reconcile, Stage, StageCounts};
use crate::supplier::{ExclusionSet, MigrationContext, Supplier};
use crate::verifier::{OutcomeVerifier, Verdict};

// ════════════════════════════════════════════════════════════════════════════════
// REPORT
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationOutcome {
    pub supplier: Address,
    pub mode: MigrationMode,
    #[serde(flatten)]
    pub verdict: Verdict,
}

/// Summary of a run that passed every hard check.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub family: ContractFamily,
    pub seed: u64,
    pub population: usize,
    pub suppliers: Vec<Supplier>,
    pub exclusions: ExclusionSet,
    pub counts: StageCounts,
    pub executor_funding: Option<Amount>,
    pub outcomes: Vec<MigrationOutcome>,
    pub mode_counts: BTreeMap<MigrationMode, usize>,
}

impl RunReport {
    pub fn migrated(&self) -> usize {
        self.counts.get(Stage::Migration).unwrap_or(0)
    }

    pub fn outcome(&self, supplier: &Address) -> Option<&MigrationOutcome> {
        self.outcomes.iter().find(|o| o.supplier == *supplier)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// PIPELINE
// ════════════════════════════════════════════════════════════════════════════════

pub struct MigrationPipeline {
    profile: &'static FamilyProfile,
    seed: u64,
    selector: ModeSelector,
    filter: EligibilityFilter,
    authorizer: AllowanceAuthorizer,
    enrollment: MarketEnrollment,
    funding: ExecutorFunding,
    executor: MigrationExecutor,
    verifier: OutcomeVerifier,
}

impl MigrationPipeline {
    /// Builds all stages from a validated config. Without a configured
    /// `mode_seed`, one is drawn from entropy.
    pub fn new(client: Arc<dyn LedgerClient>, config: &MigrationConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let profile = FamilyProfile::for_family(config.family);
        let seed = config.mode_seed.unwrap_or_else(draw_seed);
        let timeout = Duration::from_millis(config.operation_timeout_ms);

        Ok(Self {
            profile,
            seed,
            selector: ModeSelector::for_profile(profile, seed),
            filter: EligibilityFilter::new(client.clone(), config.min_available_funds, timeout),
            authorizer: AllowanceAuthorizer::new(client.clone(), config.migrator, timeout),
            enrollment: MarketEnrollment::new(client.clone(), config.markets.clone(), timeout),
            funding: ExecutorFunding::new(client.clone(), config.migrator, config.executor_funding, timeout),
            executor: MigrationExecutor::new(client.clone(), config.family, timeout),
            verifier: OutcomeVerifier::new(client, config.v2_contract, timeout),
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub async fn run(&self, population: &SupplierPopulation) -> Result<RunReport, PipelineError> {
        info!(
            family = %self.profile.family,
            suppliers = population.len(),
            seed = self.seed,
            "starting migration run"
        );
        let mut ctx = MigrationContext::new(population);

        self.authorizer.run(&self.filter, &mut ctx).await?;
        self.enrollment.run(self.profile, &mut ctx).await;
        let executor_funding = self.funding.fund(self.profile, ctx.active().len()).await?;
        let outcomes = self.migrate_all(&mut ctx).await?;
        reconcile(&ctx.counts, self.profile)?;

        let mut mode_counts = BTreeMap::new();
        for outcome in &outcomes {
            *mode_counts.entry(outcome.mode).or_insert(0) += 1;
        }

        let population = ctx.population_size();
        let (suppliers, exclusions, counts) = ctx.into_parts();
        Ok(RunReport {
            family: self.profile.family,
            seed: self.seed,
            population,
            suppliers,
            exclusions,
            counts,
            executor_funding,
            outcomes,
            mode_counts,
        })
    }

    async fn migrate_one(&self, supplier: &Address, mode: MigrationMode) -> Result<MigrationOutcome, PipelineError> {
        let receipt = self.executor.execute(supplier, mode).await?;
        let verdict = self.verifier.verify(self.profile, supplier, mode, &receipt).await?;
        Ok(MigrationOutcome { supplier: *supplier, mode, verdict })
    }

    async fn migrate_all(&self, ctx: &mut MigrationContext) -> Result<Vec<MigrationOutcome>, PipelineError> {
        let active = ctx.active();
        let results = join_all(active.iter().map(|supplier| async move {
            let mode = self.selector.select(supplier);
            (*supplier, self.migrate_one(supplier, mode).await)
        }))
        .await;

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        if failed > 0 {
            error!("{} migrations reported failure", failed);
        }

        let outcomes = collect_stage_results(Stage::Migration, results)?;
        ctx.counts.record(Stage::Migration, outcomes.len());
        Ok(outcomes.into_iter().map(|(_, outcome)| outcome).collect())
    }
}
