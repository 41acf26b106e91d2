//! # lmig-migrator
//!
//! Drives a population of suppliers from a deprecated V1 ledger contract to
//! its V2 successor and verifies every migration against fixed structural
//! and value-conservation invariants.
//!
//! ## Stages
//!
//! | stage                     | failure handling                          |
//! |---------------------------|-------------------------------------------|
//! | eligibility               | low funds → exclusion; query error → hard |
//! | authorization             | hard                                      |
//! | enrollment                | exclusion                                 |
//! | executor funding          | hard                                      |
//! | migration + verification  | hard                                      |
//! | reconciliation            | hard                                      |
//!
//! Exclusions are monotonic: once excluded, a supplier takes no further
//! part in the run. Hard failures abort the run after the current stage's
//! barrier and surface as [`PipelineError`].
//!
//! ## Quick start
//!
//! ```ignore
//! let ledger = Arc::new(SimulatedLedger::new(contracts));
//! let pipeline = MigrationPipeline::new(ledger, &config)?;
//! let report = pipeline.run(&population).await?;
//! ```

pub mod authorizer;
pub mod eligibility;
pub mod enrollment;
pub mod error;
pub mod executor;
pub mod family;
pub mod pipeline;
pub mod reconciler;
pub mod supplier;
pub mod verifier;

pub use authorizer::AllowanceAuthorizer;
pub use eligibility::{Eligibility, EligibilityFilter};
pub use enrollment::MarketEnrollment;
pub use error::{FailureCause, PipelineError};
pub use executor::{ExecutorFunding, MigrationExecutor};
pub use family::{draw_seed, seeded_mode, FamilyProfile, ModeSelector};
pub use pipeline::{MigrationOutcome, MigrationPipeline, RunReport};
pub use reconciler::{reconcile, reconciliation_baseline, Stage, StageCounts};
pub use supplier::{Exclusion, ExclusionReason, ExclusionSet, MigrationContext, Supplier, SupplierStatus};
pub use verifier::{
    ratio_bp, verify_economics, verify_outcome, verify_structure, EconomicFailure, OutcomeVerifier,
    StructuralFailure, Verdict, VerificationError,
};
