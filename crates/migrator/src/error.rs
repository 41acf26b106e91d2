//! Hard-failure taxonomy of a migration run.
//!
//! Soft outcomes (insufficient funds, failed enrollment) are not errors;
//! they are recorded as [`ExclusionReason`](crate::supplier::ExclusionReason)s
//! and the batch continues. Everything here aborts the run.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::error;

use lmig_ledger::{Address, ClientError, MalformedReceipt, MigrationMode};

use crate::reconciler::Stage;
use crate::verifier::{EconomicFailure, StructuralFailure};

/// Why one remote step did not succeed.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    /// A receipt came back with failure status.
    #[error("receipt status is failure")]
    Reverted,

    /// The client could not produce a receipt or value.
    #[error("{error}")]
    Client { error: ClientError },

    /// No response within the per-operation timeout.
    #[error("no response within {after_ms} ms")]
    TimedOut { after_ms: u64 },
}

impl From<ClientError> for FailureCause {
    fn from(error: ClientError) -> Self {
        FailureCause::Client { error }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("available-funds query failed for {supplier}: {cause}")]
    EligibilityQueryFailure { supplier: Address, cause: FailureCause },

    #[error("authorization failed for {supplier}: {cause}")]
    AuthorizationFailure { supplier: Address, cause: FailureCause },

    #[error("funding executor {executor} failed: {cause}")]
    FundingFailure { executor: Address, cause: FailureCause },

    #[error("migration ({mode}) failed for {supplier}: {cause}")]
    MigrationExecutionFailure {
        supplier: Address,
        mode: MigrationMode,
        cause: FailureCause,
    },

    #[error("post-migration balance query failed for {supplier}: {cause}")]
    BalanceQueryFailure { supplier: Address, cause: FailureCause },

    #[error("structural verification failed for {supplier} ({mode}): {failure}")]
    StructuralVerificationFailure {
        supplier: Address,
        mode: MigrationMode,
        failure: StructuralFailure,
    },

    #[error("economic invariant failed for {supplier} ({mode}): {failure}")]
    EconomicInvariantFailure {
        supplier: Address,
        mode: MigrationMode,
        failure: EconomicFailure,
    },

    #[error("malformed receipt for {supplier}: {error}")]
    MalformedReceipt { supplier: Address, error: MalformedReceipt },

    #[error("reconciliation failed: {migrated} migrated but {expected} {expected_stage}")]
    ReconciliationFailure {
        expected_stage: Stage,
        expected: usize,
        migrated: usize,
    },
}

impl PipelineError {
    /// Supplier the failure is attributed to, if any.
    pub fn supplier(&self) -> Option<&Address> {
        match self {
            Self::EligibilityQueryFailure { supplier, .. }
            | Self::AuthorizationFailure { supplier, .. }
            | Self::MigrationExecutionFailure { supplier, .. }
            | Self::BalanceQueryFailure { supplier, .. }
            | Self::StructuralVerificationFailure { supplier, .. }
            | Self::EconomicInvariantFailure { supplier, .. }
            | Self::MalformedReceipt { supplier, .. } => Some(supplier),
            Self::FundingFailure { .. } | Self::ReconciliationFailure { .. } => None,
        }
    }
}

/// Runs one remote call under the per-operation timeout.
pub(crate) async fn call_with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, FailureCause>
where
    F: Future<Output = Result<T, ClientError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(FailureCause::from(e)),
        Err(_) => Err(FailureCause::TimedOut {
            after_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Fan-in barrier for one stage. Every hard failure is logged; the first one
/// in population order is returned. On success the outcomes keep that order.
pub(crate) fn collect_stage_results<T>(
    stage: Stage,
    results: Vec<(Address, Result<T, PipelineError>)>,
) -> Result<Vec<(Address, T)>, PipelineError> {
    let mut outcomes = Vec::with_capacity(results.len());
    let mut first: Option<PipelineError> = None;

    for (supplier, result) in results {
        match result {
            Ok(value) => outcomes.push((supplier, value)),
            Err(e) => {
                error!(stage = %stage, supplier = %supplier, "{}", e);
                if first.is_none() {
                    first = Some(e);
                }
            }
        }
    }

    match first {
        Some(e) => Err(e),
        None => Ok(outcomes),
    }
}
