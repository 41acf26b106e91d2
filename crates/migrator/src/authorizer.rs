//! # AllowanceAuthorizer: Eligibility + Authorization Stage
//!
//! For every supplier, concurrently:
//!
//! ```text
//! query available funds ──< threshold──▶ Excluded(InsufficientFunds)
//!      │
//!      ▼ (eligible)
//! impersonate ─▶ authorize(migrator, unlimited) ─▶ status must be success
//! ```
//!
//! Authorization failures are hard. Unlike enrollment, they are not part of
//! the exclusion-tolerant path: a supplier that passed the funds check is
//! expected to authorize.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info};

use lmig_ledger::{Address, Amount, LedgerClient};

use crate::eligibility::{Eligibility, EligibilityFilter};
use crate::error::{call_with_timeout, collect_stage_results, FailureCause, PipelineError};
use crate::reconciler::Stage;
use crate::supplier::{ExclusionReason, MigrationContext};

pub struct AllowanceAuthorizer {
    client: Arc<dyn LedgerClient>,
    spender: Address,
    timeout: Duration,
}

enum AuthorizationOutcome {
    Authorized { available: Amount },
    Excluded(ExclusionReason),
}

impl AllowanceAuthorizer {
    pub fn new(client: Arc<dyn LedgerClient>, spender: Address, timeout: Duration) -> Self {
        Self { client, spender, timeout }
    }

    /// Grants the spender unlimited transfer rights, acting as the supplier.
    pub async fn authorize(&self, supplier: &Address) -> Result<(), PipelineError> {
        let fail = |cause| PipelineError::AuthorizationFailure { supplier: *supplier, cause };

        call_with_timeout(self.timeout, self.client.impersonate(supplier))
            .await
            .map_err(fail)?;

        let receipt = call_with_timeout(
            self.timeout,
            self.client.authorize(supplier, &self.spender, Amount::MAX),
        )
        .await
        .map_err(fail)?;

        if !receipt.is_success() {
            return Err(fail(FailureCause::Reverted));
        }
        debug!(supplier = %supplier, spender = %self.spender, "authorized");
        Ok(())
    }

    async fn check_and_authorize(
        &self,
        filter: &EligibilityFilter,
        supplier: &Address,
    ) -> Result<AuthorizationOutcome, PipelineError> {
        match filter.check(supplier).await? {
            Eligibility::Eligible { available } => {
                self.authorize(supplier).await?;
                Ok(AuthorizationOutcome::Authorized { available })
            }
            Eligibility::Excluded(reason) => Ok(AuthorizationOutcome::Excluded(reason)),
        }
    }

    /// Runs the stage over every active supplier. Records the eligible and
    /// authorized counts; returns the authorized count.
    pub async fn run(
        &self,
        filter: &EligibilityFilter,
        ctx: &mut MigrationContext,
    ) -> Result<usize, PipelineError> {
        let active = ctx.active();
        let results = join_all(
            active.iter().map(|supplier| async move {
                (*supplier, self.check_and_authorize(filter, supplier).await)
            }),
        )
        .await;

        // Barrier reached: apply outcomes in population order.
        let outcomes = collect_stage_results(Stage::Authorization, results)?;

        let mut authorized = 0;
        for (supplier, outcome) in outcomes {
            match outcome {
                AuthorizationOutcome::Authorized { available } => {
                    ctx.record_funds(&supplier, available);
                    authorized += 1;
                }
                AuthorizationOutcome::Excluded(reason) => {
                    debug!(supplier = %supplier, ?reason, "excluded");
                    ctx.exclude(supplier, reason);
                }
            }
        }

        info!(
            "skipping {} out of {} suppliers because they have insufficient funds",
            ctx.exclusions().insufficient_funds_count(),
            ctx.population_size()
        );
        ctx.counts.record(Stage::Eligibility, authorized);
        ctx.counts.record(Stage::Authorization, authorized);
        Ok(authorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmig_ledger::{Fault, Operation, SimulatedLedger, SimulationContracts, SupplierPopulation};

    const MIGRATOR: Address = Address([3; 20]);

    fn setup(funds: &[u128]) -> (Arc<SimulatedLedger>, Vec<Address>) {
        let ledger = Arc::new(SimulatedLedger::new(SimulationContracts {
            v1: Address([1; 20]),
            v2: Address([2; 20]),
            migrator: MIGRATOR,
        }));
        let suppliers: Vec<Address> = (0..funds.len())
            .map(|i| Address([0x40 + i as u8; 20]))
            .collect();
        for (s, f) in suppliers.iter().zip(funds) {
            ledger.add_supplier(*s, Amount(*f), Amount(1_000));
        }
        (ledger, suppliers)
    }

    fn stage(ledger: &Arc<SimulatedLedger>) -> (EligibilityFilter, AllowanceAuthorizer) {
        let timeout = Duration::from_millis(200);
        (
            EligibilityFilter::new(ledger.clone(), Amount(100), timeout),
            AllowanceAuthorizer::new(ledger.clone(), MIGRATOR, timeout),
        )
    }

    #[tokio::test]
    async fn test_poor_supplier_never_authorizes() {
        let (ledger, suppliers) = setup(&[500, 99, 100]);
        let (filter, authorizer) = stage(&ledger);
        let mut ctx = MigrationContext::new(&SupplierPopulation::new(suppliers.clone()).unwrap());

        let authorized = authorizer.run(&filter, &mut ctx).await.unwrap();

        assert_eq!(authorized, 2);
        assert!(ctx.is_excluded(&suppliers[1]));
        assert_eq!(ledger.call_count(Operation::Authorize, &suppliers[1]), 0);
        assert_eq!(ledger.call_count(Operation::Impersonate, &suppliers[1]), 0);
        assert_eq!(ledger.call_count(Operation::Authorize, &suppliers[0]), 1);
        assert_eq!(ctx.counts.get(Stage::Authorization), Some(2));
        assert_eq!(ctx.active(), vec![suppliers[0], suppliers[2]]);
        assert_eq!(ctx.suppliers()[0].available_funds, Some(Amount(500)));
    }

    #[tokio::test]
    async fn test_revert_is_fatal_and_first_in_order_wins() {
        let (ledger, suppliers) = setup(&[500, 500, 500]);
        ledger.inject_fault(&suppliers[2], Fault::RevertAuthorize);
        ledger.inject_fault(&suppliers[1], Fault::RevertAuthorize);
        let (filter, authorizer) = stage(&ledger);
        let mut ctx = MigrationContext::new(&SupplierPopulation::new(suppliers.clone()).unwrap());

        let err = authorizer.run(&filter, &mut ctx).await.unwrap_err();

        assert_eq!(
            err,
            PipelineError::AuthorizationFailure {
                supplier: suppliers[1],
                cause: FailureCause::Reverted,
            }
        );
        // Every supplier was still attempted before the barrier.
        assert_eq!(ledger.total_calls(Operation::Authorize), 3);
        assert_eq!(ctx.counts.get(Stage::Authorization), None);
    }

    #[tokio::test]
    async fn test_hang_times_out() {
        let (ledger, suppliers) = setup(&[500]);
        ledger.inject_fault(&suppliers[0], Fault::HangAuthorize);
        let (_, authorizer) = stage(&ledger);

        let err = authorizer.authorize(&suppliers[0]).await.unwrap_err();
        assert_eq!(
            err,
            PipelineError::AuthorizationFailure {
                supplier: suppliers[0],
                cause: FailureCause::TimedOut { after_ms: 200 },
            }
        );
    }
}
