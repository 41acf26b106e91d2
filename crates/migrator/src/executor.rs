//! Migration executor: funds the migrator contract once per batch, then
//! issues one migrate call per supplier.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use lmig_ledger::{Address, Amount, ContractFamily, LedgerClient, MigrationMode, Receipt};

use crate::error::{call_with_timeout, FailureCause, PipelineError};
use crate::family::FamilyProfile;

// ════════════════════════════════════════════════════════════════════════════════
// FUNDING
// ════════════════════════════════════════════════════════════════════════════════

pub struct ExecutorFunding {
    client: Arc<dyn LedgerClient>,
    executor: Address,
    amount: Option<Amount>,
    timeout: Duration,
}

impl ExecutorFunding {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        executor: Address,
        amount: Option<Amount>,
        timeout: Duration,
    ) -> Self {
        Self { client, executor, amount, timeout }
    }

    /// Tops up the executor. Returns the amount sent, or `None` when the
    /// family needs no funding, none is configured, or nobody is left to
    /// migrate.
    pub async fn fund(
        &self,
        profile: &FamilyProfile,
        active_suppliers: usize,
    ) -> Result<Option<Amount>, PipelineError> {
        let amount = match self.amount {
            Some(a) if profile.requires_executor_funding && active_suppliers > 0 && !a.is_zero() => a,
            _ => return Ok(None),
        };

        let fail = |cause| PipelineError::FundingFailure { executor: self.executor, cause };
        let receipt = call_with_timeout(self.timeout, self.client.fund_executor(&self.executor, amount))
            .await
            .map_err(fail)?;
        if !receipt.is_success() {
            return Err(fail(FailureCause::Reverted));
        }

        info!(executor = %self.executor, amount = %amount, "funded executor");
        Ok(Some(amount))
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// EXECUTION
// ════════════════════════════════════════════════════════════════════════════════

pub struct MigrationExecutor {
    client: Arc<dyn LedgerClient>,
    family: ContractFamily,
    timeout: Duration,
}

impl MigrationExecutor {
    pub fn new(client: Arc<dyn LedgerClient>, family: ContractFamily, timeout: Duration) -> Self {
        Self { client, family, timeout }
    }

    /// Migrates one supplier and returns the successful receipt. Anything
    /// other than a success receipt is a hard failure.
    pub async fn execute(&self, supplier: &Address, mode: MigrationMode) -> Result<Receipt, PipelineError> {
        let fail = |cause| PipelineError::MigrationExecutionFailure { supplier: *supplier, mode, cause };

        let receipt = call_with_timeout(self.timeout, self.client.migrate(supplier, self.family, mode))
            .await
            .map_err(fail)?;
        if !receipt.is_success() {
            return Err(fail(FailureCause::Reverted));
        }

        debug!(supplier = %supplier, mode = %mode, logs = receipt.log_count(), "migrated");
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmig_ledger::{Fault, Operation, SimulatedLedger, SimulationContracts};

    const MIGRATOR: Address = Address([3; 20]);

    fn ledger() -> Arc<SimulatedLedger> {
        Arc::new(SimulatedLedger::new(SimulationContracts {
            v1: Address([1; 20]),
            v2: Address([2; 20]),
            migrator: MIGRATOR,
        }))
    }

    #[tokio::test]
    async fn test_funding_rules() {
        let ledger = ledger();
        let timeout = Duration::from_millis(100);
        let generic = FamilyProfile::for_family(ContractFamily::Generic);
        let wrapped = FamilyProfile::for_family(ContractFamily::WrappedAsset);

        let funding = ExecutorFunding::new(ledger.clone(), MIGRATOR, Some(Amount(1000)), timeout);
        assert_eq!(funding.fund(wrapped, 3).await, Ok(None));
        assert_eq!(funding.fund(generic, 0).await, Ok(None));
        assert_eq!(ledger.total_calls(Operation::FundExecutor), 0);

        assert_eq!(funding.fund(generic, 3).await, Ok(Some(Amount(1000))));
        assert_eq!(ledger.executor_funds(), Amount(1000));

        let unconfigured = ExecutorFunding::new(ledger.clone(), MIGRATOR, None, timeout);
        assert_eq!(unconfigured.fund(generic, 3).await, Ok(None));
    }

    #[tokio::test]
    async fn test_funding_failure_is_hard() {
        let wrong = Address([9; 20]);
        let funding = ExecutorFunding::new(ledger(), wrong, Some(Amount(5)), Duration::from_millis(100));
        let generic = FamilyProfile::for_family(ContractFamily::Generic);
        assert!(matches!(
            funding.fund(generic, 1).await,
            Err(PipelineError::FundingFailure { executor, .. }) if executor == wrong
        ));
    }

    #[tokio::test]
    async fn test_execute_revert_and_hang() {
        let ledger = ledger();
        let reverted = Address([0x70; 20]);
        let hung = Address([0x71; 20]);
        ledger.add_supplier(reverted, Amount(1), Amount(10));
        ledger.add_supplier(hung, Amount(1), Amount(10));
        ledger.inject_fault(&reverted, Fault::RevertMigrate);
        ledger.inject_fault(&hung, Fault::HangMigrate);

        let exec = MigrationExecutor::new(ledger.clone(), ContractFamily::Generic, Duration::from_millis(50));
        assert_eq!(
            exec.execute(&reverted, MigrationMode::Safe).await,
            Err(PipelineError::MigrationExecutionFailure {
                supplier: reverted,
                mode: MigrationMode::Safe,
                cause: FailureCause::Reverted,
            })
        );
        assert_eq!(
            exec.execute(&hung, MigrationMode::GasOptimized).await,
            Err(PipelineError::MigrationExecutionFailure {
                supplier: hung,
                mode: MigrationMode::GasOptimized,
                cause: FailureCause::TimedOut { after_ms: 50 },
            })
        );
    }

    #[tokio::test]
    async fn test_execute_zero_balance_is_empty_success() {
        let ledger = ledger();
        let empty = Address([0x72; 20]);
        ledger.add_supplier(empty, Amount(1), Amount(0));

        let exec = MigrationExecutor::new(ledger, ContractFamily::Generic, Duration::from_millis(50));
        let receipt = exec.execute(&empty, MigrationMode::Safe).await.unwrap();
        assert!(receipt.is_success());
        assert_eq!(receipt.log_count(), 0);
    }
}
