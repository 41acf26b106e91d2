//! Eligibility filter: skip suppliers who cannot pay for their own
//! transactions. Read-only; never issues a write for an excluded supplier.

use std::sync::Arc;
use std::time::Duration;

use lmig_ledger::{Address, Amount, LedgerClient};

use crate::error::{call_with_timeout, PipelineError};
use crate::supplier::ExclusionReason;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible { available: Amount },
    Excluded(ExclusionReason),
}

pub struct EligibilityFilter {
    client: Arc<dyn LedgerClient>,
    min_available_funds: Amount,
    timeout: Duration,
}

impl EligibilityFilter {
    pub fn new(client: Arc<dyn LedgerClient>, min_available_funds: Amount, timeout: Duration) -> Self {
        Self { client, min_available_funds, timeout }
    }

    /// Classifies one supplier. Strictly below the threshold is excluded.
    pub async fn check(&self, supplier: &Address) -> Result<Eligibility, PipelineError> {
        let available = call_with_timeout(self.timeout, self.client.query_available_funds(supplier))
            .await
            .map_err(|cause| PipelineError::EligibilityQueryFailure { supplier: *supplier, cause })?;

        if available < self.min_available_funds {
            return Ok(Eligibility::Excluded(ExclusionReason::InsufficientFunds {
                available,
                required: self.min_available_funds,
            }));
        }
        Ok(Eligibility::Eligible { available })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmig_ledger::{Operation, SimulatedLedger, SimulationContracts};

    fn ledger() -> Arc<SimulatedLedger> {
        Arc::new(SimulatedLedger::new(SimulationContracts {
            v1: Address([1; 20]),
            v2: Address([2; 20]),
            migrator: Address([3; 20]),
        }))
    }

    #[tokio::test]
    async fn test_threshold_boundary() {
        let ledger = ledger();
        let rich = Address([0x10; 20]);
        let exact = Address([0x11; 20]);
        let poor = Address([0x12; 20]);
        ledger.add_supplier(rich, Amount(200), Amount(1));
        ledger.add_supplier(exact, Amount(150), Amount(1));
        ledger.add_supplier(poor, Amount(149), Amount(1));

        let filter = EligibilityFilter::new(ledger.clone(), Amount(150), Duration::from_secs(1));

        assert_eq!(filter.check(&rich).await, Ok(Eligibility::Eligible { available: Amount(200) }));
        assert_eq!(filter.check(&exact).await, Ok(Eligibility::Eligible { available: Amount(150) }));
        assert_eq!(
            filter.check(&poor).await,
            Ok(Eligibility::Excluded(ExclusionReason::InsufficientFunds {
                available: Amount(149),
                required: Amount(150),
            }))
        );
        assert_eq!(ledger.total_calls(Operation::Authorize), 0);
    }

    #[tokio::test]
    async fn test_query_failure_is_hard() {
        let filter = EligibilityFilter::new(ledger(), Amount(1), Duration::from_secs(1));
        let unknown = Address([0x99; 20]);
        assert!(matches!(
            filter.check(&unknown).await,
            Err(PipelineError::EligibilityQueryFailure { supplier, .. }) if supplier == unknown
        ));
    }
}
