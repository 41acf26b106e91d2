//! Market enrollment: each authorized supplier enters the destination
//! market(s) before migrating.
//!
//! This is the one exclusion-tolerant write. A supplier whose enrollment
//! reverts, errors or times out is excluded with its cause and the batch
//! continues without it.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use lmig_ledger::{Address, LedgerClient};

use crate::error::{call_with_timeout, FailureCause};
use crate::family::FamilyProfile;
use crate::reconciler::Stage;
use crate::supplier::{ExclusionReason, MigrationContext};

pub struct MarketEnrollment {
    client: Arc<dyn LedgerClient>,
    markets: Vec<Address>,
    timeout: Duration,
}

impl MarketEnrollment {
    pub fn new(client: Arc<dyn LedgerClient>, markets: Vec<Address>, timeout: Duration) -> Self {
        Self { client, markets, timeout }
    }

    /// Enrolls one supplier. Impersonation is part of the attempt.
    pub async fn enroll(&self, supplier: &Address) -> Result<(), FailureCause> {
        call_with_timeout(self.timeout, self.client.impersonate(supplier)).await?;
        let receipt = call_with_timeout(self.timeout, self.client.enroll(supplier, &self.markets)).await?;
        if !receipt.is_success() {
            return Err(FailureCause::Reverted);
        }
        Ok(())
    }

    /// Runs the stage over every active supplier. Never fails the run.
    ///
    /// Returns `None` without touching the ledger when the family has no
    /// enrollment step; otherwise records and returns the enrolled count.
    pub async fn run(&self, profile: &FamilyProfile, ctx: &mut MigrationContext) -> Option<usize> {
        if !profile.requires_enrollment {
            debug!(family = %profile.family, "enrollment not required");
            return None;
        }

        let active = ctx.active();
        let results = join_all(
            active
                .iter()
                .map(|supplier| async move { (*supplier, self.enroll(supplier).await) }),
        )
        .await;

        let mut enrolled = 0;
        for (supplier, result) in results {
            match result {
                Ok(()) => enrolled += 1,
                Err(cause) => {
                    warn!(supplier = %supplier, "failed to enter market: {}", cause);
                    ctx.exclude(supplier, ExclusionReason::EnrollmentFailed { cause });
                }
            }
        }

        info!("{} accounts entered the destination market", enrolled);
        ctx.counts.record(Stage::Enrollment, enrolled);
        Some(enrolled)
    }
}
