//! Per-stage success counts and the cross-stage count invariant.
//!
//! Every supplier that reaches the migration stage must migrate. A
//! divergence between the count that entered and the count that migrated is
//! never a tolerated partial failure; it signals a logic or environment
//! defect and fails the run.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{error, info};

use crate::error::PipelineError;
use crate::family::FamilyProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Stage {
    #[serde(rename = "eligible")]
    Eligibility,
    #[serde(rename = "authorized")]
    Authorization,
    #[serde(rename = "enrolled")]
    Enrollment,
    #[serde(rename = "migrated")]
    Migration,
}

impl Stage {
    /// Count key, as used in logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Eligibility => "eligible",
            Stage::Authorization => "authorized",
            Stage::Enrollment => "enrolled",
            Stage::Migration => "migrated",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successes per stage, among suppliers not excluded before that stage.
/// A stage that did not run has no entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StageCounts {
    counts: BTreeMap<Stage, usize>,
}

impl StageCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: Stage, successes: usize) {
        self.counts.insert(stage, successes);
    }

    pub fn get(&self, stage: Stage) -> Option<usize> {
        self.counts.get(&stage).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stage, usize)> + '_ {
        self.counts.iter().map(|(s, n)| (*s, *n))
    }
}

/// Stage whose success count the migration count must equal.
pub fn reconciliation_baseline(profile: &FamilyProfile) -> Stage {
    if profile.requires_enrollment {
        Stage::Enrollment
    } else {
        Stage::Authorization
    }
}

/// Asserts `migrated == <baseline>` and returns the agreed count.
pub fn reconcile(counts: &StageCounts, profile: &FamilyProfile) -> Result<usize, PipelineError> {
    let expected_stage = reconciliation_baseline(profile);
    let expected = counts.get(expected_stage).unwrap_or(0);
    let migrated = counts.get(Stage::Migration).unwrap_or(0);

    if migrated != expected {
        error!(
            expected_stage = %expected_stage,
            expected,
            migrated,
            "stage counts diverge"
        );
        return Err(PipelineError::ReconciliationFailure {
            expected_stage,
            expected,
            migrated,
        });
    }

    info!("{} accounts were migrated", migrated);
    Ok(migrated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmig_ledger::ContractFamily;

    #[test]
    fn test_reconcile_matching_counts() {
        let mut counts = StageCounts::new();
        counts.record(Stage::Authorization, 5);
        counts.record(Stage::Enrollment, 4);
        counts.record(Stage::Migration, 4);

        let generic = FamilyProfile::for_family(ContractFamily::Generic);
        assert_eq!(reconcile(&counts, generic), Ok(4));
    }

    #[test]
    fn test_reconcile_mismatch_is_fatal() {
        let mut counts = StageCounts::new();
        counts.record(Stage::Enrollment, 4);
        counts.record(Stage::Migration, 3);

        let generic = FamilyProfile::for_family(ContractFamily::Generic);
        assert_eq!(
            reconcile(&counts, generic),
            Err(PipelineError::ReconciliationFailure {
                expected_stage: Stage::Enrollment,
                expected: 4,
                migrated: 3,
            })
        );
    }

    #[test]
    fn test_single_form_family_reconciles_against_authorized() {
        let mut counts = StageCounts::new();
        counts.record(Stage::Authorization, 2);
        counts.record(Stage::Migration, 2);

        let wrapped = FamilyProfile::for_family(ContractFamily::WrappedAsset);
        assert_eq!(reconciliation_baseline(wrapped), Stage::Authorization);
        assert_eq!(reconcile(&counts, wrapped), Ok(2));
    }

    #[test]
    fn test_counts_serialize_by_name() {
        let mut counts = StageCounts::new();
        counts.record(Stage::Enrollment, 1);
        counts.record(Stage::Migration, 1);
        let json = serde_json::to_string(&counts).unwrap();
        assert_eq!(json, r#"{"enrolled":1,"migrated":1}"#);
    }
}
