//! Supplier lifecycle and exclusion state.
//!
//! ## Invariants
//!
//! 1. `ExclusionSet` is append-only: there is no removal API.
//! 2. A supplier's first exclusion reason is final; later inserts are no-ops.
//! 3. `Supplier::status` only moves `Eligible → Excluded(_)`.
//! 4. Stages mutate `MigrationContext` only after their fan-in barrier, from
//!    the single control task, so no locking is required.

use std::collections::HashMap;

use serde::Serialize;

use lmig_ledger::{Address, Amount, SupplierPopulation};

use crate::error::FailureCause;
use crate::reconciler::StageCounts;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExclusionReason {
    InsufficientFunds { available: Amount, required: Amount },
    EnrollmentFailed { cause: FailureCause },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplierStatus {
    Eligible,
    Excluded(ExclusionReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Supplier {
    pub address: Address,
    /// Snapshot taken during the eligibility check.
    pub available_funds: Option<Amount>,
    pub status: SupplierStatus,
}

impl Supplier {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            available_funds: None,
            status: SupplierStatus::Eligible,
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.status == SupplierStatus::Eligible
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exclusion {
    pub supplier: Address,
    #[serde(flatten)]
    pub reason: ExclusionReason,
}

/// Append-only set of excluded suppliers, in exclusion order.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ExclusionSet {
    entries: Vec<Exclusion>,
    /// Supplier → position in `entries`.
    #[serde(skip)]
    members: HashMap<Address, usize>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the supplier was already excluded; the original
    /// reason is kept.
    pub fn insert(&mut self, supplier: Address, reason: ExclusionReason) -> bool {
        if self.members.contains_key(&supplier) {
            return false;
        }
        self.members.insert(supplier, self.entries.len());
        self.entries.push(Exclusion { supplier, reason });
        true
    }

    pub fn contains(&self, supplier: &Address) -> bool {
        self.members.contains_key(supplier)
    }

    pub fn reason(&self, supplier: &Address) -> Option<&ExclusionReason> {
        self.members.get(supplier).map(|&i| &self.entries[i].reason)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Exclusion> {
        self.entries.iter()
    }

    pub fn insufficient_funds_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.reason, ExclusionReason::InsufficientFunds { .. }))
            .count()
    }

    pub fn enrollment_failed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.reason, ExclusionReason::EnrollmentFailed { .. }))
            .count()
    }
}

/// Mutable state of one pipeline run.
#[derive(Debug, Clone)]
pub struct MigrationContext {
    suppliers: Vec<Supplier>,
    /// Address → position in `suppliers`.
    index: HashMap<Address, usize>,
    exclusions: ExclusionSet,
    pub counts: StageCounts,
}

impl MigrationContext {
    pub fn new(population: &SupplierPopulation) -> Self {
        let suppliers: Vec<Supplier> = population.suppliers().iter().map(|a| Supplier::new(*a)).collect();
        let index = suppliers.iter().enumerate().map(|(i, s)| (s.address, i)).collect();
        Self {
            suppliers,
            index,
            exclusions: ExclusionSet::new(),
            counts: StageCounts::new(),
        }
    }

    pub fn population_size(&self) -> usize {
        self.suppliers.len()
    }

    pub fn suppliers(&self) -> &[Supplier] {
        &self.suppliers
    }

    pub fn exclusions(&self) -> &ExclusionSet {
        &self.exclusions
    }

    /// Suppliers not excluded so far, in population order.
    pub fn active(&self) -> Vec<Address> {
        self.suppliers
            .iter()
            .filter(|s| s.is_eligible())
            .map(|s| s.address)
            .collect()
    }

    pub fn is_excluded(&self, supplier: &Address) -> bool {
        self.exclusions.contains(supplier)
    }

    /// Excludes a supplier. No-op for unknown or already-excluded suppliers.
    pub fn exclude(&mut self, supplier: Address, reason: ExclusionReason) -> bool {
        let Some(&i) = self.index.get(&supplier) else {
            return false;
        };
        if !self.exclusions.insert(supplier, reason.clone()) {
            return false;
        }
        self.suppliers[i].status = SupplierStatus::Excluded(reason);
        true
    }

    pub fn record_funds(&mut self, supplier: &Address, funds: Amount) {
        if let Some(&i) = self.index.get(supplier) {
            self.suppliers[i].available_funds = Some(funds);
        }
    }

    pub(crate) fn into_parts(self) -> (Vec<Supplier>, ExclusionSet, StageCounts) {
        (self.suppliers, self.exclusions, self.counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funds_reason() -> ExclusionReason {
        ExclusionReason::InsufficientFunds {
            available: Amount(1),
            required: Amount(2),
        }
    }

    fn enroll_reason() -> ExclusionReason {
        ExclusionReason::EnrollmentFailed { cause: FailureCause::Reverted }
    }

    fn population() -> SupplierPopulation {
        SupplierPopulation::new(vec![Address([1; 20]), Address([2; 20]), Address([3; 20])]).unwrap()
    }

    #[test]
    fn test_first_reason_wins() {
        let mut set = ExclusionSet::new();
        let a = Address([1; 20]);
        assert!(set.insert(a, funds_reason()));
        assert!(!set.insert(a, enroll_reason()));
        assert_eq!(set.len(), 1);
        assert_eq!(set.reason(&a), Some(&funds_reason()));
    }

    #[test]
    fn test_context_exclusion_is_monotonic() {
        let mut ctx = MigrationContext::new(&population());
        let b = Address([2; 20]);

        assert_eq!(ctx.active().len(), 3);
        assert!(ctx.exclude(b, enroll_reason()));
        assert!(!ctx.exclude(b, funds_reason()));

        assert_eq!(ctx.active(), vec![Address([1; 20]), Address([3; 20])]);
        let entry = ctx.suppliers().iter().find(|s| s.address == b).unwrap();
        assert_eq!(entry.status, SupplierStatus::Excluded(enroll_reason()));
        assert_eq!(ctx.exclusions().enrollment_failed_count(), 1);
        assert_eq!(ctx.exclusions().insufficient_funds_count(), 0);
    }

    #[test]
    fn test_unknown_supplier_not_excluded() {
        let mut ctx = MigrationContext::new(&population());
        assert!(!ctx.exclude(Address([9; 20]), funds_reason()));
        assert!(ctx.exclusions().is_empty());
    }

    #[test]
    fn test_exclusions_serialize_flat() {
        let mut set = ExclusionSet::new();
        set.insert(Address([1; 20]), funds_reason());
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json[0]["reason"], "insufficient_funds");
        assert_eq!(json[0]["available"], 1);
    }

    #[test]
    fn test_large_population_updates_the_right_entry() {
        let addresses: Vec<Address> = (0..5_000u32)
            .map(|i| {
                let mut b = [0u8; 20];
                b[16..].copy_from_slice(&i.to_be_bytes());
                Address(b)
            })
            .collect();
        let mut ctx = MigrationContext::new(&SupplierPopulation::new(addresses.clone()).unwrap());

        for (i, a) in addresses.iter().enumerate() {
            if i % 3 == 0 {
                assert!(ctx.exclude(*a, funds_reason()));
            } else {
                ctx.record_funds(a, Amount(i as u128));
            }
        }

        assert_eq!(ctx.exclusions().len(), 1_667);
        assert_eq!(ctx.active().len(), 3_333);
        assert_eq!(ctx.exclusions().reason(&addresses[4_998]), Some(&funds_reason()));
        assert_eq!(ctx.exclusions().reason(&addresses[4_999]), None);
        assert_eq!(ctx.suppliers()[4_999].available_funds, Some(Amount(4_999)));
        assert_eq!(ctx.suppliers()[4_998].available_funds, None);
        assert!(!ctx.suppliers()[4_998].is_eligible());
        assert_eq!(ctx.exclusions().iter().nth(1).map(|e| e.supplier), Some(addresses[3]));
    }
}
