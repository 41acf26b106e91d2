//! # Outcome Verifier
//!
//! Checks a successful migration receipt against the structural and economic
//! invariants of its `(family, mode)`:
//!
//! ```text
//! logs == 0 ───────────────────────────────▶ NoOp
//! logs ∉ admissible(family, mode) ──────────▶ StructuralFailure
//! family checks count only ─────────────────▶ StructureOnly
//! first event is `Migrated`, within the last two logs,
//! account == supplier ──────────────────────▶ economics
//! event ratio exact, queried ratio in band ─▶ Verified
//! ```
//!
//! ## Ratios
//!
//! Ratios are basis points: `round_half_up(10000 * v2 / v1)` in checked
//! `u128` arithmetic.
//!
//! | mode         | event ratio | queried V2 balance                           |
//! |--------------|-------------|----------------------------------------------|
//! | GasOptimized | == 9991     | rounded bp within 1 of the event bp          |
//! | Safe         | == 10000    | `10000 * queried >= 9999 * v1`, unrounded     |
//!
//! [`verify_outcome`] is a pure function of its inputs; [`OutcomeVerifier`]
//! adds the one remote read (the V2 balance query).

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use lmig_ledger::{
    Address, Amount, ContractFamily, LedgerClient, MalformedReceipt, MigratedEvent, MigrationMode,
    Receipt, MIGRATED_EVENT,
};

use crate::error::{call_with_timeout, PipelineError};
use crate::family::FamilyProfile;

pub const BP_DENOMINATOR: u128 = 10_000;
pub const GAS_OPTIMIZED_BP: u128 = 9_991;
pub const SAFE_BP: u128 = 10_000;
pub const SAFE_QUERIED_FLOOR_BP: u128 = 9_999;
pub const QUERIED_SLACK_BP: u128 = 1;
/// The `Migrated` event must sit within this many entries of the end.
pub const EVENT_TAIL_WINDOW: usize = 2;

// ════════════════════════════════════════════════════════════════════════════════
// FAILURES
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StructuralFailure {
    #[error("{family} receipt has {observed} logs, expected one of {admissible:?}")]
    UnexpectedLogCount {
        family: ContractFamily,
        observed: usize,
        admissible: Vec<usize>,
    },

    #[error("{family} migrator has no {mode} form")]
    UnsupportedMode { family: ContractFamily, mode: MigrationMode },

    #[error("receipt has logs but no decoded migration event")]
    MissingMigrationEvent,

    #[error("first decoded event is '{name}', expected '{}'", MIGRATED_EVENT)]
    UnexpectedEvent { name: String },

    #[error("migration event at log {log_index} of {log_count} is not within the last {}", EVENT_TAIL_WINDOW)]
    EventTooEarly { log_index: u32, log_count: usize },

    #[error("migration event account {observed} does not match supplier {expected}")]
    AccountMismatch { expected: Address, observed: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EconomicFailure {
    #[error("event ratio is {observed_bp} bp (v1 {underlying_v1}, v2 {underlying_v2}), expected {expected_bp} bp")]
    EventRatio {
        expected_bp: u128,
        observed_bp: u128,
        underlying_v1: Amount,
        underlying_v2: Amount,
    },

    #[error("queried ratio {queried_bp} bp differs from event ratio {event_bp} bp by more than {}", QUERIED_SLACK_BP)]
    QueriedRatio { event_bp: u128, queried_bp: u128 },

    #[error("queried V2 balance {queried} is below {floor_bp} bp of V1 {underlying_v1}")]
    QueriedBelowFloor {
        queried: Amount,
        underlying_v1: Amount,
        floor_bp: u128,
    },

    #[error("no post-migration V2 balance to compare against")]
    MissingQueriedBalance,

    #[error("ratio of {underlying_v2} to {underlying_v1} is not representable")]
    Overflow { underlying_v1: Amount, underlying_v2: Amount },
}

/// Failure of the pure verification, before it is attributed to a supplier.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error(transparent)]
    Structural(#[from] StructuralFailure),
    #[error(transparent)]
    Economic(#[from] EconomicFailure),
    #[error(transparent)]
    Malformed(#[from] MalformedReceipt),
}

impl VerificationError {
    pub fn attribute(self, supplier: Address, mode: MigrationMode) -> PipelineError {
        match self {
            Self::Structural(failure) => {
                PipelineError::StructuralVerificationFailure { supplier, mode, failure }
            }
            Self::Economic(failure) => PipelineError::EconomicInvariantFailure { supplier, mode, failure },
            Self::Malformed(error) => PipelineError::MalformedReceipt { supplier, error },
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// VERDICTS
// ════════════════════════════════════════════════════════════════════════════════

/// Outcome of the structural pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Structure {
    /// Empty log sequence: nothing moved.
    NoOp,
    /// Admissible log count; the family checks nothing further.
    CountOnly { log_count: usize },
    /// Admissible log count and a well-placed event for the right account.
    Event { log_count: usize, event: MigratedEvent },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    NoOp,
    StructureOnly {
        log_count: usize,
    },
    Verified {
        log_count: usize,
        underlying_v1: Amount,
        underlying_v2: Amount,
        queried_v2: Amount,
        event_bp: u128,
        queried_bp: u128,
    },
}

/// Event and queried ratios that passed the mode's band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ratios {
    pub event_bp: u128,
    pub queried_bp: u128,
}

// ════════════════════════════════════════════════════════════════════════════════
// PURE CHECKS
// ════════════════════════════════════════════════════════════════════════════════

/// `round_half_up(10000 * v2 / v1)`, or `None` if `v1` is zero or the
/// product overflows.
pub fn ratio_bp(v1: Amount, v2: Amount) -> Option<u128> {
    let v1 = v1.as_u128();
    if v1 == 0 {
        return None;
    }
    let scaled = v2.as_u128().checked_mul(BP_DENOMINATOR)?;
    let quotient = scaled / v1;
    let remainder = scaled % v1;
    if remainder >= v1 - remainder {
        quotient.checked_add(1)
    } else {
        Some(quotient)
    }
}

pub fn verify_structure(
    profile: &FamilyProfile,
    mode: MigrationMode,
    supplier: &Address,
    receipt: &Receipt,
) -> Result<Structure, VerificationError> {
    let log_count = receipt.log_count();
    if log_count == 0 {
        return Ok(Structure::NoOp);
    }

    let admissible = profile
        .admissible_log_counts(mode)
        .ok_or(StructuralFailure::UnsupportedMode { family: profile.family, mode })?;
    if !admissible.contains(&log_count) {
        return Err(StructuralFailure::UnexpectedLogCount {
            family: profile.family,
            observed: log_count,
            admissible: admissible.to_vec(),
        }
        .into());
    }

    if !profile.checks_migration_event {
        return Ok(Structure::CountOnly { log_count });
    }

    let raw = receipt.first_event().ok_or(StructuralFailure::MissingMigrationEvent)?;
    if raw.name != MIGRATED_EVENT {
        return Err(StructuralFailure::UnexpectedEvent { name: raw.name.clone() }.into());
    }
    let event = MigratedEvent::from_event(raw, log_count)?;

    if event.log_index as usize + EVENT_TAIL_WINDOW < log_count {
        return Err(StructuralFailure::EventTooEarly {
            log_index: event.log_index,
            log_count,
        }
        .into());
    }
    if event.account != *supplier {
        return Err(StructuralFailure::AccountMismatch {
            expected: *supplier,
            observed: event.account_text.clone(),
        }
        .into());
    }

    Ok(Structure::Event { log_count, event })
}

pub fn verify_economics(
    mode: MigrationMode,
    event: &MigratedEvent,
    queried_v2: Amount,
) -> Result<Ratios, EconomicFailure> {
    let v1 = event.underlying_v1;
    let overflow = |v2| EconomicFailure::Overflow { underlying_v1: v1, underlying_v2: v2 };

    let event_bp = ratio_bp(v1, event.underlying_v2).ok_or(overflow(event.underlying_v2))?;
    let queried_bp = ratio_bp(v1, queried_v2).ok_or(overflow(queried_v2))?;

    let expected_bp = match mode {
        MigrationMode::GasOptimized => GAS_OPTIMIZED_BP,
        MigrationMode::Safe => SAFE_BP,
    };
    if event_bp != expected_bp {
        return Err(EconomicFailure::EventRatio {
            expected_bp,
            observed_bp: event_bp,
            underlying_v1: v1,
            underlying_v2: event.underlying_v2,
        });
    }

    match mode {
        MigrationMode::GasOptimized => {
            if queried_bp.abs_diff(event_bp) > QUERIED_SLACK_BP {
                return Err(EconomicFailure::QueriedRatio { event_bp, queried_bp });
            }
        }
        MigrationMode::Safe => {
            let lhs = queried_v2
                .as_u128()
                .checked_mul(BP_DENOMINATOR)
                .ok_or(overflow(queried_v2))?;
            let rhs = v1
                .as_u128()
                .checked_mul(SAFE_QUERIED_FLOOR_BP)
                .ok_or(overflow(queried_v2))?;
            if lhs < rhs {
                return Err(EconomicFailure::QueriedBelowFloor {
                    queried: queried_v2,
                    underlying_v1: v1,
                    floor_bp: SAFE_QUERIED_FLOOR_BP,
                });
            }
        }
    }

    Ok(Ratios { event_bp, queried_bp })
}

/// Full verdict for one receipt. `queried_v2` is the supplier's V2
/// underlying balance read after the migration; it is only consulted when
/// the receipt carries an event to check.
pub fn verify_outcome(
    profile: &FamilyProfile,
    mode: MigrationMode,
    supplier: &Address,
    receipt: &Receipt,
    queried_v2: Option<Amount>,
) -> Result<Verdict, VerificationError> {
    match verify_structure(profile, mode, supplier, receipt)? {
        Structure::NoOp => Ok(Verdict::NoOp),
        Structure::CountOnly { log_count } => Ok(Verdict::StructureOnly { log_count }),
        Structure::Event { log_count, event } => {
            let queried = queried_v2.ok_or(EconomicFailure::MissingQueriedBalance)?;
            let ratios = verify_economics(mode, &event, queried)?;
            Ok(verified(log_count, &event, queried, ratios))
        }
    }
}

fn verified(log_count: usize, event: &MigratedEvent, queried_v2: Amount, ratios: Ratios) -> Verdict {
    Verdict::Verified {
        log_count,
        underlying_v1: event.underlying_v1,
        underlying_v2: event.underlying_v2,
        queried_v2,
        event_bp: ratios.event_bp,
        queried_bp: ratios.queried_bp,
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// VERIFIER
// ════════════════════════════════════════════════════════════════════════════════

pub struct OutcomeVerifier {
    client: Arc<dyn LedgerClient>,
    v2_contract: Address,
    timeout: Duration,
}

impl OutcomeVerifier {
    pub fn new(client: Arc<dyn LedgerClient>, v2_contract: Address, timeout: Duration) -> Self {
        Self { client, v2_contract, timeout }
    }

    pub async fn verify(
        &self,
        profile: &FamilyProfile,
        supplier: &Address,
        mode: MigrationMode,
        receipt: &Receipt,
    ) -> Result<Verdict, PipelineError> {
        let structure =
            verify_structure(profile, mode, supplier, receipt).map_err(|e| e.attribute(*supplier, mode))?;

        let (log_count, event) = match structure {
            Structure::NoOp => return Ok(Verdict::NoOp),
            Structure::CountOnly { log_count } => return Ok(Verdict::StructureOnly { log_count }),
            Structure::Event { log_count, event } => (log_count, event),
        };

        let queried = call_with_timeout(
            self.timeout,
            self.client.query_underlying_balance(&self.v2_contract, supplier),
        )
        .await
        .map_err(|cause| PipelineError::BalanceQueryFailure { supplier: *supplier, cause })?;

        let ratios = verify_economics(mode, &event, queried)
            .map_err(|e| VerificationError::from(e).attribute(*supplier, mode))?;

        debug!(
            supplier = %supplier,
            mode = %mode,
            event_bp = ratios.event_bp,
            queried_bp = ratios.queried_bp,
            "verified"
        );
        Ok(verified(log_count, &event, queried, ratios))
    }
}
