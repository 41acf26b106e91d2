//! Simulated Ledger Backend
//!
//! Fully in-memory [`LedgerClient`] that models the V1 ledger, the V2
//! ledger, the market-enrollment contract and the migrator. No network.
//!
//! # Features
//!
//! - Deterministic receipts: log counts follow the admissible buckets of
//!   each contract family, and gas-optimized migrations lose exactly 9 bp.
//! - Per-call counters, for asserting which remote calls a run issued.
//! - Per-supplier fault injection (reverts, transport errors, hangs,
//!   malformed or off-shape receipts).
//! - Optional latency simulation (async, non-blocking).
//!
//! # Model
//!
//! - `authorize` records an allowance for the spender.
//! - `enroll` records market membership.
//! - Generic-family migrations require enrollment in the V2 market and
//!   consume one unit of executor funds each.
//! - A migration moves the whole V1 balance; a zero balance yields a
//!   successful receipt with no logs.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::client::{ClientError, LedgerClient};
use crate::receipt::{migrated_event, LogEntry, Receipt, ReceiptStatus};
use crate::types::{Address, Amount, ContractFamily, MigrationMode};

/// Value retained by a gas-optimized migration, in basis points.
pub const GAS_OPTIMIZED_RETAINED_BP: u128 = 9991;

/// Executor funds consumed per generic-family migration.
pub const EXECUTOR_COST_PER_MIGRATION: u128 = 1;

// ════════════════════════════════════════════════════════════════════════════
// SUPPORTING TYPES
// ════════════════════════════════════════════════════════════════════════════

/// Remote operation kind, used as a call-counter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Impersonate,
    Authorize,
    Enroll,
    Migrate,
    FundExecutor,
    QueryUnderlying,
    QueryFunds,
}

/// Injected misbehaviour for one supplier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// `authorize` returns a failed receipt.
    RevertAuthorize,
    /// `authorize` never resolves.
    HangAuthorize,
    /// `enroll` returns a failed receipt.
    RevertEnroll,
    /// `enroll` fails with a transport error.
    EnrollTransportError,
    /// `enroll` never resolves.
    HangEnroll,
    /// `migrate` returns a failed receipt.
    RevertMigrate,
    /// `migrate` never resolves.
    HangMigrate,
    /// The migration receipt carries exactly this many logs.
    MigrateLogCount(usize),
    /// The `Migrated` event reports this account instead of the supplier.
    MigratedEventAccount(Address),
    /// The `Migrated` event is placed at log index 0.
    MigratedEventFirst,
    /// No decoded events are returned.
    DropMigratedEvent,
    /// The `Migrated` event reports this V2 amount; state is unaffected.
    ReportedUnderlyingV2(Amount),
    /// The queried V2 balance is this many basis points short of the
    /// credited amount.
    QueriedShortfallBp(u128),
}

/// Contract addresses the simulation answers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationContracts {
    pub v1: Address,
    pub v2: Address,
    pub migrator: Address,
}

#[derive(Debug, Clone, Default)]
struct SupplierAccount {
    available_funds: Amount,
    v1_underlying: Amount,
    v2_underlying: Amount,
    allowances: HashMap<Address, Amount>,
    markets: HashSet<Address>,
    impersonated: bool,
    faults: Vec<Fault>,
}

impl SupplierAccount {
    fn has(&self, fault: &Fault) -> bool {
        self.faults.iter().any(|f| f == fault)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// SIMULATED LEDGER
// ════════════════════════════════════════════════════════════════════════════

pub struct SimulatedLedger {
    contracts: SimulationContracts,
    accounts: RwLock<HashMap<Address, SupplierAccount>>,
    executor_funds: Mutex<Amount>,
    calls: Mutex<HashMap<(Operation, Address), usize>>,
    latency_ms: u64,
}

impl std::fmt::Debug for SimulatedLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedLedger")
            .field("contracts", &self.contracts)
            .field("accounts", &self.accounts.read().len())
            .field("executor_funds", &*self.executor_funds.lock())
            .field("latency_ms", &self.latency_ms)
            .finish()
    }
}

impl SimulatedLedger {
    pub fn new(contracts: SimulationContracts) -> Self {
        Self {
            contracts,
            accounts: RwLock::new(HashMap::new()),
            executor_funds: Mutex::new(Amount::zero()),
            calls: Mutex::new(HashMap::new()),
            latency_ms: 0,
        }
    }

    /// Same as [`new`](Self::new) with simulated latency on every call.
    pub fn with_latency(contracts: SimulationContracts, ms: u64) -> Self {
        Self {
            latency_ms: ms,
            ..Self::new(contracts)
        }
    }

    pub fn contracts(&self) -> &SimulationContracts {
        &self.contracts
    }

    // ── Test helpers ─────────────────────────────────────────────────────

    /// Registers (or resets) a supplier.
    pub fn add_supplier(&self, supplier: Address, available_funds: Amount, v1_underlying: Amount) {
        self.accounts.write().insert(
            supplier,
            SupplierAccount {
                available_funds,
                v1_underlying,
                ..SupplierAccount::default()
            },
        );
    }

    /// Adds a fault for a registered supplier. Unknown suppliers are ignored.
    pub fn inject_fault(&self, supplier: &Address, fault: Fault) {
        if let Some(acct) = self.accounts.write().get_mut(supplier) {
            acct.faults.push(fault);
        }
    }

    pub fn call_count(&self, op: Operation, subject: &Address) -> usize {
        self.calls.lock().get(&(op, *subject)).copied().unwrap_or(0)
    }

    pub fn total_calls(&self, op: Operation) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|((o, _), _)| *o == op)
            .map(|(_, n)| *n)
            .sum()
    }

    pub fn v1_balance(&self, supplier: &Address) -> Option<Amount> {
        self.accounts.read().get(supplier).map(|a| a.v1_underlying)
    }

    pub fn v2_balance(&self, supplier: &Address) -> Option<Amount> {
        self.accounts.read().get(supplier).map(|a| a.v2_underlying)
    }

    pub fn is_enrolled(&self, supplier: &Address, market: &Address) -> bool {
        self.accounts
            .read()
            .get(supplier)
            .map(|a| a.markets.contains(market))
            .unwrap_or(false)
    }

    pub fn executor_funds(&self) -> Amount {
        *self.executor_funds.lock()
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn record(&self, op: Operation, subject: &Address) {
        *self.calls.lock().entry((op, *subject)).or_insert(0) += 1;
    }

    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;
        }
    }

    fn has_fault(&self, supplier: &Address, fault: &Fault) -> bool {
        self.accounts
            .read()
            .get(supplier)
            .map(|a| a.has(fault))
            .unwrap_or(false)
    }

    fn require_impersonated(&self, supplier: &Address) -> Result<(), ClientError> {
        match self.accounts.read().get(supplier) {
            Some(acct) if acct.impersonated => Ok(()),
            _ => Err(ClientError::UnknownAccount(*supplier)),
        }
    }

    /// Log count for a successful, non-empty migration.
    fn structural_log_count(supplier: &Address, family: ContractFamily, mode: MigrationMode) -> usize {
        // The low address bit decides whether the longer path (extra
        // interest-accrual logs) is taken, so both buckets show up.
        let long_path = supplier.0[19] & 1 == 1;
        match (family, mode) {
            (ContractFamily::Generic, MigrationMode::GasOptimized) => if long_path { 27 } else { 25 },
            (ContractFamily::Generic, MigrationMode::Safe) => 37,
            (ContractFamily::WrappedAsset, _) => if long_path { 25 } else { 23 },
        }
    }

    fn migrated_amount(v1: Amount, family: ContractFamily, mode: MigrationMode) -> Amount {
        match (family, mode) {
            (ContractFamily::Generic, MigrationMode::Safe) => v1,
            _ => Amount(v1.as_u128() / 10_000 * GAS_OPTIMIZED_RETAINED_BP
                + v1.as_u128() % 10_000 * GAS_OPTIMIZED_RETAINED_BP / 10_000),
        }
    }

    fn build_migration_receipt(
        &self,
        supplier: &Address,
        acct: &SupplierAccount,
        family: ContractFamily,
        mode: MigrationMode,
        v1: Amount,
        v2: Amount,
    ) -> Receipt {
        let count = acct
            .faults
            .iter()
            .find_map(|f| match f {
                Fault::MigrateLogCount(n) => Some(*n),
                _ => None,
            })
            .unwrap_or_else(|| Self::structural_log_count(supplier, family, mode));

        let logs: Vec<LogEntry> = (0..count)
            .map(|i| LogEntry {
                index: i as u32,
                emitter: match i % 3 {
                    0 => self.contracts.v1,
                    1 => self.contracts.v2,
                    _ => self.contracts.migrator,
                },
            })
            .collect();

        if count == 0 || acct.has(&Fault::DropMigratedEvent) {
            return Receipt { status: ReceiptStatus::Success, logs, events: Vec::new() };
        }

        // Safe mode emits one trailing log after the event.
        let event_index = if acct.has(&Fault::MigratedEventFirst) {
            0
        } else if mode == MigrationMode::Safe && count >= 2 {
            count - 2
        } else {
            count - 1
        };
        let account = acct
            .faults
            .iter()
            .find_map(|f| match f {
                Fault::MigratedEventAccount(a) => Some(*a),
                _ => None,
            })
            .unwrap_or(*supplier);
        let reported_v2 = acct
            .faults
            .iter()
            .find_map(|f| match f {
                Fault::ReportedUnderlyingV2(a) => Some(*a),
                _ => None,
            })
            .unwrap_or(v2);

        Receipt {
            status: ReceiptStatus::Success,
            logs,
            events: vec![migrated_event(event_index as u32, &account, v1, reported_v2)],
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// LEDGER CLIENT IMPLEMENTATION
// ════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn impersonate(&self, supplier: &Address) -> Result<(), ClientError> {
        self.record(Operation::Impersonate, supplier);
        self.simulate_latency().await;

        match self.accounts.write().get_mut(supplier) {
            Some(acct) => {
                acct.impersonated = true;
                Ok(())
            }
            None => Err(ClientError::UnknownAccount(*supplier)),
        }
    }

    async fn authorize(
        &self,
        supplier: &Address,
        spender: &Address,
        amount: Amount,
    ) -> Result<Receipt, ClientError> {
        self.record(Operation::Authorize, supplier);
        self.simulate_latency().await;

        if self.has_fault(supplier, &Fault::HangAuthorize) {
            std::future::pending::<()>().await;
        }
        self.require_impersonated(supplier)?;

        let mut accounts = self.accounts.write();
        let acct = accounts
            .get_mut(supplier)
            .ok_or(ClientError::UnknownAccount(*supplier))?;
        if acct.has(&Fault::RevertAuthorize) {
            debug!(supplier = %supplier, "SimulatedLedger: authorize reverted");
            return Ok(Receipt::failure());
        }
        acct.allowances.insert(*spender, amount);

        Ok(Receipt {
            status: ReceiptStatus::Success,
            logs: vec![LogEntry { index: 0, emitter: self.contracts.v1 }],
            events: Vec::new(),
        })
    }

    async fn enroll(&self, supplier: &Address, markets: &[Address]) -> Result<Receipt, ClientError> {
        self.record(Operation::Enroll, supplier);
        self.simulate_latency().await;

        if self.has_fault(supplier, &Fault::HangEnroll) {
            std::future::pending::<()>().await;
        }
        if self.has_fault(supplier, &Fault::EnrollTransportError) {
            return Err(ClientError::Transport("connection reset by peer".to_string()));
        }
        self.require_impersonated(supplier)?;

        let mut accounts = self.accounts.write();
        let acct = accounts
            .get_mut(supplier)
            .ok_or(ClientError::UnknownAccount(*supplier))?;
        if acct.has(&Fault::RevertEnroll) {
            return Ok(Receipt::failure());
        }
        acct.markets.extend(markets.iter().copied());

        let logs = markets
            .iter()
            .enumerate()
            .map(|(i, m)| LogEntry { index: i as u32, emitter: *m })
            .collect();
        Ok(Receipt { status: ReceiptStatus::Success, logs, events: Vec::new() })
    }

    async fn migrate(
        &self,
        supplier: &Address,
        family: ContractFamily,
        mode: MigrationMode,
    ) -> Result<Receipt, ClientError> {
        self.record(Operation::Migrate, supplier);
        self.simulate_latency().await;

        if self.has_fault(supplier, &Fault::HangMigrate) {
            std::future::pending::<()>().await;
        }

        let mut accounts = self.accounts.write();
        let acct = accounts
            .get_mut(supplier)
            .ok_or(ClientError::UnknownAccount(*supplier))?;
        if acct.has(&Fault::RevertMigrate) {
            return Ok(Receipt::failure());
        }

        let v1 = acct.v1_underlying;
        if v1.is_zero() {
            return Ok(Receipt::success());
        }

        let allowance = acct
            .allowances
            .get(&self.contracts.migrator)
            .copied()
            .unwrap_or_default();
        if allowance < v1 {
            debug!(supplier = %supplier, "SimulatedLedger: migrate reverted, allowance too low");
            return Ok(Receipt::failure());
        }

        if family == ContractFamily::Generic {
            if !acct.markets.contains(&self.contracts.v2) {
                debug!(supplier = %supplier, "SimulatedLedger: migrate reverted, market not entered");
                return Ok(Receipt::failure());
            }
            let mut funds = self.executor_funds.lock();
            *funds = funds
                .checked_sub(Amount(EXECUTOR_COST_PER_MIGRATION))
                .ok_or_else(|| ClientError::Reverted("executor out of funds".to_string()))?;
        }

        let v2 = Self::migrated_amount(v1, family, mode);
        let receipt = self.build_migration_receipt(supplier, acct, family, mode, v1, v2);

        acct.v1_underlying = Amount::zero();
        acct.v2_underlying = acct
            .v2_underlying
            .checked_add(v2)
            .ok_or_else(|| ClientError::Reverted("V2 balance overflow".to_string()))?;

        Ok(receipt)
    }

    async fn fund_executor(&self, executor: &Address, amount: Amount) -> Result<Receipt, ClientError> {
        self.record(Operation::FundExecutor, executor);
        self.simulate_latency().await;

        if *executor != self.contracts.migrator {
            return Err(ClientError::Unsupported(format!("no executor at {}", executor)));
        }
        let mut funds = self.executor_funds.lock();
        *funds = funds
            .checked_add(amount)
            .ok_or_else(|| ClientError::Reverted("executor balance overflow".to_string()))?;
        Ok(Receipt::success())
    }

    async fn query_underlying_balance(
        &self,
        contract: &Address,
        supplier: &Address,
    ) -> Result<Amount, ClientError> {
        self.record(Operation::QueryUnderlying, supplier);
        self.simulate_latency().await;

        let accounts = self.accounts.read();
        let acct = accounts
            .get(supplier)
            .ok_or(ClientError::UnknownAccount(*supplier))?;

        if *contract == self.contracts.v1 {
            Ok(acct.v1_underlying)
        } else if *contract == self.contracts.v2 {
            let shortfall_bp = acct
                .faults
                .iter()
                .find_map(|f| match f {
                    Fault::QueriedShortfallBp(bp) => Some(*bp),
                    _ => None,
                })
                .unwrap_or(0);
            let v2 = acct.v2_underlying.as_u128();
            let short = v2 / 10_000 * shortfall_bp + v2 % 10_000 * shortfall_bp / 10_000;
            Ok(Amount(v2.saturating_sub(short)))
        } else {
            Err(ClientError::Unsupported(format!("unknown contract {}", contract)))
        }
    }

    async fn query_available_funds(&self, supplier: &Address) -> Result<Amount, ClientError> {
        self.record(Operation::QueryFunds, supplier);
        self.simulate_latency().await;

        self.accounts
            .read()
            .get(supplier)
            .map(|a| a.available_funds)
            .ok_or(ClientError::UnknownAccount(*supplier))
    }
}
