//! # LedgerClient: Remote Ledger Seam
//!
//! Async trait that decouples the migration pipeline from any concrete
//! ledger client. The pipeline only ever talks to `dyn LedgerClient`.
//!
//! ```text
//! MigrationPipeline
//!      │
//!      ▼
//! Arc<dyn LedgerClient>
//!      │
//!      ├─ SimulatedLedger  (in-memory, tests and rehearsals)
//!      └─ <node client>    (provided by the embedding harness)
//! ```
//!
//! ## Failure surfaces
//!
//! A remote write can fail in two distinct ways:
//!
//! - It executes and reverts: `Ok(Receipt { status: Failure, .. })`.
//! - It never produces a receipt: `Err(ClientError)`.
//!
//! The pipeline classifies both per stage; the client itself never retries.
//!
//! ## Contract for implementors
//!
//! - MUST NOT retry internally.
//! - MUST NOT panic.
//! - Writes are submitted as the supplier; `impersonate` is called first.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::receipt::Receipt;
use crate::types::{Address, Amount, ContractFamily, MigrationMode};

/// Transport- or node-level failure of a remote call.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ClientError {
    /// Connection or protocol failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The node rejected the call outright (e.g. estimation revert).
    #[error("call reverted: {0}")]
    Reverted(String),

    /// Node-side timeout.
    #[error("remote call timed out")]
    Timeout,

    /// The node cannot sign for this account.
    #[error("unknown account {0}")]
    UnknownAccount(Address),

    /// The operation is not offered by this client or contract family.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Allows subsequent writes to be submitted as `supplier`.
    async fn impersonate(&self, supplier: &Address) -> Result<(), ClientError>;

    /// Grants `spender` transfer rights over `amount` of the supplier's V1
    /// balance. Submitted as the supplier.
    async fn authorize(
        &self,
        supplier: &Address,
        spender: &Address,
        amount: Amount,
    ) -> Result<Receipt, ClientError>;

    /// Enrolls the supplier in the named markets. Submitted as the supplier.
    async fn enroll(&self, supplier: &Address, markets: &[Address]) -> Result<Receipt, ClientError>;

    /// Executes the migration for the supplier. Single-form families ignore
    /// `mode` beyond recording it.
    async fn migrate(
        &self,
        supplier: &Address,
        family: ContractFamily,
        mode: MigrationMode,
    ) -> Result<Receipt, ClientError>;

    /// Sends native funds to the migration executor.
    async fn fund_executor(&self, executor: &Address, amount: Amount) -> Result<Receipt, ClientError>;

    /// Supplier's position in `contract`, in underlying units.
    async fn query_underlying_balance(
        &self,
        contract: &Address,
        supplier: &Address,
    ) -> Result<Amount, ClientError>;

    /// Supplier's native balance available to pay for transactions.
    async fn query_available_funds(&self, supplier: &Address) -> Result<Amount, ClientError>;
}
