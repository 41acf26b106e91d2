//! # lmig-ledger
//!
//! Ledger-facing primitives for the V1 → V2 migration pipeline.
//!
//! ## Modules
//! - `types`: `Address` (EIP-55 canonical form), `Amount`, migration variants
//! - `receipt`: fixed receipt/event model and typed `Migrated` extraction
//! - `client`: `LedgerClient` trait, the only seam to the remote ledger
//! - `simulated`: in-memory `SimulatedLedger` for tests and rehearsals
//! - `config`: TOML run configuration
//! - `population`: supplier population loading
//!
//! ## Client seam
//! ```text
//! ┌──────────────────┐
//! │   LedgerClient   │  <- async trait
//! └────────┬─────────┘
//!          │
//!    ┌─────┴──────────────┐
//!    │                    │
//! ┌──▼─────────────┐  ┌───▼────────────┐
//! │SimulatedLedger │  │ harness client │
//! └────────────────┘  └────────────────┘
//! ```

pub mod client;
pub mod config;
pub mod population;
pub mod receipt;
pub mod simulated;
pub mod types;

pub use client::{ClientError, LedgerClient};
pub use config::{ConfigError, MigrationConfig, SimulationConfig, SupplierOverride};
pub use population::SupplierPopulation;
pub use receipt::{
    migrated_event, Event, EventValue, LogEntry, MalformedReceipt, MigratedEvent, Receipt,
    ReceiptStatus, MIGRATED_EVENT,
};
pub use simulated::{Fault, Operation, SimulatedLedger, SimulationContracts};
pub use types::{Address, AddressError, Amount, ContractFamily, MigrationMode};
