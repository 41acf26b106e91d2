//! # Transaction Receipt Model
//!
//! Fixed, tagged representation of what a ledger returns after a write:
//! an overall status, the ordered raw log sequence, and the subset of logs
//! that were decoded into named events.
//!
//! ## Typed extraction
//!
//! Consumers never index into `Event::fields` directly. The only event the
//! migration pipeline inspects is `Migrated`, extracted through
//! [`MigratedEvent::from_event`], which returns [`MalformedReceipt`] for any
//! missing field, mistyped field, or out-of-range log position.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Address, Amount};

/// Name of the event emitted by a migrator on a successful migration.
pub const MIGRATED_EVENT: &str = "Migrated";

// ════════════════════════════════════════════════════════════════════════════
// ERROR
// ════════════════════════════════════════════════════════════════════════════

/// Receipt whose shape does not match the fixed model.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MalformedReceipt {
    #[error("event '{event}' is missing field '{field}'")]
    MissingField { event: String, field: &'static str },

    #[error("event '{event}' field '{field}' has wrong type: expected {expected}")]
    WrongFieldType {
        event: String,
        field: &'static str,
        expected: &'static str,
    },

    #[error("event '{event}' field '{field}' is not a valid address: {value}")]
    InvalidAddress {
        event: String,
        field: &'static str,
        value: String,
    },

    #[error("event '{event}' references log index {log_index} but receipt has {log_count} logs")]
    LogIndexOutOfRange {
        event: String,
        log_index: u32,
        log_count: usize,
    },

    #[error("migration event reports zero V1 underlying")]
    ZeroUnderlying,
}

// ════════════════════════════════════════════════════════════════════════════
// RECEIPT
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Failure,
}

/// One raw log entry, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position within the receipt's log sequence.
    pub index: u32,
    /// Contract that emitted the log.
    pub emitter: Address,
}

/// Decoded value of a named event field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EventValue {
    /// Address as rendered by the decoder (any case).
    Address(String),
    Uint(u128),
}

/// Decoded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    /// Position of the underlying raw log in `Receipt::logs`.
    pub log_index: u32,
    pub fields: BTreeMap<String, EventValue>,
}

/// Result of one write operation against the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub status: ReceiptStatus,
    pub logs: Vec<LogEntry>,
    /// Decoded events, in emission order.
    pub events: Vec<Event>,
}

impl Receipt {
    /// Successful receipt with no logs.
    pub fn success() -> Self {
        Self {
            status: ReceiptStatus::Success,
            logs: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Failed receipt with no logs.
    pub fn failure() -> Self {
        Self {
            status: ReceiptStatus::Failure,
            logs: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }

    pub fn log_count(&self) -> usize {
        self.logs.len()
    }

    /// First decoded event, if any.
    pub fn first_event(&self) -> Option<&Event> {
        self.events.first()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MIGRATED EVENT
// ════════════════════════════════════════════════════════════════════════════

/// Typed view of a `Migrated` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratedEvent {
    /// Account as rendered by the decoder.
    pub account_text: String,
    /// Parsed account identity.
    pub account: Address,
    pub underlying_v1: Amount,
    pub underlying_v2: Amount,
    pub log_index: u32,
}

impl MigratedEvent {
    /// Extracts the typed fields from a decoded event.
    ///
    /// The event name is NOT checked here; callers decide whether an event
    /// with another name is a structural failure.
    pub fn from_event(event: &Event, log_count: usize) -> Result<Self, MalformedReceipt> {
        if event.log_index as usize >= log_count {
            return Err(MalformedReceipt::LogIndexOutOfRange {
                event: event.name.clone(),
                log_index: event.log_index,
                log_count,
            });
        }

        let account_text = match field(event, "account")? {
            EventValue::Address(s) => s.clone(),
            EventValue::Uint(_) => {
                return Err(MalformedReceipt::WrongFieldType {
                    event: event.name.clone(),
                    field: "account",
                    expected: "address",
                })
            }
        };
        let account: Address = account_text.parse().map_err(|_| MalformedReceipt::InvalidAddress {
            event: event.name.clone(),
            field: "account",
            value: account_text.clone(),
        })?;

        let underlying_v1 = uint_field(event, "underlyingV1")?;
        let underlying_v2 = uint_field(event, "underlyingV2")?;
        if underlying_v1.is_zero() {
            return Err(MalformedReceipt::ZeroUnderlying);
        }

        Ok(Self {
            account_text,
            account,
            underlying_v1,
            underlying_v2,
            log_index: event.log_index,
        })
    }
}

fn field<'a>(event: &'a Event, name: &'static str) -> Result<&'a EventValue, MalformedReceipt> {
    event.fields.get(name).ok_or_else(|| MalformedReceipt::MissingField {
        event: event.name.clone(),
        field: name,
    })
}

fn uint_field(event: &Event, name: &'static str) -> Result<Amount, MalformedReceipt> {
    match field(event, name)? {
        EventValue::Uint(v) => Ok(Amount(*v)),
        EventValue::Address(_) => Err(MalformedReceipt::WrongFieldType {
            event: event.name.clone(),
            field: name,
            expected: "uint",
        }),
    }
}

/// Builds a `Migrated` event. Used by ledgers that decode migrator logs.
pub fn migrated_event(log_index: u32, account: &Address, v1: Amount, v2: Amount) -> Event {
    let mut fields = BTreeMap::new();
    fields.insert("account".to_string(), EventValue::Address(account.to_checksum()));
    fields.insert("underlyingV1".to_string(), EventValue::Uint(v1.as_u128()));
    fields.insert("underlyingV2".to_string(), EventValue::Uint(v2.as_u128()));
    Event {
        name: MIGRATED_EVENT.to_string(),
        log_index,
        fields,
    }
}
