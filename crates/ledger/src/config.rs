//! Migration run configuration, loaded from TOML with serde.
//!
//! Defaults carry the production constants of the wrapped-BTC market
//! migration. Only the migrator address has no sensible default and must be
//! set; [`MigrationConfig::validate`] enforces that.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Address, Amount, ContractFamily};

/// Native balance a supplier needs to pay for two to three transactions.
pub const DEFAULT_MIN_AVAILABLE_FUNDS: Amount = Amount(150_000_000_000_000_000);

/// Sent to the migrator before migrating; one unit per migration, so a
/// generic-family run against the simulated ledger migrates at most this
/// many suppliers. Past that, `migrate` fails with
/// `ClientError::Reverted("executor out of funds")`.
pub const DEFAULT_EXECUTOR_FUNDING: Amount = Amount(1000);

pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 120_000;

pub const DEFAULT_V1_CONTRACT: &str = "0xC11b1268C1A384e55C48c2391d8d480264A3A7F4";
pub const DEFAULT_V2_CONTRACT: &str = "0xccF4429DB6322D5C611ee964527D42E5d685DD6a";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("duplicate supplier {0}")]
    DuplicateSupplier(Address),

    #[error("supplier index {index} out of range for population of {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationConfig {
    /// Migrator contract family under test.
    pub family: ContractFamily,

    /// Suppliers with less native balance than this are skipped.
    pub min_available_funds: Amount,

    /// Migration executor; also the spender in the authorization stage.
    pub migrator: Address,

    pub v1_contract: Address,
    pub v2_contract: Address,

    /// Markets entered during enrollment.
    pub markets: Vec<Address>,

    /// Funding sent to the migrator before the migration stage.
    pub executor_funding: Option<Amount>,

    /// Per remote call, in milliseconds.
    pub operation_timeout_ms: u64,

    /// Seed for per-supplier mode selection. Drawn from entropy if absent.
    /// Accepts an integer or a decimal string; TOML integers stop at
    /// `i64::MAX`, so larger seeds round-trip as strings.
    #[serde(with = "seed_format", skip_serializing_if = "Option::is_none")]
    pub mode_seed: Option<u64>,

    /// Only used by rehearsals against the simulated ledger.
    pub simulation: SimulationConfig,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        let v2 = Address::from_str(DEFAULT_V2_CONTRACT).unwrap_or(Address::ZERO);
        MigrationConfig {
            family: ContractFamily::Generic,
            min_available_funds: DEFAULT_MIN_AVAILABLE_FUNDS,
            migrator: Address::ZERO,
            v1_contract: Address::from_str(DEFAULT_V1_CONTRACT).unwrap_or(Address::ZERO),
            v2_contract: v2,
            markets: vec![v2],
            executor_funding: Some(DEFAULT_EXECUTOR_FUNDING),
            operation_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            mode_seed: None,
            simulation: SimulationConfig::default(),
        }
    }
}

impl MigrationConfig {
    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.migrator == Address::ZERO {
            return Err(ConfigError::Invalid("migrator address must be set".to_string()));
        }
        if self.v1_contract == self.v2_contract {
            return Err(ConfigError::Invalid(
                "v1_contract and v2_contract must differ".to_string(),
            ));
        }
        if self.operation_timeout_ms == 0 {
            return Err(ConfigError::Invalid("operation_timeout_ms must be > 0".to_string()));
        }
        if self.family == ContractFamily::Generic && self.markets.is_empty() {
            return Err(ConfigError::Invalid(
                "generic family requires at least one market".to_string(),
            ));
        }
        Ok(())
    }
}

/// Balances assigned to suppliers in a simulated rehearsal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    pub default_available_funds: Amount,
    pub default_v1_underlying: Amount,
    pub latency_ms: u64,
    pub overrides: Vec<SupplierOverride>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            default_available_funds: Amount(1_000_000_000_000_000_000),
            default_v1_underlying: Amount(1_000_000),
            latency_ms: 0,
            overrides: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SupplierOverride {
    pub supplier: Address,
    pub available_funds: Option<Amount>,
    pub v1_underlying: Option<Amount>,
}

impl SimulationConfig {
    /// `(available_funds, v1_underlying)` for a supplier.
    pub fn balances_for(&self, supplier: &Address) -> (Amount, Amount) {
        let o = self.overrides.iter().find(|o| o.supplier == *supplier);
        (
            o.and_then(|o| o.available_funds).unwrap_or(self.default_available_funds),
            o.and_then(|o| o.v1_underlying).unwrap_or(self.default_v1_underlying),
        )
    }
}

mod seed_format {
    use std::fmt;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(seed: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error>
    where S: Serializer {
        match seed {
            Some(v) if i64::try_from(*v).is_ok() => serializer.serialize_u64(*v),
            Some(v) => serializer.serialize_str(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where D: Deserializer<'de> {
        struct SeedVisitor;

        impl<'de> Visitor<'de> for SeedVisitor {
            type Value = Option<u64>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a u64 seed as an integer or a decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Option<u64>, E> {
                Ok(Some(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Option<u64>, E> {
                u64::try_from(v)
                    .map(Some)
                    .map_err(|_| E::custom(format!("negative seed: {}", v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Option<u64>, E> {
                v.trim()
                    .replace('_', "")
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|e| E::custom(format!("invalid seed '{}': {}", v, e)))
            }
        }

        deserializer.deserialize_any(SeedVisitor)
    }
}

/// Load config from a TOML file path.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<MigrationConfig, ConfigError> {
    let s = fs::read_to_string(path.as_ref())?;
    let cfg: MigrationConfig = toml::from_str(&s)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let def = MigrationConfig::default();
        assert_eq!(def.min_available_funds, Amount(150_000_000_000_000_000));
        assert_eq!(def.markets, vec![def.v2_contract]);
        assert_eq!(def.v2_contract.to_checksum(), DEFAULT_V2_CONTRACT);
        // Migrator must be provided explicitly.
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::NamedTempFile::new().expect("temp file");
        let toml = r#"
            family = "wrapped_asset"
            min_available_funds = "150000000000000000"
            migrator = "0x1111111111111111111111111111111111111111"
            executor_funding = 5
            operation_timeout_ms = 2000
            mode_seed = 7

            [simulation]
            default_v1_underlying = 42

            [[simulation.overrides]]
            supplier = "0x2222222222222222222222222222222222222222"
            available_funds = 0
        "#;
        let mut f = tmp.reopen().expect("reopen");
        write!(f, "{}", toml).expect("write");

        let cfg = load_from_file(tmp.path()).expect("load");
        assert_eq!(cfg.family, ContractFamily::WrappedAsset);
        assert_eq!(cfg.executor_funding, Some(Amount(5)));
        assert_eq!(cfg.mode_seed, Some(7));
        assert_eq!(cfg.operation_timeout_ms, 2000);
        assert!(cfg.validate().is_ok());

        let overridden = Address([0x22; 20]);
        assert_eq!(cfg.simulation.balances_for(&overridden), (Amount(0), Amount(42)));
        assert_eq!(
            cfg.simulation.balances_for(&Address([0x33; 20])),
            (Amount(1_000_000_000_000_000_000), Amount(42))
        );
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct SeedOnly {
        #[serde(default, with = "seed_format", skip_serializing_if = "Option::is_none")]
        mode_seed: Option<u64>,
    }

    #[test]
    fn test_seed_above_i64_round_trips() {
        let big = u64::MAX - 5;
        let cfg = toml::from_str::<MigrationConfig>(&format!(
            "migrator = \"0x1111111111111111111111111111111111111111\"\nmode_seed = \"{}\"",
            big
        ))
        .expect("string seed");
        assert_eq!(cfg.mode_seed, Some(big));

        let written = toml::to_string(&SeedOnly { mode_seed: cfg.mode_seed }).expect("serialize");
        assert_eq!(written.trim(), format!("mode_seed = \"{}\"", big));
        let reloaded: MigrationConfig = toml::from_str(&written).expect("reload");
        assert_eq!(reloaded.mode_seed, Some(big));

        let written = toml::to_string(&SeedOnly { mode_seed: Some(7) }).expect("serialize");
        assert_eq!(written.trim(), "mode_seed = 7");

        let unset: SeedOnly = toml::from_str("").expect("empty");
        assert_eq!(unset.mode_seed, None);

        assert!(toml::from_str::<MigrationConfig>("mode_seed = -1").is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = toml::from_str::<MigrationConfig>("bogus = 1").unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout_and_empty_markets() {
        let mut cfg = MigrationConfig {
            migrator: Address([0x11; 20]),
            ..MigrationConfig::default()
        };
        assert!(cfg.validate().is_ok());

        cfg.operation_timeout_ms = 0;
        assert!(cfg.validate().is_err());

        cfg.operation_timeout_ms = 10;
        cfg.markets.clear();
        assert!(cfg.validate().is_err());

        cfg.family = ContractFamily::WrappedAsset;
        assert!(cfg.validate().is_ok());
    }
}
