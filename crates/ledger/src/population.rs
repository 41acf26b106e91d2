//! Supplier population: the ordered account list a run migrates.
//!
//! Input is a JSON array of hex addresses, loaded once per run. Order is
//! preserved; it only affects which hard failure is reported first.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::types::Address;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupplierPopulation {
    suppliers: Vec<Address>,
}

impl SupplierPopulation {
    /// Builds a population, rejecting duplicate identities.
    pub fn new(suppliers: Vec<Address>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::with_capacity(suppliers.len());
        for s in &suppliers {
            if !seen.insert(*s) {
                return Err(ConfigError::DuplicateSupplier(*s));
            }
        }
        Ok(Self { suppliers })
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let suppliers: Vec<Address> = serde_json::from_str(s)?;
        Self::new(suppliers)
    }

    /// Narrows the population to the given positions, in the given order.
    pub fn select(&self, indices: &[usize]) -> Result<Self, ConfigError> {
        let picked = indices
            .iter()
            .map(|&index| {
                self.suppliers.get(index).copied().ok_or(ConfigError::IndexOutOfRange {
                    index,
                    len: self.suppliers.len(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(picked)
    }

    pub fn suppliers(&self) -> &[Address] {
        &self.suppliers
    }

    pub fn len(&self) -> usize {
        self.suppliers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suppliers.is_empty()
    }
}

/// Load a population from a JSON file.
pub fn load_json(path: impl AsRef<Path>) -> Result<SupplierPopulation, ConfigError> {
    let s = fs::read_to_string(path.as_ref())?;
    SupplierPopulation::from_json_str(&s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TWO: &str = r#"[
        "0x1111111111111111111111111111111111111111",
        "0x2222222222222222222222222222222222222222"
    ]"#;

    #[test]
    fn test_load_json_file() {
        let mut tmp = tempfile::NamedTempFile::new().expect("temp file");
        write!(tmp, "{}", TWO).expect("write");

        let pop = load_json(tmp.path()).expect("load");
        assert_eq!(pop.len(), 2);
        assert_eq!(pop.suppliers()[1], Address([0x22; 20]));
    }

    #[test]
    fn test_duplicates_rejected_case_insensitively() {
        let json = r#"[
            "0xccf4429db6322d5c611ee964527d42e5d685dd6a",
            "0xccF4429DB6322D5C611ee964527D42E5d685DD6a"
        ]"#;
        assert!(matches!(
            SupplierPopulation::from_json_str(json),
            Err(ConfigError::DuplicateSupplier(_))
        ));
    }

    #[test]
    fn test_select_subset() {
        let pop = SupplierPopulation::from_json_str(TWO).unwrap();
        let one = pop.select(&[1]).unwrap();
        assert_eq!(one.suppliers(), &[Address([0x22; 20])]);

        assert!(matches!(
            pop.select(&[18]),
            Err(ConfigError::IndexOutOfRange { index: 18, len: 2 })
        ));
    }

    #[test]
    fn test_malformed_entry_rejected() {
        assert!(matches!(
            SupplierPopulation::from_json_str(r#"["0x12"]"#),
            Err(ConfigError::Json(_))
        ));
    }
}
