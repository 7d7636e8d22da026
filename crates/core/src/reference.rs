//! Static reference tables.
//!
//! Country group membership is read-only data built once and handed to the
//! components that need it, typically behind an `Arc`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// EU-27 member names as spelled in FAOSTAT tables.
pub const EU27_COUNTRY_NAMES: [&str; 27] = [
    "Austria",
    "Belgium",
    "Bulgaria",
    "Croatia",
    "Cyprus",
    "Czechia",
    "Denmark",
    "Estonia",
    "Finland",
    "France",
    "Germany",
    "Greece",
    "Hungary",
    "Ireland",
    "Italy",
    "Latvia",
    "Lithuania",
    "Luxembourg",
    "Malta",
    "Netherlands",
    "Poland",
    "Portugal",
    "Romania",
    "Slovakia",
    "Slovenia",
    "Spain",
    "Sweden",
];

/// Aggregation level of a country group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupLevel {
    Continent,
    SubContinent,
}

impl GroupLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupLevel::Continent => "continent",
            GroupLevel::SubContinent => "sub_continent",
        }
    }
}

/// Continent and sub-continent of one country code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinentEntry {
    pub continent: String,
    pub sub_continent: String,
}

/// Read-only country reference data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceTables {
    /// Names of EU member countries, matched exactly.
    #[serde(default)]
    eu_members: BTreeSet<String>,
    /// Continent membership keyed by country code.
    #[serde(default)]
    continents: BTreeMap<i64, ContinentEntry>,
}

impl ReferenceTables {
    /// Tables with the built-in EU-27 list and no continent data.
    pub fn eu27() -> Self {
        Self::default().with_eu_members(EU27_COUNTRY_NAMES)
    }

    pub fn with_eu_members<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.eu_members = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_continent(
        mut self,
        code: i64,
        continent: impl Into<String>,
        sub_continent: impl Into<String>,
    ) -> Self {
        self.continents.insert(
            code,
            ContinentEntry {
                continent: continent.into(),
                sub_continent: sub_continent.into(),
            },
        );
        self
    }

    /// Parse tables from JSON of the form
    /// `{"eu_members": [...], "continents": {"106": {"continent": .., "sub_continent": ..}}}`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let tables: ReferenceTables = serde_json::from_str(json)?;
        if tables.eu_members.is_empty() && tables.continents.is_empty() {
            return Err(Error::config("reference tables are empty"));
        }
        Ok(tables)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Exact-match EU membership.
    pub fn is_eu_member(&self, country: &str) -> bool {
        self.eu_members.contains(country)
    }

    pub fn eu_members(&self) -> impl Iterator<Item = &str> {
        self.eu_members.iter().map(String::as_str)
    }

    /// Group label of a country code at the given level.
    pub fn country_group(&self, code: i64, level: GroupLevel) -> Option<&str> {
        self.continents.get(&code).map(|e| match level {
            GroupLevel::Continent => e.continent.as_str(),
            GroupLevel::SubContinent => e.sub_continent.as_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eu27_membership() {
        let tables = ReferenceTables::eu27();
        assert!(tables.is_eu_member("Italy"));
        assert!(tables.is_eu_member("France"));
        assert!(!tables.is_eu_member("italy"));
        assert!(!tables.is_eu_member("Norway"));
        assert_eq!(tables.eu_members().count(), 27);
    }

    #[test]
    fn test_continent_lookup() {
        let tables = ReferenceTables::default().with_continent(106, "Europe", "Southern Europe");
        assert_eq!(tables.country_group(106, GroupLevel::Continent), Some("Europe"));
        assert_eq!(
            tables.country_group(106, GroupLevel::SubContinent),
            Some("Southern Europe")
        );
        assert_eq!(tables.country_group(9, GroupLevel::Continent), None);
    }

    #[test]
    fn test_from_json() {
        let tables = ReferenceTables::from_json_str(
            r#"{"eu_members": ["Malta"],
                "continents": {"21": {"continent": "Americas", "sub_continent": "South America"}}}"#,
        )
        .unwrap();
        assert!(tables.is_eu_member("Malta"));
        assert_eq!(tables.country_group(21, GroupLevel::Continent), Some("Americas"));
        assert!(ReferenceTables::from_json_str("{}").is_err());
    }
}
