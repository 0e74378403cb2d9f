//! Migration script types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::utils::checksum::script_checksum;

/// Logical migration track.
///
/// `Master` scripts run against the single master database, `Tenant` scripts
/// against every tenant database in the fleet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum MigrationDomain {
    Master,
    Tenant,
}

impl MigrationDomain {
    /// Directory / tag name of the domain.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Tenant => "tenant",
        }
    }
}

impl fmt::Display for MigrationDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationDomain {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "master" => Ok(Self::Master),
            "tenant" => Ok(Self::Tenant),
            other => Err(CoreError::ConfigError(format!(
                "Unknown migration domain '{other}' (expected 'master' or 'tenant')"
            ))),
        }
    }
}

/// One immutable migration script.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptVersion {
    /// Ordinal version, unique within its domain
    pub version: i64,
    /// Human-readable name
    pub name: String,
    /// Domain the script belongs to
    pub domain: MigrationDomain,
    /// Raw SQL text
    pub sql: String,
}

impl ScriptVersion {
    #[must_use]
    pub fn new(
        version: i64,
        name: impl Into<String>,
        domain: MigrationDomain,
        sql: impl Into<String>,
    ) -> Self {
        Self {
            version,
            name: name.into(),
            domain,
            sql: sql.into(),
        }
    }

    /// Checksum of the script text, as recorded in the ledger.
    #[must_use]
    pub fn checksum(&self) -> String {
        script_checksum(&self.sql)
    }

    /// `<version>_<name>` label used in logs.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}_{}", self.version, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_parses_case_insensitively() {
        assert_eq!("Tenant".parse::<MigrationDomain>().unwrap(), MigrationDomain::Tenant);
        assert_eq!("master".parse::<MigrationDomain>().unwrap(), MigrationDomain::Master);
        assert!(matches!(
            "reporting".parse::<MigrationDomain>(),
            Err(CoreError::ConfigError(_))
        ));
    }

    #[test]
    fn domain_serializes_lowercase() {
        let json = serde_json::to_string(&MigrationDomain::Tenant).unwrap();
        assert_eq!(json, "\"tenant\"");
    }

    #[test]
    fn checksum_follows_sql_text() {
        let a = ScriptVersion::new(1, "create_wells", MigrationDomain::Tenant, "CREATE TABLE wells (id TEXT);");
        let mut b = a.clone();
        assert_eq!(a.checksum(), b.checksum());
        b.sql.push_str(" -- edited");
        assert_ne!(a.checksum(), b.checksum());
        assert_eq!(a.label(), "1_create_wells");
    }
}
