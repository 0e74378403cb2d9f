//! Migration target types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Target id used for the master database.
pub const MASTER_TARGET_ID: &str = "master";

/// Storage adapter behind a target.
///
/// Only relational targets understand SQL scripts; everything else is skipped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    #[default]
    Relational,
    Other,
}

impl AdapterKind {
    /// Parses a registry column value. Anything that is not `relational` is `Other`.
    #[must_use]
    pub fn from_registry_value(value: &str) -> Self {
        if value.eq_ignore_ascii_case("relational") {
            Self::Relational
        } else {
            Self::Other
        }
    }

    #[must_use]
    pub fn supports_sql(self) -> bool {
        matches!(self, Self::Relational)
    }
}

/// One database in the fleet.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TenantTarget {
    /// Tenant identifier
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Opaque connection descriptor (database URL)
    pub url: String,
    /// Adapter kind
    #[serde(default)]
    pub adapter: AdapterKind,
    /// Soft-deletion marker
    #[serde(default, rename = "deletedAt", alias = "deleted_at")]
    #[serde(with = "crate::utils::datetime::option")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TenantTarget {
    #[must_use]
    pub fn new(id: impl Into<String>, url: impl Into<String>, adapter: AdapterKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            url: url.into(),
            adapter,
            deleted_at: None,
        }
    }

    /// The master database as a target.
    #[must_use]
    pub fn master(url: impl Into<String>) -> Self {
        Self::new(MASTER_TARGET_ID, url, AdapterKind::Relational)
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

// Connection descriptors carry credentials; keep them out of debug output.
impl fmt::Debug for TenantTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantTarget")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("url", &"<redacted>")
            .field("adapter", &self.adapter)
            .field("deleted_at", &self.deleted_at)
            .finish()
    }
}

/// Per-target migration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    NotStarted,
    Applying(i64),
    Complete,
    Failed,
    DriftDetected,
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => f.write_str("not-started"),
            Self::Applying(v) => write!(f, "applying({v})"),
            Self::Complete => f.write_str("complete"),
            Self::Failed => f.write_str("failed"),
            Self::DriftDetected => f.write_str("drift-detected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_from_registry_value() {
        assert_eq!(AdapterKind::from_registry_value("Relational"), AdapterKind::Relational);
        assert_eq!(AdapterKind::from_registry_value("mongodb"), AdapterKind::Other);
        assert!(!AdapterKind::Other.supports_sql());
    }

    #[test]
    fn debug_output_redacts_url() {
        let target = TenantTarget::new("acme", "postgres://user:secret@db/acme", AdapterKind::Relational);
        let debug = format!("{target:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("acme"));
    }

    #[test]
    fn target_deserializes_with_defaults() {
        let target: TenantTarget =
            serde_json::from_str(r#"{"id":"acme","url":"sqlite::memory:"}"#).unwrap();
        assert_eq!(target.adapter, AdapterKind::Relational);
        assert!(!target.is_deleted());
    }
}
