//! Ledger types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of a target's migration ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Applied script version
    pub version: i64,
    /// Script name at apply time
    pub name: String,
    /// Checksum of the script text at apply time
    pub checksum: String,
    /// Commit time of the script transaction
    #[serde(rename = "appliedAt")]
    #[serde(with = "crate::utils::datetime")]
    pub applied_at: DateTime<Utc>,
    /// Wall time spent executing the script
    #[serde(rename = "executionMs")]
    pub execution_ms: i64,
}

/// Result of comparing a stored script against its ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumCheck {
    /// Ledger checksum equals the expected checksum
    Match,
    /// Ledger checksum differs; carries the recorded value
    Mismatch { recorded: String },
    /// Version is not in the ledger
    Missing,
}

impl ChecksumCheck {
    /// Compare an optional ledger entry against the expected checksum.
    #[must_use]
    pub fn compare(entry: Option<&LedgerEntry>, expected: &str) -> Self {
        match entry {
            None => Self::Missing,
            Some(e) if e.checksum == expected => Self::Match,
            Some(e) => Self::Mismatch {
                recorded: e.checksum.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(checksum: &str) -> LedgerEntry {
        LedgerEntry {
            version: 1,
            name: "create_wells".to_string(),
            checksum: checksum.to_string(),
            applied_at: Utc::now(),
            execution_ms: 3,
        }
    }

    #[test]
    fn compare_reports_match_mismatch_and_missing() {
        assert_eq!(ChecksumCheck::compare(Some(&entry("abc")), "abc"), ChecksumCheck::Match);
        assert_eq!(
            ChecksumCheck::compare(Some(&entry("abc")), "def"),
            ChecksumCheck::Mismatch {
                recorded: "abc".to_string()
            }
        );
        assert_eq!(ChecksumCheck::compare(None, "abc"), ChecksumCheck::Missing);
    }
}
