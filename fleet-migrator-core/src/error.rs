//! Unified error type definition

use serde::Serialize;
use thiserror::Error;

/// Core layer error type
#[derive(Error, Debug, Clone, Serialize)]
#[serde(tag = "code", content = "details")]
pub enum CoreError {
    /// Two scripts in the same domain share a version
    #[error("Duplicate script version {version} in domain '{domain}'")]
    DuplicateVersion { domain: String, version: i64 },

    /// A script file or definition could not be accepted into the store
    #[error("Invalid script {name}: {reason}")]
    InvalidScript { name: String, reason: String },

    /// The target database (and therefore its ledger) cannot be reached
    #[error("Ledger unavailable for target {target}: {message}")]
    LedgerUnavailable { target: String, message: String },

    /// An applied script's text no longer matches its ledger checksum
    #[error(
        "Drift detected on target {target}: script {version} checksum changed (ledger {recorded}, store {current})"
    )]
    DriftDetected {
        target: String,
        version: i64,
        recorded: String,
        current: String,
    },

    /// A pending script sorts before a version that is already applied
    #[error(
        "Script {version} on target {target} is older than the latest applied version {latest_applied}"
    )]
    OutOfOrder {
        target: String,
        version: i64,
        latest_applied: i64,
    },

    /// SQL failure while applying a script
    #[error("Script {version} failed on target {target}: {message}")]
    ScriptExecution {
        target: String,
        version: i64,
        message: String,
    },

    /// Script execution exceeded the configured timeout
    #[error("Script {version} timed out on target {target} after {limit_ms}ms")]
    Timeout {
        target: String,
        version: i64,
        limit_ms: u64,
    },

    /// Target adapter cannot run SQL migrations
    #[error("Unsupported adapter for target {0}")]
    UnsupportedAdapter(String),

    /// Another migrator holds the target's lock
    #[error("Target {0} is locked by another migration")]
    TargetLocked(String),

    /// A requested tenant is not in the registry
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    /// The run was cancelled before this target finished
    #[error("Migration cancelled for target {0}")]
    Cancelled(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Storage layer error
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl CoreError {
    /// Whether it is expected behavior (skips, locks, cancellation), used for log classification.
    ///
    /// Level `warn` should be used when returning `true` and level `error` when returning `false`.
    /// **Please update this method simultaneously when new variants are added.**
    #[must_use]
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedAdapter(_)
                | Self::TargetLocked(_)
                | Self::Cancelled(_)
                | Self::TenantNotFound(_)
        )
    }

    /// Stable machine-readable name of the variant, matching the serialized `code` tag.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateVersion { .. } => "DuplicateVersion",
            Self::InvalidScript { .. } => "InvalidScript",
            Self::LedgerUnavailable { .. } => "LedgerUnavailable",
            Self::DriftDetected { .. } => "DriftDetected",
            Self::OutOfOrder { .. } => "OutOfOrder",
            Self::ScriptExecution { .. } => "ScriptExecution",
            Self::Timeout { .. } => "Timeout",
            Self::UnsupportedAdapter(_) => "UnsupportedAdapter",
            Self::TargetLocked(_) => "TargetLocked",
            Self::TenantNotFound(_) => "TenantNotFound",
            Self::Cancelled(_) => "Cancelled",
            Self::ConfigError(_) => "ConfigError",
            Self::StorageError(_) => "StorageError",
            Self::SerializationError(_) => "SerializationError",
        }
    }
}

/// Core layer Result type alias
pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_matches_serialized_tag() {
        let err = CoreError::DriftDetected {
            target: "acme".to_string(),
            version: 2,
            recorded: "aa".to_string(),
            current: "bb".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], err.code());
        assert_eq!(json["details"]["version"], 2);

        let err = CoreError::TargetLocked("acme".to_string());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "TargetLocked");
    }

    #[test]
    fn skips_and_locks_are_expected() {
        assert!(CoreError::UnsupportedAdapter("mongo".to_string()).is_expected());
        assert!(CoreError::TargetLocked("acme".to_string()).is_expected());
        assert!(!CoreError::ScriptExecution {
            target: "acme".to_string(),
            version: 1,
            message: "syntax error".to_string()
        }
        .is_expected());
    }
}
