//! Run options and per-target / fleet result types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Script reference reported after a successful apply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppliedScript {
    pub version: i64,
    pub name: String,
}

/// Script that a dry run would apply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingScript {
    pub version: i64,
    pub name: String,
    pub checksum: String,
}

/// Terminal status of one target in a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    Success,
    Skipped,
    Failed,
}

/// Machine-readable failure detail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureDetail {
    /// `CoreError` variant name (`DriftDetected`, `ScriptExecution`, ...)
    pub code: String,
    pub message: String,
}

impl From<&CoreError> for FailureDetail {
    fn from(err: &CoreError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Outcome of one target in a fleet run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    #[serde(rename = "tenantId")]
    pub tenant_id: String,
    pub status: MigrationStatus,
    /// Scripts committed during this run (in apply order)
    pub applied: Vec<AppliedScript>,
    /// Scripts still pending (only populated by dry runs)
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub pending: Vec<PendingScript>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<FailureDetail>,
}

impl MigrationResult {
    #[must_use]
    pub fn success(tenant_id: impl Into<String>, applied: Vec<AppliedScript>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            status: MigrationStatus::Success,
            applied,
            pending: Vec::new(),
            detail: None,
        }
    }

    #[must_use]
    pub fn skipped(tenant_id: impl Into<String>, reason: &CoreError) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            status: MigrationStatus::Skipped,
            applied: Vec::new(),
            pending: Vec::new(),
            detail: Some(FailureDetail::from(reason)),
        }
    }

    #[must_use]
    pub fn failed(tenant_id: impl Into<String>, applied: Vec<AppliedScript>, err: &CoreError) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            status: MigrationStatus::Failed,
            applied,
            pending: Vec::new(),
            detail: Some(FailureDetail::from(err)),
        }
    }

    /// Whether the target failed because an applied script drifted.
    #[must_use]
    pub fn is_drift(&self) -> bool {
        self.detail.as_ref().is_some_and(|d| d.code == "DriftDetected")
    }
}

/// Aggregate counts of a fleet run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FleetSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    #[serde(rename = "scriptsApplied")]
    pub scripts_applied: usize,
    #[serde(rename = "elapsedMs")]
    pub elapsed_ms: u64,
}

/// Full result of `FleetService::migrate_fleet`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetReport {
    pub domain: super::MigrationDomain,
    #[serde(rename = "dryRun")]
    pub dry_run: bool,
    pub results: Vec<MigrationResult>,
    pub summary: FleetSummary,
}

impl FleetReport {
    #[must_use]
    pub fn new(
        domain: super::MigrationDomain,
        dry_run: bool,
        results: Vec<MigrationResult>,
        elapsed: Duration,
    ) -> Self {
        let mut summary = FleetSummary {
            total: results.len(),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            ..FleetSummary::default()
        };
        for result in &results {
            match result.status {
                MigrationStatus::Success => summary.succeeded += 1,
                MigrationStatus::Skipped => summary.skipped += 1,
                MigrationStatus::Failed => summary.failed += 1,
            }
            summary.scripts_applied += result.applied.len();
        }
        Self {
            domain,
            dry_run,
            results,
            summary,
        }
    }

    /// `true` when no target failed (skips do not count as failures).
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.summary.failed == 0
    }

    /// Ids of failed targets, for a narrower re-run.
    #[must_use]
    pub fn failed_tenants(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.status == MigrationStatus::Failed)
            .map(|r| r.tenant_id.as_str())
            .collect()
    }
}

/// Which targets a run covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TargetFilter {
    /// Every active target of the domain
    #[default]
    All,
    /// Only the listed tenant ids
    Only(Vec<String>),
}

impl TargetFilter {
    #[must_use]
    pub fn single(tenant_id: impl Into<String>) -> Self {
        Self::Only(vec![tenant_id.into()])
    }

    #[must_use]
    pub fn matches(&self, tenant_id: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(ids) => ids.iter().any(|id| id == tenant_id),
        }
    }
}

/// Tunables of a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum number of targets migrated at once
    pub concurrency: usize,
    /// Upper bound for one script execution
    pub script_timeout: Duration,
    /// Report pending scripts without applying them
    pub dry_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            script_timeout: Duration::from_secs(300),
            dry_run: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MigrationDomain;

    #[test]
    fn report_summarizes_statuses() {
        let results = vec![
            MigrationResult::success(
                "acme",
                vec![AppliedScript {
                    version: 2,
                    name: "add_well_type".to_string(),
                }],
            ),
            MigrationResult::skipped("legacy", &CoreError::UnsupportedAdapter("legacy".to_string())),
            MigrationResult::failed(
                "globex",
                Vec::new(),
                &CoreError::ScriptExecution {
                    target: "globex".to_string(),
                    version: 1,
                    message: "syntax error".to_string(),
                },
            ),
        ];
        let report = FleetReport::new(MigrationDomain::Tenant, false, results, Duration::from_millis(12));

        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.succeeded, 1);
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.scripts_applied, 1);
        assert!(!report.is_success());
        assert_eq!(report.failed_tenants(), vec!["globex"]);
    }

    #[test]
    fn result_serializes_machine_readable_detail() {
        let result = MigrationResult::failed(
            "acme",
            Vec::new(),
            &CoreError::DriftDetected {
                target: "acme".to_string(),
                version: 1,
                recorded: "aa".to_string(),
                current: "bb".to_string(),
            },
        );
        assert!(result.is_drift());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["tenantId"], "acme");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["detail"]["code"], "DriftDetected");
        assert!(json.get("pending").is_none());
    }

    #[test]
    fn filter_matches() {
        assert!(TargetFilter::All.matches("anything"));
        let only = TargetFilter::single("acme");
        assert!(only.matches("acme"));
        assert!(!only.matches("globex"));
    }
}
