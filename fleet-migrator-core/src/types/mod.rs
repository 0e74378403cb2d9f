//! Type definition module

mod ledger;
mod report;
mod script;
mod target;

pub use ledger::{ChecksumCheck, LedgerEntry};
pub use report::{
    AppliedScript, FailureDetail, FleetReport, FleetSummary, MigrationResult, MigrationStatus,
    PendingScript, RunOptions, TargetFilter,
};
pub use script::{MigrationDomain, ScriptVersion};
pub use target::{AdapterKind, TargetState, TenantTarget, MASTER_TARGET_ID};
