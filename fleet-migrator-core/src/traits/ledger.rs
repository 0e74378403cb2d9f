//! Migration ledger abstract Traits
//!
//! A ledger is the per-database table of applied script versions. Script SQL and
//! the ledger row for it are written through the same `LedgerTransaction`, so
//! both commit together or not at all.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::types::{ChecksumCheck, LedgerEntry, TenantTarget};

/// Opens ledgers for targets.
#[async_trait]
pub trait LedgerConnector: Send + Sync {
    /// Connect to the target database.
    ///
    /// # Errors
    /// `CoreError::LedgerUnavailable` if the database cannot be reached.
    async fn connect(&self, target: &TenantTarget) -> CoreResult<Arc<dyn MigrationLedger>>;
}

/// Ledger of one connected target.
#[async_trait]
pub trait MigrationLedger: Send + Sync {
    /// All ledger entries, ordered by version.
    ///
    /// An absent ledger table is created and reported as empty.
    /// Connectivity failures surface as `CoreError::LedgerUnavailable`.
    async fn applied_entries(&self) -> CoreResult<Vec<LedgerEntry>>;

    /// Compare the ledger checksum of `version` with `expected`.
    async fn verify_checksum(&self, version: i64, expected: &str) -> CoreResult<ChecksumCheck> {
        let entries = self.applied_entries().await?;
        Ok(ChecksumCheck::compare(
            entries.iter().find(|e| e.version == version),
            expected,
        ))
    }

    /// Take the cross-process migration lock of the target.
    ///
    /// # Errors
    /// `CoreError::TargetLocked` if another migrator holds it.
    async fn acquire_lock(&self, owner: &str) -> CoreResult<()>;

    /// Release the lock taken by `acquire_lock`.
    async fn release_lock(&self, owner: &str) -> CoreResult<()>;

    /// Open the transaction one script is applied in.
    async fn begin(&self) -> CoreResult<Box<dyn LedgerTransaction>>;

    /// Whether DDL statements participate in transactions on this backend.
    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    /// Release connections held for this target.
    async fn close(&self) {}
}

/// Transaction scoped to one script.
///
/// Dropping a transaction without `commit` must roll it back.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Execute raw script SQL (may contain several statements).
    ///
    /// Backends that can should have the server abandon the script once `limit`
    /// has passed, so a caller that stopped waiting can still roll back.
    async fn execute(&mut self, sql: &str, limit: Duration) -> CoreResult<()>;

    /// Insert the ledger row for the script being applied.
    async fn record_applied(&mut self, entry: &LedgerEntry) -> CoreResult<()>;

    async fn commit(self: Box<Self>) -> CoreResult<()>;

    async fn rollback(self: Box<Self>) -> CoreResult<()>;
}
