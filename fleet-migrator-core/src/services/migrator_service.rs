//! Single-database migrator
//!
//! Applies the pending scripts of one domain to one target:
//! connect -> lock -> read ledger -> drift/order checks -> apply each script in
//! its own transaction -> release lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::time::timeout;

use crate::error::{CoreError, CoreResult};
use crate::services::{CancelHandle, ServiceContext, TargetLocks};
use crate::traits::{LedgerTransaction, MigrationLedger};
use crate::types::{
    AppliedScript, ChecksumCheck, LedgerEntry, MigrationDomain, PendingScript, ScriptVersion,
    TargetState, TenantTarget,
};

/// Upper bound for each of rollback, lock release and disconnect.
///
/// After a script timed out the session may still be busy on the server; the
/// target is then abandoned instead of waiting for it.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Failed migration of one target, with whatever was committed before the failure.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct MigrationFailure {
    /// Scripts committed before the failure; they stay applied
    pub applied: Vec<AppliedScript>,
    pub error: CoreError,
    /// Terminal state the target ended in
    pub state: TargetState,
}

impl MigrationFailure {
    fn before_start(error: CoreError) -> Self {
        Self {
            applied: Vec::new(),
            error,
            state: TargetState::Failed,
        }
    }
}

/// Pending work computed from the store and the ledger.
struct Plan<'a> {
    pending: Vec<&'a ScriptVersion>,
}

/// Single-database migrator
pub struct MigratorService {
    ctx: Arc<ServiceContext>,
    locks: TargetLocks,
    lock_owner: String,
}

impl MigratorService {
    /// Create a migrator instance
    #[must_use]
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self {
            ctx,
            locks: TargetLocks::new(),
            lock_owner: format!("fleet-migrator:{}", std::process::id()),
        }
    }

    /// Apply all pending scripts of `domain` to `target`.
    ///
    /// Returns the scripts applied by this call (empty if the target is up to date).
    pub async fn migrate(
        &self,
        target: &TenantTarget,
        domain: MigrationDomain,
        script_timeout: Duration,
        cancel: &CancelHandle,
    ) -> Result<Vec<AppliedScript>, MigrationFailure> {
        let scripts = self
            .ctx
            .script_store()
            .list_scripts(domain)
            .await
            .map_err(MigrationFailure::before_start)?;
        self.migrate_scripts(target, &scripts, script_timeout, cancel)
            .await
    }

    /// Apply pending scripts from an already loaded, validated script list.
    pub async fn migrate_scripts(
        &self,
        target: &TenantTarget,
        scripts: &[ScriptVersion],
        script_timeout: Duration,
        cancel: &CancelHandle,
    ) -> Result<Vec<AppliedScript>, MigrationFailure> {
        if !target.adapter.supports_sql() {
            return Err(MigrationFailure {
                applied: Vec::new(),
                error: CoreError::UnsupportedAdapter(target.id.clone()),
                state: TargetState::NotStarted,
            });
        }

        let _guard = self.locks.lock(&target.id).await;
        let ledger = self
            .ctx
            .ledger_connector()
            .connect(target)
            .await
            .map_err(MigrationFailure::before_start)?;

        if let Err(e) = ledger.acquire_lock(&self.lock_owner).await {
            ledger.close().await;
            return Err(MigrationFailure::before_start(e));
        }

        let outcome = self
            .apply_pending(target, ledger.as_ref(), scripts, script_timeout, cancel)
            .await;

        match timeout(CLEANUP_TIMEOUT, ledger.release_lock(&self.lock_owner)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("[{}] Failed to release migration lock: {e}", target.id),
            Err(_) => log::warn!(
                "[{}] Lock release did not finish in {}s",
                target.id,
                CLEANUP_TIMEOUT.as_secs()
            ),
        }
        if timeout(CLEANUP_TIMEOUT, ledger.close()).await.is_err() {
            log::warn!(
                "[{}] Connection did not close in {}s, dropping it",
                target.id,
                CLEANUP_TIMEOUT.as_secs()
            );
        }

        outcome
    }

    /// Scripts that `migrate_scripts` would apply, without applying them.
    ///
    /// Drift and ordering checks run exactly as in a real migration.
    pub async fn pending_scripts(
        &self,
        target: &TenantTarget,
        scripts: &[ScriptVersion],
    ) -> CoreResult<Vec<PendingScript>> {
        if !target.adapter.supports_sql() {
            return Err(CoreError::UnsupportedAdapter(target.id.clone()));
        }

        let ledger = self.ctx.ledger_connector().connect(target).await?;
        let entries = ledger.applied_entries().await;
        ledger.close().await;

        let entries = entries?;
        let plan = plan_pending(&target.id, scripts, &entries)?;
        Ok(plan
            .pending
            .into_iter()
            .map(|s| PendingScript {
                version: s.version,
                name: s.name.clone(),
                checksum: s.checksum(),
            })
            .collect())
    }

    async fn apply_pending(
        &self,
        target: &TenantTarget,
        ledger: &dyn MigrationLedger,
        scripts: &[ScriptVersion],
        script_timeout: Duration,
        cancel: &CancelHandle,
    ) -> Result<Vec<AppliedScript>, MigrationFailure> {
        let entries = ledger
            .applied_entries()
            .await
            .map_err(MigrationFailure::before_start)?;

        let plan = match plan_pending(&target.id, scripts, &entries) {
            Ok(plan) => plan,
            Err(e) => {
                let state = if matches!(e, CoreError::DriftDetected { .. }) {
                    TargetState::DriftDetected
                } else {
                    TargetState::Failed
                };
                log::error!("[{}] {state}: {e}", target.id);
                return Err(MigrationFailure {
                    applied: Vec::new(),
                    error: e,
                    state,
                });
            }
        };

        if plan.pending.is_empty() {
            log::info!("[{}] Up to date ({} scripts applied)", target.id, entries.len());
            return Ok(Vec::new());
        }

        if !ledger.supports_transactional_ddl() {
            log::warn!(
                "[{}] Backend does not roll back DDL; a failed script may leave partial schema changes",
                target.id
            );
        }

        log::info!("[{}] {} pending script(s)", target.id, plan.pending.len());

        let mut applied = Vec::with_capacity(plan.pending.len());
        for script in plan.pending {
            if cancel.is_cancelled() {
                log::warn!(
                    "[{}] Cancelled before script {} ({} applied)",
                    target.id,
                    script.version,
                    applied.len()
                );
                return Err(MigrationFailure {
                    applied,
                    error: CoreError::Cancelled(target.id.clone()),
                    state: TargetState::Failed,
                });
            }

            log::debug!(
                "[{}] {}: {}",
                target.id,
                TargetState::Applying(script.version),
                script.label()
            );

            if let Err(e) = self
                .apply_one(&target.id, ledger, script, script_timeout)
                .await
            {
                log::error!(
                    "[{}] Script {} failed, stopping ({} applied in this run): {e}",
                    target.id,
                    script.label(),
                    applied.len()
                );
                return Err(MigrationFailure {
                    applied,
                    error: e,
                    state: TargetState::Failed,
                });
            }

            applied.push(AppliedScript {
                version: script.version,
                name: script.name.clone(),
            });
        }

        log::info!("[{}] {}: applied {} script(s)", target.id, TargetState::Complete, applied.len());
        Ok(applied)
    }

    /// Apply one script inside its own transaction.
    ///
    /// On any error the transaction is rolled back; earlier scripts are untouched.
    async fn apply_one(
        &self,
        target_id: &str,
        ledger: &dyn MigrationLedger,
        script: &ScriptVersion,
        script_timeout: Duration,
    ) -> CoreResult<()> {
        let started = Instant::now();
        let mut tx = ledger.begin().await?;

        match timeout(script_timeout, tx.execute(&script.sql, script_timeout)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                rollback(target_id, tx).await;
                return Err(match e {
                    CoreError::LedgerUnavailable { .. } => e,
                    other => CoreError::ScriptExecution {
                        target: target_id.to_string(),
                        version: script.version,
                        message: other.to_string(),
                    },
                });
            }
            Err(_) => {
                rollback(target_id, tx).await;
                return Err(CoreError::Timeout {
                    target: target_id.to_string(),
                    version: script.version,
                    limit_ms: u64::try_from(script_timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }

        let entry = LedgerEntry {
            version: script.version,
            name: script.name.clone(),
            checksum: script.checksum(),
            applied_at: Utc::now(),
            execution_ms: i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX),
        };

        if let Err(e) = tx.record_applied(&entry).await {
            rollback(target_id, tx).await;
            return Err(e);
        }

        tx.commit().await?;
        log::info!(
            "[{target_id}] Applied {} in {}ms",
            script.label(),
            entry.execution_ms
        );
        Ok(())
    }
}

async fn rollback(target_id: &str, tx: Box<dyn LedgerTransaction>) {
    match timeout(CLEANUP_TIMEOUT, tx.rollback()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("[{target_id}] Rollback failed: {e}"),
        // The dropped transaction rolls back once the session is free again.
        Err(_) => log::error!(
            "[{target_id}] Rollback did not finish in {}s, abandoning the transaction",
            CLEANUP_TIMEOUT.as_secs()
        ),
    }
}

/// Compute the pending subset of `scripts` given the ledger `entries`.
///
/// Fails on drift (an applied script whose text changed) and on a pending
/// script that sorts below the newest applied version.
fn plan_pending<'a>(
    target_id: &str,
    scripts: &'a [ScriptVersion],
    entries: &[LedgerEntry],
) -> CoreResult<Plan<'a>> {
    let by_version: HashMap<i64, &LedgerEntry> = entries.iter().map(|e| (e.version, e)).collect();
    let latest_applied = entries.iter().map(|e| e.version).max();

    let mut pending = Vec::new();
    for script in scripts {
        let expected = script.checksum();
        match ChecksumCheck::compare(by_version.get(&script.version).copied(), &expected) {
            ChecksumCheck::Match => {}
            ChecksumCheck::Mismatch { recorded } => {
                return Err(CoreError::DriftDetected {
                    target: target_id.to_string(),
                    version: script.version,
                    recorded,
                    current: expected,
                });
            }
            ChecksumCheck::Missing => pending.push(script),
        }
    }

    if let (Some(first), Some(latest)) = (pending.first(), latest_applied) {
        if first.version < latest {
            return Err(CoreError::OutOfOrder {
                target: target_id.to_string(),
                version: first.version,
                latest_applied: latest,
            });
        }
    }

    let known: Vec<i64> = scripts.iter().map(|s| s.version).collect();
    for entry in entries.iter().filter(|e| !known.contains(&e.version)) {
        log::warn!(
            "[{target_id}] Ledger has version {} ({}) that is not in the script store",
            entry.version,
            entry.name
        );
    }

    Ok(Plan { pending })
}
