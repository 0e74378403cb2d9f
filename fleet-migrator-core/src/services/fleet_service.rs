//! Fleet migration orchestrator
//!
//! Loads and validates the domain's scripts once, selects targets, and drives
//! `MigratorService` across them with bounded parallelism. Every target gets
//! exactly one `MigrationResult`; a failing target never affects its siblings.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};

use crate::error::{CoreError, CoreResult};
use crate::services::{CancelHandle, MigratorService, ServiceContext};
use crate::types::{
    FleetReport, MigrationDomain, MigrationResult, RunOptions, ScriptVersion, TargetFilter,
    TenantTarget,
};

/// Fleet migration orchestrator
pub struct FleetService {
    ctx: Arc<ServiceContext>,
    migrator: MigratorService,
    master: Option<TenantTarget>,
}

impl FleetService {
    /// `master` is the target `MigrationDomain::Master` runs against.
    #[must_use]
    pub fn new(ctx: Arc<ServiceContext>, master: Option<TenantTarget>) -> Self {
        Self {
            migrator: MigratorService::new(Arc::clone(&ctx)),
            ctx,
            master,
        }
    }

    /// Load and validate the scripts of a domain.
    pub async fn load_scripts(&self, domain: MigrationDomain) -> CoreResult<Vec<ScriptVersion>> {
        self.ctx.script_store().list_scripts(domain).await
    }

    /// Migrate every selected target of `domain`.
    ///
    /// # Errors
    /// Only run-level problems are errors (invalid script store, unknown tenant
    /// in `filter`, registry unreachable); nothing has been applied in that case.
    /// Per-target problems are reported inside the `FleetReport`.
    pub async fn migrate_fleet(
        &self,
        domain: MigrationDomain,
        filter: &TargetFilter,
        options: &RunOptions,
        cancel: &CancelHandle,
    ) -> CoreResult<FleetReport> {
        let started = Instant::now();

        let scripts = self.load_scripts(domain).await.inspect_err(|e| {
            log::error!("Aborting {domain} run, script store rejected: {e}");
        })?;
        let targets = self.select_targets(domain, filter).await?;

        log::info!(
            "Starting {} {domain} run: {} script(s), {} target(s), concurrency {}",
            if options.dry_run { "dry" } else { "migration" },
            scripts.len(),
            targets.len(),
            options.concurrency.max(1)
        );

        // `buffered` keeps results in target order while running up to N at once.
        let results: Vec<MigrationResult> = stream::iter(targets)
            .map(|target| self.run_target(target, &scripts, options, cancel))
            .buffered(options.concurrency.max(1))
            .collect()
            .await;

        let report = FleetReport::new(domain, options.dry_run, results, started.elapsed());
        log::info!(
            "Finished {domain} run: {} succeeded, {} skipped, {} failed, {} script(s) applied",
            report.summary.succeeded,
            report.summary.skipped,
            report.summary.failed,
            report.summary.scripts_applied
        );
        Ok(report)
    }

    /// Resolve the targets of a run.
    pub async fn select_targets(
        &self,
        domain: MigrationDomain,
        filter: &TargetFilter,
    ) -> CoreResult<Vec<TenantTarget>> {
        let candidates = match domain {
            MigrationDomain::Master => vec![self.master.clone().ok_or_else(|| {
                CoreError::ConfigError("No master database configured".to_string())
            })?],
            MigrationDomain::Tenant => self.ctx.tenant_registry().list_active_tenants().await?,
        };

        if let TargetFilter::Only(ids) = filter {
            if let Some(missing) = ids.iter().find(|id| !candidates.iter().any(|t| &t.id == *id)) {
                return Err(CoreError::TenantNotFound(missing.clone()));
            }
        }

        Ok(candidates
            .into_iter()
            .filter(|t| !t.is_deleted() && filter.matches(&t.id))
            .collect())
    }

    async fn run_target(
        &self,
        target: TenantTarget,
        scripts: &[ScriptVersion],
        options: &RunOptions,
        cancel: &CancelHandle,
    ) -> MigrationResult {
        if !target.adapter.supports_sql() {
            let reason = CoreError::UnsupportedAdapter(target.id.clone());
            log::info!("[{}] Skipped: {reason}", target.id);
            return MigrationResult::skipped(target.id, &reason);
        }

        if cancel.is_cancelled() {
            let err = CoreError::Cancelled(target.id.clone());
            log::warn!("[{}] Not started: {err}", target.id);
            return MigrationResult::failed(target.id, Vec::new(), &err);
        }

        if options.dry_run {
            return match self.migrator.pending_scripts(&target, scripts).await {
                Ok(pending) => {
                    log::info!("[{}] {} pending script(s)", target.id, pending.len());
                    let mut result = MigrationResult::success(target.id, Vec::new());
                    result.pending = pending;
                    result
                }
                Err(e) => {
                    log_target_error(&target.id, &e);
                    MigrationResult::failed(target.id, Vec::new(), &e)
                }
            };
        }

        match self
            .migrator
            .migrate_scripts(&target, scripts, options.script_timeout, cancel)
            .await
        {
            Ok(applied) => MigrationResult::success(target.id, applied),
            Err(failure) => {
                if let CoreError::UnsupportedAdapter(_) = failure.error {
                    return MigrationResult::skipped(target.id, &failure.error);
                }
                log_target_error(&target.id, &failure.error);
                MigrationResult::failed(target.id, failure.applied, &failure.error)
            }
        }
    }
}

fn log_target_error(target_id: &str, err: &CoreError) {
    if err.is_expected() {
        log::warn!("[{target_id}] {err}");
    } else {
        log::error!("[{target_id}] {err}");
    }
}
