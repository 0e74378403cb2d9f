//! Ledger table and migration lock on a `SeaORM` connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::sea_query::{Alias, ColumnDef, Expr, ExprTrait, Order, Query, Table};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, FromQueryResult,
    SqlErr, Statement, TransactionTrait,
};
use sha2::{Digest, Sha256};

use fleet_migrator_core::error::{CoreError, CoreResult};
use fleet_migrator_core::traits::{LedgerTransaction, MigrationLedger};
use fleet_migrator_core::types::LedgerEntry;
use fleet_migrator_core::utils::datetime::parse_rfc3339;

use super::{map_db_err, render_query, render_schema, StatementDeadline};

const SQLITE_LOCK_ROW: i64 = 1;

/// How long the server keeps running a script after the client gave up on it.
///
/// The client timeout fires first and reports `Timeout`; the server-side limit
/// then frees the session for the rollback.
const SERVER_TIMEOUT_SLACK: Duration = Duration::from_millis(500);

#[derive(Debug, FromQueryResult)]
struct LedgerRow {
    version: i64,
    name: String,
    checksum: String,
    applied_at: String,
    execution_ms: i64,
}

impl LedgerRow {
    fn into_entry(self) -> CoreResult<LedgerEntry> {
        Ok(LedgerEntry {
            version: self.version,
            name: self.name,
            checksum: self.checksum,
            applied_at: parse_rfc3339("applied_at", &self.applied_at)?,
            execution_ms: self.execution_ms,
        })
    }
}

#[derive(Debug, FromQueryResult)]
struct LockRow {
    locked: Option<i64>,
}

#[derive(Debug, FromQueryResult)]
struct ScopeRow {
    scope: Option<String>,
}

/// Advisory lock key of one ledger.
///
/// Advisory locks and `GET_LOCK` names are server-wide, so the key covers the
/// database (and schema) the ledger lives in as well as the table name.
fn lock_key(scope: &str, table: &str) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    hasher.update(b"/");
    hasher.update(table.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

fn lock_name(scope: &str, table: &str) -> String {
    format!("fleet-migrator:{:016x}", lock_key(scope, table))
}

/// Ledger of one target database.
pub struct SeaOrmLedger {
    target_id: String,
    table: String,
    backend: DbBackend,
    db: DatabaseConnection,
    deadline: Arc<StatementDeadline>,
    bootstrapped: AtomicBool,
}

impl SeaOrmLedger {
    /// `deadline` must be the one polled by the connection's progress handler, if any.
    pub fn new(
        target_id: &str,
        db: DatabaseConnection,
        table: &str,
        deadline: Arc<StatementDeadline>,
    ) -> Self {
        Self {
            target_id: target_id.to_string(),
            table: table.to_string(),
            backend: db.get_database_backend(),
            db,
            deadline,
            bootstrapped: AtomicBool::new(false),
        }
    }

    fn lock_table(&self) -> String {
        format!("{}_lock", self.table)
    }

    /// Identity of the connected database on its server.
    async fn lock_scope(&self) -> CoreResult<String> {
        let sql = match self.backend {
            DbBackend::Postgres => "SELECT current_database() || '.' || current_schema() AS scope",
            _ => "SELECT DATABASE() AS scope",
        };
        let row = ScopeRow::find_by_statement(Statement::from_string(self.backend, sql))
            .one(&self.db)
            .await
            .map_err(|e| map_db_err(&self.target_id, "Failed to resolve lock scope", e))?;
        Ok(row.and_then(|r| r.scope).unwrap_or_default())
    }

    async fn execute(&self, sql: &str, context: &str) -> CoreResult<()> {
        self.db
            .execute_unprepared(sql)
            .await
            .map(|_| ())
            .map_err(|e| map_db_err(&self.target_id, context, e))
    }

    async fn query_lock(&self, sql: String) -> CoreResult<bool> {
        let row = LockRow::find_by_statement(Statement::from_string(self.backend, sql))
            .one(&self.db)
            .await
            .map_err(|e| map_db_err(&self.target_id, "Failed to query migration lock", e))?;
        Ok(row.and_then(|r| r.locked) == Some(1))
    }

    /// Create the ledger table if it does not exist yet.
    async fn ensure_table(&self) -> CoreResult<()> {
        if self.bootstrapped.load(Ordering::Acquire) {
            return Ok(());
        }

        let stmt = Table::create()
            .table(Alias::new(&self.table))
            .if_not_exists()
            .col(
                ColumnDef::new(Alias::new("version"))
                    .big_integer()
                    .not_null()
                    .primary_key(),
            )
            .col(ColumnDef::new(Alias::new("name")).string_len(255).not_null())
            .col(ColumnDef::new(Alias::new("checksum")).string_len(64).not_null())
            .col(ColumnDef::new(Alias::new("applied_at")).string_len(64).not_null())
            .col(ColumnDef::new(Alias::new("execution_ms")).big_integer().not_null())
            .to_owned();
        self.execute(&render_schema(self.backend, &stmt), "Failed to create ledger table")
            .await?;

        self.bootstrapped.store(true, Ordering::Release);
        log::debug!("[{}] Ledger table '{}' ready", self.target_id, self.table);
        Ok(())
    }

    async fn acquire_sqlite_lock(&self, owner: &str) -> CoreResult<bool> {
        let create = Table::create()
            .table(Alias::new(self.lock_table()))
            .if_not_exists()
            .col(
                ColumnDef::new(Alias::new("id"))
                    .big_integer()
                    .not_null()
                    .primary_key(),
            )
            .col(ColumnDef::new(Alias::new("owner")).string_len(255).not_null())
            .col(ColumnDef::new(Alias::new("locked_at")).string_len(64).not_null())
            .to_owned();
        self.execute(&render_schema(self.backend, &create), "Failed to create lock table")
            .await?;

        let insert = Query::insert()
            .into_table(Alias::new(self.lock_table()))
            .columns([Alias::new("id"), Alias::new("owner"), Alias::new("locked_at")])
            .values([
                SQLITE_LOCK_ROW.into(),
                owner.into(),
                chrono::Utc::now().to_rfc3339().into(),
            ])
            .map_err(|e| CoreError::StorageError(e.to_string()))?
            .to_owned();

        match self.db.execute_unprepared(&render_query(self.backend, &insert)).await {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Ok(false)
            }
            Err(e) => Err(map_db_err(&self.target_id, "Failed to take migration lock", e)),
        }
    }
}

#[async_trait]
impl MigrationLedger for SeaOrmLedger {
    async fn applied_entries(&self) -> CoreResult<Vec<LedgerEntry>> {
        self.ensure_table().await?;

        let query = Query::select()
            .columns([
                Alias::new("version"),
                Alias::new("name"),
                Alias::new("checksum"),
                Alias::new("applied_at"),
                Alias::new("execution_ms"),
            ])
            .from(Alias::new(&self.table))
            .order_by(Alias::new("version"), Order::Asc)
            .to_owned();

        let rows = LedgerRow::find_by_statement(Statement::from_string(
            self.backend,
            render_query(self.backend, &query),
        ))
        .all(&self.db)
        .await
        .map_err(|e| map_db_err(&self.target_id, "Failed to read ledger", e))?;

        rows.into_iter().map(LedgerRow::into_entry).collect()
    }

    async fn acquire_lock(&self, owner: &str) -> CoreResult<()> {
        let acquired = match self.backend {
            DbBackend::Postgres => {
                let key = lock_key(&self.lock_scope().await?, &self.table);
                self.query_lock(format!(
                    "SELECT (CASE WHEN pg_try_advisory_lock({key}) THEN 1 ELSE 0 END)::BIGINT AS locked"
                ))
                .await?
            }
            DbBackend::MySql => {
                let name = lock_name(&self.lock_scope().await?, &self.table);
                self.query_lock(format!(
                    "SELECT CAST(GET_LOCK('{name}', 0) AS SIGNED) AS locked"
                ))
                .await?
            }
            _ => self.acquire_sqlite_lock(owner).await?,
        };

        if acquired {
            log::debug!("[{}] Migration lock taken by {owner}", self.target_id);
            Ok(())
        } else {
            Err(CoreError::TargetLocked(self.target_id.clone()))
        }
    }

    async fn release_lock(&self, owner: &str) -> CoreResult<()> {
        let released = match self.backend {
            DbBackend::Postgres => {
                let key = lock_key(&self.lock_scope().await?, &self.table);
                self.query_lock(format!(
                    "SELECT (CASE WHEN pg_advisory_unlock({key}) THEN 1 ELSE 0 END)::BIGINT AS locked"
                ))
                .await?
            }
            DbBackend::MySql => {
                let name = lock_name(&self.lock_scope().await?, &self.table);
                self.query_lock(format!(
                    "SELECT CAST(RELEASE_LOCK('{name}') AS SIGNED) AS locked"
                ))
                .await?
            }
            _ => {
                let delete = Query::delete()
                    .from_table(Alias::new(self.lock_table()))
                    .and_where(Expr::col(Alias::new("id")).eq(SQLITE_LOCK_ROW))
                    .and_where(Expr::col(Alias::new("owner")).eq(owner))
                    .to_owned();
                self.execute(
                    &render_query(self.backend, &delete),
                    "Failed to release migration lock",
                )
                .await?;
                true
            }
        };

        if !released {
            log::warn!("[{}] Migration lock was not held by {owner}", self.target_id);
        }
        Ok(())
    }

    async fn begin(&self) -> CoreResult<Box<dyn LedgerTransaction>> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| map_db_err(&self.target_id, "Failed to begin transaction", e))?;
        Ok(Box::new(SeaOrmTransaction {
            target_id: self.target_id.clone(),
            table: self.table.clone(),
            backend: self.backend,
            deadline: Arc::clone(&self.deadline),
            txn,
        }))
    }

    fn supports_transactional_ddl(&self) -> bool {
        // MySQL commits implicitly on DDL.
        !matches!(self.backend, DbBackend::MySql)
    }

    async fn close(&self) {
        if let Err(e) = self.db.clone().close().await {
            log::warn!("[{}] Failed to close connection: {e}", self.target_id);
        }
    }
}

/// One script's transaction. `DatabaseTransaction` rolls back when dropped.
pub struct SeaOrmTransaction {
    target_id: String,
    table: String,
    backend: DbBackend,
    deadline: Arc<StatementDeadline>,
    txn: DatabaseTransaction,
}

impl SeaOrmTransaction {
    /// Make the server abandon the script shortly after `limit`.
    async fn bound_statement(&self, limit: Duration) -> CoreResult<()> {
        let limit = limit.saturating_add(SERVER_TIMEOUT_SLACK);
        let limit_ms = limit.as_millis();
        let sql = match self.backend {
            DbBackend::Postgres => format!("SET LOCAL statement_timeout = {limit_ms}"),
            // Only read-only SELECTs honour max_execution_time.
            DbBackend::MySql => format!("SET SESSION max_execution_time = {limit_ms}"),
            _ => {
                self.deadline.arm(limit);
                return Ok(());
            }
        };
        self.txn
            .execute_unprepared(&sql)
            .await
            .map(|_| ())
            .map_err(|e| map_db_err(&self.target_id, "Failed to set statement timeout", e))
    }
}

#[async_trait]
impl LedgerTransaction for SeaOrmTransaction {
    async fn execute(&mut self, sql: &str, limit: Duration) -> CoreResult<()> {
        self.bound_statement(limit).await?;
        let result = self
            .txn
            .execute_unprepared(sql)
            .await
            .map(|_| ())
            .map_err(|e| map_db_err(&self.target_id, "Script failed", e));
        self.deadline.disarm();
        result
    }

    async fn record_applied(&mut self, entry: &LedgerEntry) -> CoreResult<()> {
        let insert = Query::insert()
            .into_table(Alias::new(&self.table))
            .columns([
                Alias::new("version"),
                Alias::new("name"),
                Alias::new("checksum"),
                Alias::new("applied_at"),
                Alias::new("execution_ms"),
            ])
            .values([
                entry.version.into(),
                entry.name.clone().into(),
                entry.checksum.clone().into(),
                entry.applied_at.to_rfc3339().into(),
                entry.execution_ms.into(),
            ])
            .map_err(|e| CoreError::StorageError(e.to_string()))?
            .to_owned();

        self.txn
            .execute_unprepared(&render_query(self.backend, &insert))
            .await
            .map(|_| ())
            .map_err(|e| map_db_err(&self.target_id, "Failed to record ledger entry", e))
    }

    async fn commit(self: Box<Self>) -> CoreResult<()> {
        let Self { target_id, txn, .. } = *self;
        txn.commit()
            .await
            .map_err(|e| map_db_err(&target_id, "Failed to commit", e))
    }

    async fn rollback(self: Box<Self>) -> CoreResult<()> {
        let Self { target_id, txn, .. } = *self;
        txn.rollback()
            .await
            .map_err(|e| map_db_err(&target_id, "Failed to roll back", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_name_differs_per_database() {
        let acme = lock_name("tenant_acme", "_fleet_migrations");
        let globex = lock_name("tenant_globex", "_fleet_migrations");

        assert_ne!(acme, globex);
        assert_eq!(acme, lock_name("tenant_acme", "_fleet_migrations"));
        // GET_LOCK names are limited to 64 characters.
        assert!(acme.len() <= 64);
    }

    #[test]
    fn lock_key_differs_per_schema_and_table() {
        let base = lock_key("fleet.tenant_acme", "_fleet_migrations");

        assert_ne!(base, lock_key("fleet.tenant_globex", "_fleet_migrations"));
        assert_ne!(base, lock_key("fleet.tenant_acme", "schema_history"));
    }
}
