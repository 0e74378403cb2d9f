//! `SeaORM`-backed ledgers and tenant registry.
//!
//! Table names are configurable, so queries are built with `sea_query` and
//! rendered for the connected backend instead of going through entities.

mod deadline;
mod ledger;
mod registry;

pub use deadline::StatementDeadline;
pub use ledger::{SeaOrmLedger, SeaOrmTransaction};
pub use registry::SeaOrmTenantRegistry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::sea_query::{
    MysqlQueryBuilder, PostgresQueryBuilder, QueryStatementWriter, SchemaStatementBuilder,
    SqliteQueryBuilder,
};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbBackend, DbErr};

use fleet_migrator_core::error::{CoreError, CoreResult};
use fleet_migrator_core::traits::{LedgerConnector, MigrationLedger};
use fleet_migrator_core::types::TenantTarget;

/// Opens a `SeaOrmLedger` per target from its connection URL.
pub struct SeaOrmLedgerConnector {
    ledger_table: String,
    connect_timeout: Duration,
}

impl SeaOrmLedgerConnector {
    pub fn new(ledger_table: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            ledger_table: ledger_table.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl LedgerConnector for SeaOrmLedgerConnector {
    async fn connect(&self, target: &TenantTarget) -> CoreResult<Arc<dyn MigrationLedger>> {
        let deadline = Arc::new(StatementDeadline::new());
        #[cfg_attr(not(feature = "sqlite"), allow(unused_mut))]
        let mut opts = connect_options(&target.url, self.connect_timeout);
        #[cfg(feature = "sqlite")]
        interrupt_at_deadline(&mut opts, &deadline);

        let db = open_pool(&target.id, opts).await?;
        let ledger: Arc<dyn MigrationLedger> = Arc::new(SeaOrmLedger::new(
            &target.id,
            db,
            &self.ledger_table,
            deadline,
        ));
        Ok(ledger)
    }
}

/// Single-connection pool options for `url`.
///
/// Session-scoped locks (advisory locks, `GET_LOCK`) only hold while every
/// statement of the run goes through the same connection.
fn connect_options(url: &str, timeout: Duration) -> ConnectOptions {
    let mut opts = ConnectOptions::new(url.to_string());
    opts.max_connections(1)
        .min_connections(1)
        .connect_timeout(timeout)
        .acquire_timeout(timeout)
        .sqlx_logging(false);
    opts
}

/// Install a progress handler on every new `SQLite` connection that interrupts
/// the running statement once `deadline` expires. No effect on other backends.
#[cfg(feature = "sqlite")]
fn interrupt_at_deadline(opts: &mut ConnectOptions, deadline: &Arc<StatementDeadline>) {
    let deadline = Arc::clone(deadline);
    opts.map_sqlx_sqlite_pool_opts(move |pool| {
        let deadline = Arc::clone(&deadline);
        pool.after_connect(move |conn, _meta| {
            let deadline = Arc::clone(&deadline);
            Box::pin(async move {
                conn.lock_handle()
                    .await?
                    .set_progress_handler(self::deadline::PROGRESS_OPS, move || {
                        !deadline.take_expired()
                    });
                Ok(())
            })
        })
    });
}

pub(crate) async fn open_connection(
    target_id: &str,
    url: &str,
    timeout: Duration,
) -> CoreResult<DatabaseConnection> {
    open_pool(target_id, connect_options(url, timeout)).await
}

async fn open_pool(target_id: &str, opts: ConnectOptions) -> CoreResult<DatabaseConnection> {
    let db = Database::connect(opts)
        .await
        .map_err(|e| CoreError::LedgerUnavailable {
            target: target_id.to_string(),
            message: e.to_string(),
        })?;
    log::debug!("[{target_id}] Connected ({:?})", db.get_database_backend());
    Ok(db)
}

/// Connectivity problems make the ledger unavailable; anything else is a storage error.
pub(crate) fn map_db_err(target_id: &str, context: &str, err: DbErr) -> CoreError {
    match err {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => CoreError::LedgerUnavailable {
            target: target_id.to_string(),
            message: format!("{context}: {err}"),
        },
        other => CoreError::StorageError(format!("[{target_id}] {context}: {other}")),
    }
}

pub(crate) fn render_query<S: QueryStatementWriter>(backend: DbBackend, stmt: &S) -> String {
    match backend {
        DbBackend::Postgres => stmt.to_string(PostgresQueryBuilder),
        DbBackend::MySql => stmt.to_string(MysqlQueryBuilder),
        _ => stmt.to_string(SqliteQueryBuilder),
    }
}

pub(crate) fn render_schema<S: SchemaStatementBuilder>(backend: DbBackend, stmt: &S) -> String {
    match backend {
        DbBackend::Postgres => stmt.to_string(PostgresQueryBuilder),
        DbBackend::MySql => stmt.to_string(MysqlQueryBuilder),
        _ => stmt.to_string(SqliteQueryBuilder),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::sea_query::{Alias, Query};

    #[test]
    fn renders_identifiers_per_backend() {
        let query = Query::select()
            .column(Alias::new("version"))
            .from(Alias::new("_fleet_migrations"))
            .to_owned();

        assert_eq!(
            render_query(DbBackend::Postgres, &query),
            r#"SELECT "version" FROM "_fleet_migrations""#
        );
        assert_eq!(
            render_query(DbBackend::MySql, &query),
            "SELECT `version` FROM `_fleet_migrations`"
        );
        assert_eq!(
            render_query(DbBackend::Sqlite, &query),
            r#"SELECT "version" FROM "_fleet_migrations""#
        );
    }

    #[test]
    fn connection_errors_make_ledger_unavailable() {
        let err = map_db_err(
            "acme",
            "Failed to read ledger",
            DbErr::Conn(sea_orm::RuntimeErr::Internal("refused".to_string())),
        );
        assert!(matches!(err, CoreError::LedgerUnavailable { ref target, .. } if target == "acme"));

        let err = map_db_err("acme", "Failed to read ledger", DbErr::Custom("boom".to_string()));
        assert!(matches!(err, CoreError::StorageError(_)));
    }
}
