//! Tenant registry stored in the master database.

use std::time::Duration;

use async_trait::async_trait;
use sea_orm::sea_query::{Alias, Expr, ExprTrait, Order, Query};
use sea_orm::{FromQueryResult, Statement};

use fleet_migrator_core::error::CoreResult;
use fleet_migrator_core::traits::TenantRegistry;
use fleet_migrator_core::types::{AdapterKind, TenantTarget, MASTER_TARGET_ID};

use super::{map_db_err, open_connection, render_query};

#[derive(Debug, FromQueryResult)]
struct TenantRow {
    id: String,
    name: Option<String>,
    connection_url: String,
    adapter: String,
}

impl TenantRow {
    fn into_target(self) -> TenantTarget {
        let mut target = TenantTarget::new(
            self.id,
            self.connection_url,
            AdapterKind::from_registry_value(&self.adapter),
        );
        if let Some(name) = self.name.filter(|n| !n.is_empty()) {
            target.name = name;
        }
        target
    }
}

/// Reads `<table>(id, name, connection_url, adapter, deleted_at)` from the master database.
///
/// Connects on every call so commands that never list tenants need no master connection.
pub struct SeaOrmTenantRegistry {
    master_url: String,
    table: String,
    connect_timeout: Duration,
}

impl SeaOrmTenantRegistry {
    pub fn new(master_url: impl Into<String>, table: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            master_url: master_url.into(),
            table: table.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl TenantRegistry for SeaOrmTenantRegistry {
    async fn list_active_tenants(&self) -> CoreResult<Vec<TenantTarget>> {
        let db = open_connection(MASTER_TARGET_ID, &self.master_url, self.connect_timeout).await?;
        let backend = db.get_database_backend();

        let query = Query::select()
            .columns([
                Alias::new("id"),
                Alias::new("name"),
                Alias::new("connection_url"),
                Alias::new("adapter"),
            ])
            .from(Alias::new(&self.table))
            .and_where(Expr::col(Alias::new("deleted_at")).is_null())
            .order_by(Alias::new("id"), Order::Asc)
            .to_owned();

        let result = TenantRow::find_by_statement(Statement::from_string(
            backend,
            render_query(backend, &query),
        ))
        .all(&db)
        .await;

        if let Err(e) = db.close().await {
            log::warn!("Failed to close registry connection: {e}");
        }

        let rows = result
            .map_err(|e| map_db_err(MASTER_TARGET_ID, "Failed to list tenants", e))?;
        let tenants: Vec<TenantTarget> = rows.into_iter().map(TenantRow::into_target).collect();
        log::debug!("Registry '{}' lists {} active tenant(s)", self.table, tenants.len());
        Ok(tenants)
    }
}
