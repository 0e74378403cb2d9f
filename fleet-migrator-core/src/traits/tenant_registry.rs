//! Tenant registry abstract Trait

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::types::TenantTarget;

/// Tenant Registry Trait
///
/// Read-only view of the master registry.
///
/// Platform implementation:
/// - Master database: `SeaOrmTenantRegistry` (fleet-migrator-app)
/// - Configuration file / tests: `StaticTenantRegistry`
#[async_trait]
pub trait TenantRegistry: Send + Sync {
    /// List tenants that are not soft-deleted, in registry order.
    async fn list_active_tenants(&self) -> CoreResult<Vec<TenantTarget>>;
}

/// Registry backed by a fixed list of targets.
#[derive(Debug, Clone, Default)]
pub struct StaticTenantRegistry {
    tenants: Vec<TenantTarget>,
}

impl StaticTenantRegistry {
    #[must_use]
    pub fn new(tenants: Vec<TenantTarget>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl TenantRegistry for StaticTenantRegistry {
    async fn list_active_tenants(&self) -> CoreResult<Vec<TenantTarget>> {
        Ok(self
            .tenants
            .iter()
            .filter(|t| !t.is_deleted())
            .cloned()
            .collect())
    }
}
