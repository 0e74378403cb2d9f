//! Business logic service layer

mod cancel;
mod fleet_service;
mod migrator_service;
mod target_locks;

pub use cancel::CancelHandle;
pub use fleet_service::FleetService;
pub use migrator_service::{MigrationFailure, MigratorService};
pub use target_locks::TargetLocks;

use std::sync::Arc;

use crate::traits::{LedgerConnector, ScriptStore, TenantRegistry};

/// Service context - holds all dependencies
///
/// Frontends build this once and inject their storage implementations.
pub struct ServiceContext {
    script_store: Arc<dyn ScriptStore>,
    ledger_connector: Arc<dyn LedgerConnector>,
    tenant_registry: Arc<dyn TenantRegistry>,
}

impl ServiceContext {
    /// Create service context
    #[must_use]
    pub fn new(
        script_store: Arc<dyn ScriptStore>,
        ledger_connector: Arc<dyn LedgerConnector>,
        tenant_registry: Arc<dyn TenantRegistry>,
    ) -> Self {
        Self {
            script_store,
            ledger_connector,
            tenant_registry,
        }
    }

    #[must_use]
    pub fn script_store(&self) -> &Arc<dyn ScriptStore> {
        &self.script_store
    }

    #[must_use]
    pub fn ledger_connector(&self) -> &Arc<dyn LedgerConnector> {
        &self.ledger_connector
    }

    #[must_use]
    pub fn tenant_registry(&self) -> &Arc<dyn TenantRegistry> {
        &self.tenant_registry
    }
}
