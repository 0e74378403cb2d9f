//! Application bootstrap for Fleet Migrator.
//!
//! Provides `AppState` (service container), `AppStateBuilder` (adapter injection)
//! and the TOML configuration that selects the production adapters.

pub mod adapters;
pub mod config;

use std::sync::Arc;

use fleet_migrator_core::error::{CoreError, CoreResult};
use fleet_migrator_core::services::{FleetService, ServiceContext};
use fleet_migrator_core::traits::{
    LedgerConnector, ScriptStore, StaticTenantRegistry, TenantRegistry,
};
use fleet_migrator_core::types::{RunOptions, TenantTarget};

use adapters::{FsScriptStore, SeaOrmLedgerConnector, SeaOrmTenantRegistry};
use config::{FleetConfig, RegistrySource};

/// Application state.
///
/// Holds the services and the `ServiceContext`. Frontends construct this once
/// at startup via `AppStateBuilder` or `AppState::from_config`.
pub struct AppState {
    /// Service context (holds all adapters)
    pub ctx: Arc<ServiceContext>,
    /// Fleet orchestrator
    pub fleet_service: FleetService,
    /// Defaults for runs started from this state
    pub run_options: RunOptions,
}

impl AppState {
    /// Wire the production adapters described by `config`.
    ///
    /// No database is contacted here; connections are opened per target when a
    /// run starts.
    pub fn from_config(config: &FleetConfig) -> CoreResult<Self> {
        config.validate()?;

        let script_store = Arc::new(FsScriptStore::new(&config.scripts_dir));
        let ledger_connector = Arc::new(SeaOrmLedgerConnector::new(
            &config.ledger_table,
            config.connect_timeout(),
        ));

        let tenant_registry: Arc<dyn TenantRegistry> = match config.registry.source {
            RegistrySource::Static => {
                Arc::new(StaticTenantRegistry::new(config.registry.tenants.clone()))
            }
            RegistrySource::Database => {
                let master = config.master.as_ref().ok_or_else(|| {
                    CoreError::ConfigError(
                        "registry.source = \"database\" requires [master] url".to_string(),
                    )
                })?;
                Arc::new(SeaOrmTenantRegistry::new(
                    &master.url,
                    &config.registry.table,
                    config.connect_timeout(),
                ))
            }
        };

        let mut builder = AppStateBuilder::new()
            .script_store(script_store)
            .ledger_connector(ledger_connector)
            .tenant_registry(tenant_registry)
            .run_options(config.run_options());
        if let Some(master) = config.master_target() {
            builder = builder.master(master);
        }
        builder.build()
    }
}

/// Builder for constructing `AppState` with injected adapters.
///
/// # Required adapters
/// - `script_store` — where migration scripts come from
/// - `ledger_connector` — how target databases are opened
///
/// # Optional
/// - `tenant_registry` — defaults to an empty `StaticTenantRegistry`
/// - `master` — the master database target; master runs fail without it
pub struct AppStateBuilder {
    script_store: Option<Arc<dyn ScriptStore>>,
    ledger_connector: Option<Arc<dyn LedgerConnector>>,
    tenant_registry: Option<Arc<dyn TenantRegistry>>,
    master: Option<TenantTarget>,
    run_options: RunOptions,
}

impl AppStateBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            script_store: None,
            ledger_connector: None,
            tenant_registry: None,
            master: None,
            run_options: RunOptions::default(),
        }
    }

    #[must_use]
    pub fn script_store(mut self, store: Arc<dyn ScriptStore>) -> Self {
        self.script_store = Some(store);
        self
    }

    #[must_use]
    pub fn ledger_connector(mut self, connector: Arc<dyn LedgerConnector>) -> Self {
        self.ledger_connector = Some(connector);
        self
    }

    #[must_use]
    pub fn tenant_registry(mut self, registry: Arc<dyn TenantRegistry>) -> Self {
        self.tenant_registry = Some(registry);
        self
    }

    #[must_use]
    pub fn master(mut self, master: TenantTarget) -> Self {
        self.master = Some(master);
        self
    }

    #[must_use]
    pub fn run_options(mut self, options: RunOptions) -> Self {
        self.run_options = options;
        self
    }

    /// Build the `AppState`.
    ///
    /// # Errors
    /// Returns `CoreError::ConfigError` if required adapters are missing.
    pub fn build(self) -> CoreResult<AppState> {
        let script_store = self
            .script_store
            .ok_or_else(|| CoreError::ConfigError("script_store is required".to_string()))?;
        let ledger_connector = self
            .ledger_connector
            .ok_or_else(|| CoreError::ConfigError("ledger_connector is required".to_string()))?;
        let tenant_registry = self
            .tenant_registry
            .unwrap_or_else(|| Arc::new(StaticTenantRegistry::default()));

        let ctx = Arc::new(ServiceContext::new(
            script_store,
            ledger_connector,
            tenant_registry,
        ));
        let fleet_service = FleetService::new(Arc::clone(&ctx), self.master);

        Ok(AppState {
            ctx,
            fleet_service,
            run_options: self.run_options,
        })
    }
}

impl Default for AppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}
