//! Storage layer abstraction trait definition

mod ledger;
mod script_store;
mod tenant_registry;

pub use ledger::{LedgerConnector, LedgerTransaction, MigrationLedger};
pub use script_store::{validate_scripts, InMemoryScriptStore, ScriptStore};
pub use tenant_registry::{StaticTenantRegistry, TenantRegistry};
