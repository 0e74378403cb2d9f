//! Fleet Migrator Core Library
//!
//! Provides the platform-independent migration workflow:
//! - Script store (ordered, immutable SQL scripts per migration domain)
//! - Migration ledger (per-database record of applied versions)
//! - Single-database migrator (`MigratorService`)
//! - Fleet orchestrator (`FleetService`)
//!
//! Storage and connectivity are abstracted through traits so the same logic
//! runs against `SeaORM` connections in production and in-memory mocks in tests.

pub mod error;
pub mod services;
pub mod traits;
pub mod types;
pub mod utils;

#[cfg(test)]
mod test_utils;

// Re-export common types
pub use error::{CoreError, CoreResult};
pub use services::{CancelHandle, FleetService, MigratorService};
pub use traits::{LedgerConnector, LedgerTransaction, MigrationLedger, ScriptStore, TenantRegistry};
