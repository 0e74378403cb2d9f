//! Storage adapters: script files on disk, `SeaORM` ledgers and registry.

mod fs_script_store;
mod database;

pub use fs_script_store::{parse_file_name, FsScriptStore};
pub use database::{SeaOrmLedger, SeaOrmLedgerConnector, SeaOrmTenantRegistry, SeaOrmTransaction};
