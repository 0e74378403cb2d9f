//! Test helper module
//!
//! Provides mock implementations and convenient test factory methods.
//!
//! `MockLedger` interprets script SQL loosely: text starting with `FAIL` errors,
//! text starting with `SLEEP` never finishes, text starting with `STALL` never
//! finishes and also blocks every later call on the same ledger (a session stuck
//! on the server), anything else succeeds.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{CoreError, CoreResult};
use crate::services::{CancelHandle, FleetService, MigratorService, ServiceContext};
use crate::traits::{
    InMemoryScriptStore, LedgerConnector, LedgerTransaction, MigrationLedger,
    StaticTenantRegistry,
};
use crate::types::{AdapterKind, LedgerEntry, MigrationDomain, ScriptVersion, TenantTarget};

// ===== MockLedger =====

#[derive(Default)]
struct LedgerState {
    entries: BTreeMap<i64, LedgerEntry>,
    executed: Vec<String>,
    lock_owner: Option<String>,
    rollbacks: usize,
    stalled: bool,
    /// Cancel the run once a script starting with this prefix has executed
    cancel_on: Option<(String, CancelHandle)>,
}

async fn stall_forever() {
    tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
}

pub struct MockLedger {
    target_id: String,
    state: Arc<RwLock<LedgerState>>,
}

impl MockLedger {
    pub fn new(target_id: &str) -> Self {
        Self {
            target_id: target_id.to_string(),
            state: Arc::new(RwLock::new(LedgerState::default())),
        }
    }

    /// Mark `script` as already applied.
    pub async fn seed(&self, script: &ScriptVersion) {
        self.state.write().await.entries.insert(
            script.version,
            LedgerEntry {
                version: script.version,
                name: script.name.clone(),
                checksum: script.checksum(),
                applied_at: Utc::now(),
                execution_ms: 0,
            },
        );
    }

    pub async fn versions(&self) -> Vec<i64> {
        self.state.read().await.entries.keys().copied().collect()
    }

    pub async fn entries(&self) -> Vec<LedgerEntry> {
        self.state.read().await.entries.values().cloned().collect()
    }

    /// SQL of committed scripts, in commit order.
    pub async fn executed(&self) -> Vec<String> {
        self.state.read().await.executed.clone()
    }

    pub async fn rollbacks(&self) -> usize {
        self.state.read().await.rollbacks
    }

    pub async fn is_locked(&self) -> bool {
        self.state.read().await.lock_owner.is_some()
    }

    /// Trigger `cancel` right after a script whose SQL starts with `prefix` executes.
    pub async fn cancel_on(&self, prefix: &str, cancel: CancelHandle) {
        self.state.write().await.cancel_on = Some((prefix.to_string(), cancel));
    }

    async fn is_stalled(&self) -> bool {
        self.state.read().await.stalled
    }
}

#[async_trait]
impl MigrationLedger for MockLedger {
    async fn applied_entries(&self) -> CoreResult<Vec<LedgerEntry>> {
        Ok(self.entries().await)
    }

    async fn acquire_lock(&self, owner: &str) -> CoreResult<()> {
        let mut state = self.state.write().await;
        match state.lock_owner {
            Some(_) => Err(CoreError::TargetLocked(self.target_id.clone())),
            None => {
                state.lock_owner = Some(owner.to_string());
                Ok(())
            }
        }
    }

    async fn release_lock(&self, owner: &str) -> CoreResult<()> {
        if self.is_stalled().await {
            stall_forever().await;
        }
        let mut state = self.state.write().await;
        if state.lock_owner.as_deref() == Some(owner) {
            state.lock_owner = None;
        }
        Ok(())
    }

    async fn begin(&self) -> CoreResult<Box<dyn LedgerTransaction>> {
        Ok(Box::new(MockTransaction {
            state: Arc::clone(&self.state),
            executed: Vec::new(),
            entries: Vec::new(),
        }))
    }

    async fn close(&self) {
        if self.is_stalled().await {
            stall_forever().await;
        }
    }
}

/// Buffers writes until commit; dropping it discards them.
struct MockTransaction {
    state: Arc<RwLock<LedgerState>>,
    executed: Vec<String>,
    entries: Vec<LedgerEntry>,
}

#[async_trait]
impl LedgerTransaction for MockTransaction {
    async fn execute(&mut self, sql: &str, _limit: Duration) -> CoreResult<()> {
        // Let concurrent migrations interleave here.
        tokio::task::yield_now().await;

        if sql.starts_with("FAIL") {
            return Err(CoreError::StorageError(format!("syntax error near '{sql}'")));
        }
        if sql.starts_with("SLEEP") {
            stall_forever().await;
        }
        if sql.starts_with("STALL") {
            self.state.write().await.stalled = true;
            stall_forever().await;
        }
        self.executed.push(sql.to_string());

        if let Some((prefix, cancel)) = &self.state.read().await.cancel_on {
            if sql.starts_with(prefix.as_str()) {
                cancel.cancel();
            }
        }
        Ok(())
    }

    async fn record_applied(&mut self, entry: &LedgerEntry) -> CoreResult<()> {
        self.entries.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> CoreResult<()> {
        let mut state = self.state.write().await;
        state.executed.extend(self.executed);
        for entry in self.entries {
            state.entries.insert(entry.version, entry);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> CoreResult<()> {
        if self.state.read().await.stalled {
            stall_forever().await;
        }
        self.state.write().await.rollbacks += 1;
        Ok(())
    }
}

// ===== MockConnector =====

pub struct MockConnector {
    ledgers: RwLock<HashMap<String, Arc<MockLedger>>>,
    unreachable: RwLock<HashSet<String>>,
    connects: RwLock<usize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            ledgers: RwLock::new(HashMap::new()),
            unreachable: RwLock::new(HashSet::new()),
            connects: RwLock::new(0),
        }
    }

    /// Ledger of `target_id`, created empty on first use.
    pub async fn ledger(&self, target_id: &str) -> Arc<MockLedger> {
        Arc::clone(
            self.ledgers
                .write()
                .await
                .entry(target_id.to_string())
                .or_insert_with(|| Arc::new(MockLedger::new(target_id))),
        )
    }

    pub async fn set_unreachable(&self, target_id: &str) {
        self.unreachable.write().await.insert(target_id.to_string());
    }

    pub async fn connect_count(&self) -> usize {
        *self.connects.read().await
    }
}

#[async_trait]
impl LedgerConnector for MockConnector {
    async fn connect(&self, target: &TenantTarget) -> CoreResult<Arc<dyn MigrationLedger>> {
        *self.connects.write().await += 1;
        if self.unreachable.read().await.contains(&target.id) {
            return Err(CoreError::LedgerUnavailable {
                target: target.id.clone(),
                message: "connection refused".to_string(),
            });
        }
        let ledger: Arc<dyn MigrationLedger> = self.ledger(&target.id).await;
        Ok(ledger)
    }
}

// ===== Factories =====

pub fn tenant_script(version: i64, name: &str, sql: &str) -> ScriptVersion {
    ScriptVersion::new(version, name, MigrationDomain::Tenant, sql)
}

pub fn relational_target(id: &str) -> TenantTarget {
    TenantTarget::new(id, format!("mock://{id}"), AdapterKind::Relational)
}

fn create_test_context(
    store: InMemoryScriptStore,
    tenants: Vec<TenantTarget>,
) -> (Arc<ServiceContext>, Arc<MockConnector>) {
    let connector = Arc::new(MockConnector::new());
    let ctx = Arc::new(ServiceContext::new(
        Arc::new(store),
        connector.clone(),
        Arc::new(StaticTenantRegistry::new(tenants)),
    ));
    (ctx, connector)
}

pub fn create_test_migrator(store: InMemoryScriptStore) -> (MigratorService, Arc<MockConnector>) {
    let (ctx, connector) = create_test_context(store, Vec::new());
    (MigratorService::new(ctx), connector)
}

pub fn create_test_fleet(
    store: InMemoryScriptStore,
    tenants: Vec<TenantTarget>,
    master: Option<TenantTarget>,
) -> (FleetService, Arc<MockConnector>) {
    let (ctx, connector) = create_test_context(store, tenants);
    (FleetService::new(ctx, master), connector)
}
