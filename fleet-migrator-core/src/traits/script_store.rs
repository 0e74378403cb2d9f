//! Migration script store abstract Trait

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{CoreError, CoreResult};
use crate::types::{MigrationDomain, ScriptVersion};

/// Script Store Trait
///
/// Platform implementation:
/// - Filesystem: `FsScriptStore` (fleet-migrator-app)
/// - Embedded / tests: `InMemoryScriptStore`
#[async_trait]
pub trait ScriptStore: Send + Sync {
    /// List the scripts of a domain in strictly increasing version order.
    ///
    /// # Errors
    /// `CoreError::DuplicateVersion` if two scripts share a version.
    async fn list_scripts(&self, domain: MigrationDomain) -> CoreResult<Vec<ScriptVersion>>;
}

/// Sorts scripts by version and rejects duplicates and domain mix-ups.
pub fn validate_scripts(
    domain: MigrationDomain,
    mut scripts: Vec<ScriptVersion>,
) -> CoreResult<Vec<ScriptVersion>> {
    if let Some(foreign) = scripts.iter().find(|s| s.domain != domain) {
        return Err(CoreError::InvalidScript {
            name: foreign.label(),
            reason: format!("belongs to domain '{}', not '{domain}'", foreign.domain),
        });
    }

    scripts.sort_by_key(|s| s.version);
    if let Some(pair) = scripts.windows(2).find(|w| w[0].version == w[1].version) {
        return Err(CoreError::DuplicateVersion {
            domain: domain.to_string(),
            version: pair[0].version,
        });
    }
    Ok(scripts)
}

/// In-memory script store
///
/// Used for compiled-in scripts and tests.
#[derive(Clone, Default)]
pub struct InMemoryScriptStore {
    scripts: Arc<RwLock<HashMap<MigrationDomain, Vec<ScriptVersion>>>>,
}

impl InMemoryScriptStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a script. Validation happens on `list_scripts`, so a duplicate is
    /// reported when a run starts rather than here.
    pub async fn add(&self, script: ScriptVersion) {
        self.scripts
            .write()
            .await
            .entry(script.domain)
            .or_default()
            .push(script);
    }

    /// Replace the text of an existing script (simulates an edited file).
    pub async fn replace_sql(&self, domain: MigrationDomain, version: i64, sql: &str) -> bool {
        let mut scripts = self.scripts.write().await;
        scripts
            .get_mut(&domain)
            .and_then(|list| list.iter_mut().find(|s| s.version == version))
            .map(|s| s.sql = sql.to_string())
            .is_some()
    }
}

#[async_trait]
impl ScriptStore for InMemoryScriptStore {
    async fn list_scripts(&self, domain: MigrationDomain) -> CoreResult<Vec<ScriptVersion>> {
        let scripts = self
            .scripts
            .read()
            .await
            .get(&domain)
            .cloned()
            .unwrap_or_default();
        validate_scripts(domain, scripts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant_script(version: i64, name: &str) -> ScriptVersion {
        ScriptVersion::new(version, name, MigrationDomain::Tenant, format!("-- {name}"))
    }

    #[tokio::test]
    async fn list_scripts_returns_sorted_versions() {
        let store = InMemoryScriptStore::new();
        store.add(tenant_script(3, "c")).await;
        store.add(tenant_script(1, "a")).await;
        store.add(tenant_script(2, "b")).await;

        let versions: Vec<i64> = store
            .list_scripts(MigrationDomain::Tenant)
            .await
            .unwrap()
            .iter()
            .map(|s| s.version)
            .collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn duplicate_version_is_rejected() {
        let store = InMemoryScriptStore::new();
        store.add(tenant_script(1, "a")).await;
        store.add(tenant_script(1, "a_again")).await;

        let err = store.list_scripts(MigrationDomain::Tenant).await.unwrap_err();
        assert!(matches!(err, CoreError::DuplicateVersion { version: 1, .. }));
    }

    #[tokio::test]
    async fn domains_are_independent() {
        let store = InMemoryScriptStore::new();
        store.add(tenant_script(1, "a")).await;
        store
            .add(ScriptVersion::new(1, "registry", MigrationDomain::Master, "-- registry"))
            .await;

        assert_eq!(store.list_scripts(MigrationDomain::Master).await.unwrap().len(), 1);
        assert_eq!(store.list_scripts(MigrationDomain::Tenant).await.unwrap().len(), 1);
    }

    #[test]
    fn foreign_domain_is_invalid() {
        let err = validate_scripts(MigrationDomain::Master, vec![tenant_script(1, "a")]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidScript { .. }));
    }
}
