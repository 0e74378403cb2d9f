//! TOML configuration for Fleet Migrator.
//!
//! ```toml
//! scripts_dir = "migrations"
//! ledger_table = "_fleet_migrations"
//! concurrency = 4
//! script_timeout_secs = 300
//!
//! [master]
//! url = "postgres://localhost/master"
//!
//! [registry]
//! source = "database"
//! table = "tenants"
//! ```

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use fleet_migrator_core::error::{CoreError, CoreResult};
use fleet_migrator_core::types::{RunOptions, TenantTarget};

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "fleet-migrator.toml";

/// Table and identifier names end up inside rendered SQL, so they are restricted.
#[allow(clippy::unwrap_used)]
static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").unwrap());

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Root of the script tree (`<scripts_dir>/<domain>/*.sql`)
    pub scripts_dir: PathBuf,
    /// Name of the ledger table in every target database
    pub ledger_table: String,
    /// Targets migrated at once
    pub concurrency: usize,
    pub script_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub master: Option<MasterConfig>,
    pub registry: RegistryConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            scripts_dir: PathBuf::from("migrations"),
            ledger_table: "_fleet_migrations".to_string(),
            concurrency: 4,
            script_timeout_secs: 300,
            connect_timeout_secs: 10,
            master: None,
            registry: RegistryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MasterConfig {
    pub url: String,
}

/// Where tenant targets come from.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegistrySource {
    /// `tenants` table in the master database
    #[default]
    Database,
    /// `[[registry.tenants]]` entries of this file
    Static,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub source: RegistrySource,
    pub table: String,
    pub tenants: Vec<TenantTarget>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            source: RegistrySource::Database,
            table: "tenants".to_string(),
            tenants: Vec::new(),
        }
    }
}

impl FleetConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| CoreError::ConfigError(format!("Invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    ///
    /// A missing file at the default location yields the defaults; a missing
    /// file that was asked for explicitly is an error.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        if !path.exists() {
            if explicit {
                return Err(CoreError::ConfigError(format!(
                    "Configuration file {} not found",
                    path.display()
                )));
            }
            log::debug!("No {DEFAULT_CONFIG_FILE} found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| {
            CoreError::ConfigError(format!("Failed to read {}: {e}", path.display()))
        })?;
        log::debug!("Loaded configuration from {}", path.display());
        Self::from_toml_str(&content)
    }

    /// Override the master database URL.
    pub fn set_master_url(&mut self, url: impl Into<String>) {
        self.master = Some(MasterConfig { url: url.into() });
    }

    pub fn validate(&self) -> CoreResult<()> {
        for (field, value) in [
            ("ledger_table", &self.ledger_table),
            ("registry.table", &self.registry.table),
        ] {
            if !IDENTIFIER.is_match(value) {
                return Err(CoreError::ConfigError(format!(
                    "{field} '{value}' is not a valid SQL identifier"
                )));
            }
        }

        if self.concurrency == 0 {
            return Err(CoreError::ConfigError(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.script_timeout_secs == 0 {
            return Err(CoreError::ConfigError(
                "script_timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.registry.source == RegistrySource::Static {
            let mut seen = std::collections::HashSet::new();
            for tenant in &self.registry.tenants {
                if !seen.insert(tenant.id.as_str()) {
                    return Err(CoreError::ConfigError(format!(
                        "Tenant '{}' is listed more than once",
                        tenant.id
                    )));
                }
            }
        }

        Ok(())
    }

    /// Master database target, if configured.
    pub fn master_target(&self) -> Option<TenantTarget> {
        self.master.as_ref().map(|m| TenantTarget::master(&m.url))
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            concurrency: self.concurrency,
            script_timeout: Duration::from_secs(self.script_timeout_secs),
            dry_run: false,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
