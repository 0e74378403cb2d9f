//! Filesystem-backed `ScriptStore`.
//!
//! Layout: `<root>/<domain>/<version>_<name>.sql`, e.g.
//! `migrations/tenant/m20250215_000001_create_wells.sql`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use fleet_migrator_core::error::{CoreError, CoreResult};
use fleet_migrator_core::traits::{validate_scripts, ScriptStore};
use fleet_migrator_core::types::{MigrationDomain, ScriptVersion};

/// `V`/`m` prefix is optional; digit groups may be separated by underscores.
#[allow(clippy::unwrap_used)]
static SCRIPT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[Vvm]?(\d+(?:_\d+)*)_(.+)$").unwrap());

/// Reads migration scripts from a directory tree.
#[derive(Debug, Clone)]
pub struct FsScriptStore {
    root: PathBuf,
}

impl FsScriptStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the scripts of `domain`.
    pub fn domain_dir(&self, domain: MigrationDomain) -> PathBuf {
        self.root.join(domain.as_str())
    }

    async fn read_script(path: &Path, domain: MigrationDomain) -> CoreResult<ScriptVersion> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (version, name) = parse_file_name(&file_name)?;

        let sql = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CoreError::InvalidScript {
                name: file_name.clone(),
                reason: format!("Failed to read: {e}"),
            })?;
        if sql.trim().is_empty() {
            return Err(CoreError::InvalidScript {
                name: file_name,
                reason: "script is empty".to_string(),
            });
        }

        Ok(ScriptVersion::new(version, name, domain, sql))
    }
}

/// Split `m20250215_000001_create_wells.sql` into `(20250215000001, "create_wells")`.
pub fn parse_file_name(file_name: &str) -> CoreResult<(i64, String)> {
    let invalid = |reason: &str| CoreError::InvalidScript {
        name: file_name.to_string(),
        reason: reason.to_string(),
    };

    let stem = file_name
        .strip_suffix(".sql")
        .ok_or_else(|| invalid("expected a .sql file"))?;
    let caps = SCRIPT_NAME
        .captures(stem)
        .ok_or_else(|| invalid("expected '<version>_<name>.sql'"))?;

    let digits: String = caps[1].chars().filter(char::is_ascii_digit).collect();
    let version = digits
        .parse::<i64>()
        .map_err(|_| invalid("version does not fit in a 64-bit integer"))?;

    Ok((version, caps[2].to_string()))
}

#[async_trait]
impl ScriptStore for FsScriptStore {
    async fn list_scripts(&self, domain: MigrationDomain) -> CoreResult<Vec<ScriptVersion>> {
        let dir = self.domain_dir(domain);
        let read_err =
            |e: std::io::Error| CoreError::ConfigError(format!("Failed to read {}: {e}", dir.display()));

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::warn!("Script directory {} does not exist, no {domain} scripts", dir.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(read_err(e)),
        };

        let mut scripts = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "sql") {
                continue;
            }
            // Follows symlinks, unlike `DirEntry::file_type`.
            let is_file = tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file());
            if !is_file {
                continue;
            }
            scripts.push(Self::read_script(&path, domain).await?);
        }

        let scripts = validate_scripts(domain, scripts)?;
        log::debug!("Loaded {} {domain} script(s) from {}", scripts.len(), dir.display());
        Ok(scripts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_prefixed_names() {
        assert_eq!(
            parse_file_name("0001_create_wells.sql").unwrap(),
            (1, "create_wells".to_string())
        );
        assert_eq!(
            parse_file_name("V2_add_well_type.sql").unwrap(),
            (2, "add_well_type".to_string())
        );
        assert_eq!(
            parse_file_name("m20250215_000001_create_wells.sql").unwrap(),
            (20_250_215_000_001, "create_wells".to_string())
        );
        assert_eq!(
            parse_file_name("0003_2fa_setup.sql").unwrap(),
            (3, "2fa_setup".to_string())
        );
    }

    #[test]
    fn rejects_malformed_names() {
        assert!(parse_file_name("create_wells.sql").is_err());
        assert!(parse_file_name("0001.sql").is_err());
        assert!(parse_file_name("0001_create_wells.txt").is_err());
        assert!(parse_file_name("99999999999999999999_too_big.sql").is_err());
    }
}
