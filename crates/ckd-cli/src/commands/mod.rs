//! Command handler modules for ckd-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod kitchen;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use ckd_config::{load_kitchen_config, report_unused_keys, ConfigMode, UnusedKeyPolicy};
use ckd_db::{SqliteStore, ENV_DB_PATH};
use ckd_ledger::ResourceMap;
use ckd_runtime::Kitchen;
use tracing::debug;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// `--db` wins over `CKD_DATABASE_PATH`.
pub fn resolve_db_path(db: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(p) = db {
        return Ok(p);
    }
    let raw = std::env::var(ENV_DB_PATH)
        .with_context(|| format!("no database: pass --db or set {ENV_DB_PATH}"))?;
    Ok(PathBuf::from(raw))
}

/// Open the SQLite file and bring its schema up to date.
pub async fn open_store(path: &Path) -> Result<SqliteStore> {
    let store = SqliteStore::connect(path).await?;
    store.migrate().await?;
    Ok(store)
}

/// Open the kitchen on `db` using defaults plus `config_paths` overlays.
pub async fn open_kitchen(db: &Path, config_paths: &[String]) -> Result<Kitchen> {
    let path_refs: Vec<&str> = config_paths.iter().map(|s| s.as_str()).collect();
    let loaded = load_kitchen_config(&path_refs)?;
    let report = report_unused_keys(ConfigMode::Cli, &loaded.config_json, UnusedKeyPolicy::Warn)?;
    // Defaults always carry the daemon's loop timings.
    for ptr in &report.unused_leaf_pointers {
        debug!(pointer = %ptr, "config key is not read by the cli");
    }

    let store = open_store(db).await?;
    Kitchen::open(Arc::new(store), loaded.settings()?).await
}

/// Parse `NAME=QTY` pairs into a resource map. Later duplicates win.
pub fn parse_resource_args(args: &[String]) -> Result<ResourceMap> {
    let mut out = ResourceMap::new();
    for raw in args {
        let Some((name, qty)) = raw.split_once('=') else {
            bail!("invalid resource '{raw}': expected NAME=QTY");
        };
        let name = name.trim();
        if name.is_empty() {
            bail!("invalid resource '{raw}': empty name");
        }
        let qty: i64 = qty
            .trim()
            .parse()
            .with_context(|| format!("invalid resource '{raw}': quantity must be an integer"))?;
        out.insert(name.to_string(), qty);
    }
    Ok(out)
}

/// `Oven=1,Chef=2`
pub fn format_resources(map: &ResourceMap) -> String {
    map.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_qty_pairs() {
        let m = parse_resource_args(&["Oven=1".into(), " Chef = 2 ".into()]).unwrap();
        assert_eq!(m.get("Oven"), Some(&1));
        assert_eq!(m.get("Chef"), Some(&2));
        assert_eq!(format_resources(&m), "Chef=2,Oven=1");
    }

    #[test]
    fn rejects_malformed_pairs() {
        assert!(parse_resource_args(&["Oven".into()]).is_err());
        assert!(parse_resource_args(&["=3".into()]).is_err());
        assert!(parse_resource_args(&["Oven=lots".into()]).is_err());
    }

    #[test]
    fn negative_quantities_parse_and_are_left_to_the_ledger() {
        let m = parse_resource_args(&["Oven=-1".into()]).unwrap();
        assert_eq!(m.get("Oven"), Some(&-1));
    }
}
