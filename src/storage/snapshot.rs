//! JSON snapshot persistence for the directory store.
//!
//! The whole store is written to `<root>/carelink.json` after every mutation. Writes go
//! to a sibling temp file first and are renamed into place, so a crash mid-write leaves
//! the previous snapshot intact.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use super::StoreData;

const SNAPSHOT_FILE: &str = "carelink.json";

fn snapshot_path(root: &Path) -> PathBuf { root.join(SNAPSHOT_FILE) }

pub(super) fn load(root: &Path) -> Result<Option<StoreData>> {
    let path = snapshot_path(root);
    if !path.exists() { return Ok(None); }
    let bytes = fs::read(&path).with_context(|| format!("reading snapshot {}", path.display()))?;
    let data: StoreData = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing snapshot {}", path.display()))?;
    debug!(target: "carelink::storage", "snapshot loaded from '{}'", path.display());
    Ok(Some(data))
}

pub(super) fn save(root: &Path, data: &StoreData) -> Result<()> {
    fs::create_dir_all(root).with_context(|| format!("creating data root {}", root.display()))?;
    let path = snapshot_path(root);
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(data).context("serializing snapshot")?;
    fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, &path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}
