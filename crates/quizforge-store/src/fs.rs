//! File helpers shared by the store and the cache.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

const EXTENSION: &str = "json";

/// File name for a record key. Keys are hex-encoded so any identifier is a
/// valid, reversible file name.
pub(crate) fn file_name(key: &str) -> String {
    format!("{}.{EXTENSION}", hex::encode(key.as_bytes()))
}

/// Recover the key from a file name written by [`file_name`].
pub(crate) fn key_from_path(path: &Path) -> Option<String> {
    if path.extension()? != EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let bytes = hex::decode(stem).ok()?;
    String::from_utf8(bytes).ok()
}

/// Write `value` as JSON to `path` via a temp file in the same directory and
/// a rename. With `overwrite` unset an existing file is an error.
pub(crate) async fn write_json<T: Serialize>(
    path: PathBuf,
    value: &T,
    overwrite: bool,
) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).context("failed to serialize record")?;
    tokio::task::spawn_blocking(move || write_atomic(&path, &bytes, overwrite))
        .await
        .context("write task panicked")?
}

fn write_atomic(path: &Path, bytes: &[u8], overwrite: bool) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("no parent directory for {}", path.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create directory: {}", dir.display()))?;

    let mut tmp = NamedTempFile::new_in(dir).context("failed to create temp file")?;
    tmp.write_all(bytes).context("failed to write temp file")?;
    tmp.as_file().sync_all().context("failed to sync temp file")?;

    let persisted = if overwrite {
        tmp.persist(path).map(drop)
    } else {
        tmp.persist_noclobber(path).map(drop)
    };
    persisted.map_err(|e| e.error).with_context(|| format!("failed to write {}", path.display()))
}

/// Read one JSON file. A missing file is `None`.
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .with_context(|| format!("corrupt record: {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

/// Every record file in `dir`, sorted by path. A missing directory is empty.
pub(crate) async fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("failed to list {}", dir.display())),
    };

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if key_from_path(&path).is_some() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Remove a file, treating "already gone" as success.
pub(crate) async fn remove(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
    }
}
