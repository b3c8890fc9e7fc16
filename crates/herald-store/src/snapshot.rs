//! On-disk snapshot format and atomic file replacement.
//!
//! The whole store is written as one JSON document. Writes go to a sibling
//! temporary file which is fsynced and then renamed over the previous
//! snapshot, so a crash mid-write leaves the old snapshot intact.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::models::{ContactRecord, StoreRecord};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Full store payload as persisted on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub messages: Vec<StoreRecord>,
    pub contacts: Vec<ContactRecord>,
}

impl Snapshot {
    pub fn new(messages: Vec<StoreRecord>, contacts: Vec<ContactRecord>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            messages,
            contacts,
        }
    }
}

/// Read a snapshot. A missing file is `Ok(None)`, not an error.
pub async fn read_snapshot(path: &Path) -> Result<Option<Snapshot>> {
    let raw = match fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    // Empty file: treat like a missing one.
    if raw.is_empty() {
        return Ok(None);
    }

    let snapshot: Snapshot = serde_json::from_slice(&raw)?;
    if snapshot.version > SNAPSHOT_VERSION {
        return Err(StoreError::UnsupportedVersion(snapshot.version));
    }
    Ok(Some(snapshot))
}

/// Write `bytes` to `path` via temp file + fsync + rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let tmp_path = tmp_path(path);
    {
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
    }

    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }

    debug!(path = %path.display(), len = bytes.len(), "snapshot replaced");
    Ok(())
}

/// Temporary sibling used while writing `path`.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
