//! On-disk credential state.
//!
//! Layout: a directory holding `creds.json` (the main blob plus the
//! registration flag) and one `<item>.json` per key item. Item files carry
//! their original name; the file stem is a reversible escape of it, so two
//! distinct names never share a file.
//! Every file is replaced atomically.
//!
//! Only the connection supervisor writes here.

use std::path::{Path, PathBuf};

use herald_net::{CredentialItem, Credentials, CredsUpdate};
use herald_store::snapshot::write_atomic;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::VaultError;

const CREDS_FILE: &str = "creds.json";

#[derive(Serialize, Deserialize)]
struct CredsFile {
    creds: serde_json::Value,
    registered: bool,
}

#[derive(Serialize, Deserialize)]
struct ItemFile {
    name: String,
    data: CredentialItem,
}

#[derive(Debug, Clone)]
pub struct CredentialVault {
    dir: PathBuf,
}

impl CredentialVault {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read the stored credentials. An absent vault yields empty
    /// credentials, which start a fresh pairing.
    pub async fn load(&self) -> Result<Credentials, VaultError> {
        let mut credentials = Credentials::empty();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(credentials),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let bytes = tokio::fs::read(&path).await?;
            if path.file_name().and_then(|n| n.to_str()) == Some(CREDS_FILE) {
                let file: CredsFile = serde_json::from_slice(&bytes)
                    .map_err(|source| VaultError::Corrupt { path: path.clone(), source })?;
                credentials.creds = file.creds;
                credentials.registered = file.registered;
            } else {
                let item: ItemFile = serde_json::from_slice(&bytes)
                    .map_err(|source| VaultError::Corrupt { path: path.clone(), source })?;
                credentials.items.insert(item.name, item.data);
            }
        }

        debug!(
            dir = %self.dir.display(),
            registered = credentials.registered,
            items = credentials.items.len(),
            "credentials loaded"
        );
        Ok(credentials)
    }

    pub async fn is_registered(&self) -> bool {
        match self.load().await {
            Ok(credentials) => credentials.registered,
            Err(e) => {
                warn!(error = %e, "credential vault unreadable");
                false
            }
        }
    }

    /// Write the full credential state, dropping item files no longer
    /// present in `credentials`.
    pub async fn save(&self, credentials: &Credentials) -> Result<(), VaultError> {
        self.write_creds(credentials).await?;
        for (name, item) in &credentials.items {
            self.write_item(name, item).await?;
        }

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let stale = path.extension().and_then(|e| e.to_str()) == Some("json")
                && path.file_name().and_then(|n| n.to_str()) != Some(CREDS_FILE)
                && !credentials.items.keys().any(|name| item_file_stem(name) == stem);
            if stale {
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }

    /// Persist a rotation. `merged` is the state after applying `update`;
    /// only the parts `update` touches are rewritten.
    pub async fn persist_update(
        &self,
        merged: &Credentials,
        update: &CredsUpdate,
    ) -> Result<(), VaultError> {
        if update.creds.is_some() || update.registered.is_some() {
            self.write_creds(merged).await?;
        }

        for (name, item) in &update.items {
            match item {
                Some(item) => self.write_item(name, item).await?,
                None => self.remove_item(name).await?,
            }
        }
        Ok(())
    }

    /// Delete everything. The next connect starts pairing from scratch.
    pub async fn wipe(&self) -> Result<(), VaultError> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                info!(dir = %self.dir.display(), "credential vault wiped");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_creds(&self, credentials: &Credentials) -> Result<(), VaultError> {
        let file = CredsFile {
            creds: credentials.creds.clone(),
            registered: credentials.registered,
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        write_atomic(&self.dir.join(CREDS_FILE), &bytes).await?;
        Ok(())
    }

    async fn write_item(&self, name: &str, item: &CredentialItem) -> Result<(), VaultError> {
        let file = ItemFile {
            name: name.to_string(),
            data: item.clone(),
        };
        let bytes = serde_json::to_vec(&file)?;
        write_atomic(&self.item_path(name), &bytes).await?;
        Ok(())
    }

    async fn remove_item(&self, name: &str) -> Result<(), VaultError> {
        match tokio::fs::remove_file(self.item_path(name)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn item_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", item_file_stem(name)))
    }
}

/// Filesystem-safe file stem for an item name.
///
/// Bytes outside `[A-Za-z0-9.-]` become `_XX` (uppercase hex), so the
/// mapping is injective. A name that would land on the main creds file has
/// its first byte escaped.
fn item_file_stem(name: &str) -> String {
    let mut stem = String::with_capacity(name.len());
    for (i, byte) in name.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.';
        if keep && !(i == 0 && name == "creds") {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("_{byte:02X}"));
        }
    }
    if stem.is_empty() {
        stem.push('_');
    }
    stem
}
