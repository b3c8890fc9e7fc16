//! Store handle and snapshot persistence.
//!
//! [`Store`] is cheap to clone; all clones share one in-memory state behind a
//! `tokio::sync::RwLock`. A generation counter is bumped on every mutation so
//! the periodic flusher can skip writing an unchanged store. Flushes are
//! serialized by a separate mutex so only one writer touches the snapshot
//! file at a time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use directories::ProjectDirs;
use herald_shared::constants::STORE_SNAPSHOT_FILE;
use herald_shared::Jid;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::models::{ContactRecord, FlushStats, StoreRecord};
use crate::snapshot::{self, Snapshot};

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub(crate) messages: BTreeMap<Jid, BTreeMap<String, StoreRecord>>,
    pub(crate) contacts: BTreeMap<Jid, ContactRecord>,
    pub(crate) generation: u64,
    pub(crate) flushed_generation: u64,
}

impl StoreState {
    pub(crate) fn touch(&mut self) {
        self.generation += 1;
    }

    fn is_dirty(&self) -> bool {
        self.generation != self.flushed_generation
    }

    fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut state = Self::default();
        for record in snapshot.messages {
            state
                .messages
                .entry(record.conversation.clone())
                .or_default()
                .insert(record.item_id.clone(), record);
        }
        for contact in snapshot.contacts {
            state.contacts.insert(contact.id.clone(), contact);
        }
        state
    }

    fn to_snapshot(&self) -> Snapshot {
        let messages = self
            .messages
            .values()
            .flat_map(|items| items.values().cloned())
            .collect();
        let contacts = self.contacts.values().cloned().collect();
        Snapshot::new(messages, contacts)
    }
}

/// Shared handle to the message/contact cache.
#[derive(Clone)]
pub struct Store {
    pub(crate) state: Arc<RwLock<StoreState>>,
    flush_lock: Arc<Mutex<()>>,
    path: Option<PathBuf>,
}

impl Store {
    /// Open the store in the platform data directory:
    /// - Linux:   `~/.local/share/herald/store.json`
    /// - macOS:   `~/Library/Application Support/org.herald.herald/store.json`
    /// - Windows: `{FOLDERID_RoamingAppData}\herald\herald\data\store.json`
    pub async fn open_default() -> Result<Self> {
        let dirs = ProjectDirs::from("org", "herald", "herald").ok_or(StoreError::NoDataDir)?;
        Ok(Self::open_at(dirs.data_dir().join(STORE_SNAPSHOT_FILE)).await)
    }

    /// Open a store persisted at `path`, loading any existing snapshot.
    ///
    /// An unreadable snapshot is moved aside to `<path>.corrupt` and the
    /// store starts empty; it keeps working in memory either way.
    pub async fn open_at(path: impl Into<PathBuf>) -> Self {
        let store = Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            flush_lock: Arc::new(Mutex::new(())),
            path: Some(path.into()),
        };

        if let Err(e) = store.load().await {
            if let Some(path) = store.path() {
                warn!(path = %path.display(), error = %e, "could not load store snapshot, starting empty");
                let mut aside = path.as_os_str().to_os_string();
                aside.push(".corrupt");
                if let Err(e) = tokio::fs::rename(path, &aside).await {
                    debug!(error = %e, "could not move unreadable snapshot aside");
                }
            }
        }

        store
    }

    /// A store that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            flush_lock: Arc::new(Mutex::new(())),
            path: None,
        }
    }

    /// Snapshot location, if persistent.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Replace the in-memory state with the snapshot on disk.
    ///
    /// A missing snapshot leaves the store empty and is not an error.
    pub async fn load(&self) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let loaded = match snapshot::read_snapshot(path).await? {
            Some(snapshot) => StoreState::from_snapshot(snapshot),
            None => {
                info!(path = %path.display(), "no store snapshot yet, starting empty");
                StoreState::default()
            }
        };

        let message_count: usize = loaded.messages.values().map(BTreeMap::len).sum();
        let contact_count = loaded.contacts.len();

        *self.state.write().await = loaded;

        info!(
            path = %path.display(),
            messages = message_count,
            contacts = contact_count,
            "store loaded"
        );
        Ok(())
    }

    /// Serialize the full state and atomically replace the snapshot.
    pub async fn flush(&self) -> Result<FlushStats> {
        let Some(path) = self.path.as_deref() else {
            return Ok(FlushStats::default());
        };

        // Held across snapshot and write so a later flush never publishes
        // older state, and writers never share the temp file.
        let _flushing = self.flush_lock.lock().await;

        let (bytes, generation, stats) = {
            let state = self.state.read().await;
            let snapshot = state.to_snapshot();
            let bytes = serde_json::to_vec(&snapshot)?;
            let stats = FlushStats {
                messages: snapshot.messages.len(),
                contacts: snapshot.contacts.len(),
                bytes: bytes.len(),
            };
            (bytes, state.generation, stats)
        };

        snapshot::write_atomic(path, &bytes).await?;

        let mut state = self.state.write().await;
        state.flushed_generation = state.flushed_generation.max(generation);

        debug!(
            messages = stats.messages,
            contacts = stats.contacts,
            bytes = stats.bytes,
            "store flushed"
        );
        Ok(stats)
    }

    /// Flush only if something changed since the last successful flush.
    pub async fn flush_if_dirty(&self) -> Result<Option<FlushStats>> {
        if !self.is_dirty().await {
            return Ok(None);
        }
        self.flush().await.map(Some)
    }

    /// Whether there are writes not yet persisted.
    pub async fn is_dirty(&self) -> bool {
        self.state.read().await.is_dirty()
    }

    /// Drop every record and contact. The only deletion path.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.messages.clear();
        state.contacts.clear();
        state.touch();
        info!("store reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn jid(s: &str) -> Jid {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_flush_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = Store::open_at(&path).await;
        store
            .put(StoreRecord::new(jid("111@s.whatsapp.net"), "M1", json!({"text": "a"})))
            .await;
        store
            .put(StoreRecord::new(jid("111@s.whatsapp.net"), "M2", json!({"text": "b"})))
            .await;
        store
            .put(StoreRecord::new(jid("222@g.us"), "M1", json!({"text": "c"})))
            .await;
        store
            .upsert_contact(ContactRecord::new(&jid("111@s.whatsapp.net"), Some("Ana".into())))
            .await;

        let stats = store.flush().await.unwrap();
        assert_eq!(stats.messages, 3);
        assert_eq!(stats.contacts, 1);

        let reopened = Store::open_at(&path).await;
        assert_eq!(reopened.message_count().await, 3);
        let got = reopened
            .get(&jid("111@s.whatsapp.net"), "M2")
            .await
            .unwrap();
        assert_eq!(got.payload, json!({"text": "b"}));
        assert_eq!(
            reopened
                .resolve_contact(&jid("111@s.whatsapp.net"))
                .await
                .unwrap()
                .display_name
                .as_deref(),
            Some("Ana")
        );
    }

    #[tokio::test]
    async fn test_absent_snapshot_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_at(dir.path().join("never-written.json")).await;
        assert_eq!(store.message_count().await, 0);
        assert!(store.get(&jid("1@s.whatsapp.net"), "x").await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, b"garbage").unwrap();

        let store = Store::open_at(&path).await;
        assert_eq!(store.message_count().await, 0);
        assert!(dir.path().join("store.json.corrupt").exists());

        // Still usable and persistable.
        store
            .put(StoreRecord::new(jid("1@s.whatsapp.net"), "M1", json!(1)))
            .await;
        store.flush().await.unwrap();
        assert_eq!(Store::open_at(&path).await.message_count().await, 1);
    }

    #[tokio::test]
    async fn test_flush_if_dirty_skips_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_at(dir.path().join("store.json")).await;

        assert!(store.flush_if_dirty().await.unwrap().is_none());

        store
            .put(StoreRecord::new(jid("1@s.whatsapp.net"), "M1", json!(1)))
            .await;
        assert!(store.is_dirty().await);
        assert!(store.flush_if_dirty().await.unwrap().is_some());
        assert!(!store.is_dirty().await);
        assert!(store.flush_if_dirty().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let store = Store::in_memory();
        store
            .put(StoreRecord::new(jid("1@s.whatsapp.net"), "M1", json!(1)))
            .await;
        store
            .upsert_contact(ContactRecord::new(&jid("1@s.whatsapp.net"), None))
            .await;

        store.reset().await;
        assert_eq!(store.message_count().await, 0);
        assert!(store.resolve_contact(&jid("1@s.whatsapp.net")).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_flushes_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = Store::open_at(&path).await;
        for i in 0..2000 {
            store
                .put(StoreRecord::new(
                    jid("1@s.whatsapp.net"),
                    format!("M{i}"),
                    json!({"text": "x".repeat(64)}),
                ))
                .await;
        }

        for _ in 0..10 {
            let a = tokio::spawn({
                let store = store.clone();
                async move { store.flush().await }
            });
            let b = tokio::spawn({
                let store = store.clone();
                async move { store.flush().await }
            });
            a.await.unwrap().unwrap();
            b.await.unwrap().unwrap();
        }

        assert!(!snapshot::tmp_path(&path).exists());
        assert_eq!(Store::open_at(&path).await.message_count().await, 2000);
    }

    #[tokio::test]
    async fn test_in_memory_flush_is_noop() {
        let store = Store::in_memory();
        store
            .put(StoreRecord::new(jid("1@s.whatsapp.net"), "M1", json!(1)))
            .await;
        assert_eq!(store.flush().await.unwrap(), FlushStats::default());
    }
}
