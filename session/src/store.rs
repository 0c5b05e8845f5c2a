//! SessionStore: SessionKey → SessionEntry, serialized atomically to a
//! single JSON file (spec §3 "SessionStore", §5 "Session store: one writer
//! at a time per store path... atomic replace on write").
//!
//! Grounded on `loom-workspace::Store`'s connection-guarded CRUD idiom,
//! adapted from SQLite rows to a whole-map snapshot because the unit of
//! atomicity here is the entire mapping, not a row.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::SessionKey;

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Per-session durable metadata (spec §3 "SessionEntry").
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionEntry {
    pub session_id: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_to: Option<String>,
    #[serde(default)]
    pub system_sent: bool,
    #[serde(default)]
    pub aborted_last_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_tokens: Option<u64>,
    #[serde(default)]
    pub group_activation: bool,
}

impl SessionEntry {
    /// Invariant: `last_channel` never takes the value `webchat` for
    /// heartbeat targeting (spec §3).
    pub fn set_last_channel(&mut self, channel: impl Into<String>) {
        let channel = channel.into();
        if channel != "webchat" {
            self.last_channel = Some(channel);
        }
    }
}

/// Mapping SessionKey → SessionEntry, persisted atomically to a single file.
/// Writers serialize via a per-store `tokio::sync::Mutex`; readers get a
/// cloned snapshot and tolerate staleness (spec §3).
pub struct SessionStore {
    path: PathBuf,
    inner: Arc<Mutex<HashMap<SessionKey, SessionEntry>>>,
}

impl SessionStore {
    /// Loads the store from `path`, creating an empty map if the file does
    /// not yet exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SessionStoreError> {
        let path = path.as_ref().to_path_buf();
        let map = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            inner: Arc::new(Mutex::new(map)),
        })
    }

    /// Returns a cloned snapshot of the current entry for `key`, if any.
    pub async fn get(&self, key: &str) -> Option<SessionEntry> {
        self.inner.lock().await.get(key).cloned()
    }

    /// Applies `mutate` to the entry for `key` (creating a default entry on
    /// first touch), bumps `updated_at`, and flushes atomically to disk.
    ///
    /// Invariant: `updated_at` is monotonic per session when touched by
    /// writes (spec §3).
    pub async fn update<F>(&self, key: &str, mutate: F) -> Result<SessionEntry, SessionStoreError>
    where
        F: FnOnce(&mut SessionEntry),
    {
        let mut guard = self.inner.lock().await;
        let entry = guard.entry(key.to_string()).or_insert_with(|| SessionEntry {
            session_id: uuid::Uuid::new_v4().to_string(),
            updated_at: chrono::Utc::now(),
            ..Default::default()
        });
        mutate(entry);
        let now = chrono::Utc::now();
        if now > entry.updated_at {
            entry.updated_at = now;
        }
        let result = entry.clone();
        self.flush_locked(&guard).await?;
        Ok(result)
    }

    /// Destroys the entry for `key` (spec §3 "Lifecycle": `/new`/`/reset`).
    pub async fn remove(&self, key: &str) -> Result<(), SessionStoreError> {
        let mut guard = self.inner.lock().await;
        guard.remove(key);
        self.flush_locked(&guard).await
    }

    /// Full snapshot, for `sessions.list` RPC responses.
    pub async fn snapshot(&self) -> HashMap<SessionKey, SessionEntry> {
        self.inner.lock().await.clone()
    }

    async fn flush_locked(
        &self,
        map: &HashMap<SessionKey, SessionEntry>,
    ) -> Result<(), SessionStoreError> {
        let bytes = serde_json::to_vec_pretty(map)?;
        let tmp_path = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let store = SessionStore::open(&path).await.unwrap();
        store
            .update("main", |e| e.set_last_channel("whatsapp"))
            .await
            .unwrap();

        let reloaded = SessionStore::open(&path).await.unwrap();
        let entry = reloaded.get("main").await.unwrap();
        assert_eq!(entry.last_channel.as_deref(), Some("whatsapp"));
    }

    #[tokio::test]
    async fn last_channel_never_becomes_webchat() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path().join("sessions.json")).await.unwrap();
        store.update("main", |e| e.set_last_channel("whatsapp")).await.unwrap();
        store.update("main", |e| e.set_last_channel("webchat")).await.unwrap();
        let entry = store.get("main").await.unwrap();
        assert_eq!(entry.last_channel.as_deref(), Some("whatsapp"));
    }

    #[tokio::test]
    async fn updated_at_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path().join("sessions.json")).await.unwrap();
        let first = store.update("main", |_| {}).await.unwrap();
        let second = store.update("main", |_| {}).await.unwrap();
        assert!(second.updated_at >= first.updated_at);
    }
}
