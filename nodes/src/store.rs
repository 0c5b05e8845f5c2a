//! SQLite-backed node store: pending and paired nodes.
//!
//! Grounded on the workspace/thread `Store` CRUD shape: connection guarded
//! by `Arc<Mutex<Connection>>`, blocking calls wrapped in
//! `tokio::task::block_in_place` so async callers never block the runtime
//! directly on SQLite.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage: {0}")]
    Storage(String),
    #[error("not found: {0}")]
    NotFound(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Paired,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: String,
    pub label: Option<String>,
    pub status: NodeStatus,
    pub created_at_ms: i64,
}

fn system_time_to_i64(t: SystemTime) -> i64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn status_str(status: NodeStatus) -> &'static str {
    match status {
        NodeStatus::Pending => "pending",
        NodeStatus::Paired => "paired",
    }
}

fn parse_status(s: &str) -> NodeStatus {
    match s {
        "paired" => NodeStatus::Paired,
        _ => NodeStatus::Pending,
    }
}

/// SQLite-backed node store. Own DB, independent of session/credential stores.
pub struct Store {
    db: Arc<Mutex<rusqlite::Connection>>,
}

impl Store {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&path).map_err(|e| StoreError::Storage(e.to_string()))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                label TEXT,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates a pending node request. Returns the generated id.
    pub async fn create_pending(&self, label: Option<String>) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = system_time_to_i64(SystemTime::now());
        let db = self.db.clone();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "INSERT INTO nodes (id, label, status, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![&id, label.as_deref(), status_str(NodeStatus::Pending), now],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(id)
        })
    }

    /// Marks a pending node as paired (`nodes.pair` RPC / pairing approval).
    pub async fn mark_paired(&self, id: &str) -> Result<(), StoreError> {
        let db = self.db.clone();
        let id = id.to_string();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let changed = conn
                .execute(
                    "UPDATE nodes SET status = ?1 WHERE id = ?2",
                    rusqlite::params![status_str(NodeStatus::Paired), id],
                )
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            if changed == 0 {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
    }

    /// Lists nodes, optionally filtered by status (`nodes.list` RPC).
    pub async fn list(&self, status: Option<NodeStatus>) -> Result<Vec<NodeSummary>, StoreError> {
        let db = self.db.clone();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let (sql, filter) = match status {
                Some(s) => (
                    "SELECT id, label, status, created_at FROM nodes WHERE status = ?1 ORDER BY created_at ASC",
                    Some(status_str(s).to_string()),
                ),
                None => (
                    "SELECT id, label, status, created_at FROM nodes ORDER BY created_at ASC",
                    None,
                ),
            };
            let mut stmt = conn.prepare(sql).map_err(|e| StoreError::Storage(e.to_string()))?;
            let map_row = |row: &rusqlite::Row| -> rusqlite::Result<NodeSummary> {
                let status_raw: String = row.get(2)?;
                Ok(NodeSummary {
                    id: row.get(0)?,
                    label: row.get(1)?,
                    status: parse_status(&status_raw),
                    created_at_ms: row.get(3)?,
                })
            };
            let rows = match &filter {
                Some(f) => stmt.query_map(rusqlite::params![f], map_row),
                None => stmt.query_map([], map_row),
            }
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>().map_err(|e| StoreError::Storage(e.to_string()))
        })
    }

    /// Removes a node (revoke/forget).
    pub async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let db = self.db.clone();
        let id = id.to_string();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute("DELETE FROM nodes WHERE id = ?1", rusqlite::params![id])
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn pending_node_can_be_paired_then_listed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("nodes.db")).unwrap();
        let id = store.create_pending(Some("my-laptop".into())).await.unwrap();

        let pending = store.list(Some(NodeStatus::Pending)).await.unwrap();
        assert_eq!(pending.len(), 1);

        store.mark_paired(&id).await.unwrap();
        let paired = store.list(Some(NodeStatus::Paired)).await.unwrap();
        assert_eq!(paired.len(), 1);
        assert_eq!(paired[0].id, id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pairing_unknown_id_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("nodes.db")).unwrap();
        assert!(matches!(
            store.mark_paired("nope").await,
            Err(StoreError::NotFound(_))
        ));
    }
}
