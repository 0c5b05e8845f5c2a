//! Per-session transcript: `sessions/<sessionId>.jsonl` append-only log
//! (spec §6 "On-disk layout"). Distinct from [`crate::SessionStore`], which
//! holds small hot metadata — this holds the ordered message history a
//! `chat.history` RPC reads back (spec §6 "required methods").

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub role: Role,
    pub text: String,
    pub ts: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum TranscriptError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize: {0}")]
    Serde(#[from] serde_json::Error),
}

/// One append-only JSONL file per session id, under a shared directory.
/// A per-store mutex serializes appends; reads just re-scan the file
/// (transcripts are small relative to the process lifetime this targets).
pub struct TranscriptStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl TranscriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), write_lock: Mutex::new(()) }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.jsonl"))
    }

    /// Appends one record to the session's transcript, creating the file
    /// (and parent directory) on first write.
    pub async fn append(&self, session_id: &str, record: &TranscriptRecord) -> Result<(), TranscriptError> {
        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(self.path_for(session_id)).await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Returns the last `limit` records for `session_id` in chronological
    /// order (oldest first), or an empty vec if the session has no
    /// transcript yet.
    pub async fn read(&self, session_id: &str, limit: usize) -> Result<Vec<TranscriptRecord>, TranscriptError> {
        let path = self.path_for(session_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8_lossy(&bytes);
        let mut records: Vec<TranscriptRecord> = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(line)?);
        }
        if records.len() > limit {
            records.drain(..records.len() - limit);
        }
        Ok(records)
    }
}

/// Exposed for callers constructing a store rooted at `<state_dir>/sessions`.
pub fn sessions_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("sessions")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(role: Role, text: &str) -> TranscriptRecord {
        TranscriptRecord { role, text: text.to_string(), ts: chrono::Utc::now() }
    }

    #[tokio::test]
    async fn append_then_read_round_trips_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(dir.path());
        store.append("main", &rec(Role::User, "hi")).await.unwrap();
        store.append("main", &rec(Role::Assistant, "hello")).await.unwrap();

        let records = store.read("main", 10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text, "hi");
        assert_eq!(records[1].text, "hello");
    }

    #[tokio::test]
    async fn read_on_unknown_session_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(dir.path());
        assert!(store.read("never-seen", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_respects_limit_keeping_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(dir.path());
        for i in 0..5 {
            store.append("main", &rec(Role::User, &format!("msg{i}"))).await.unwrap();
        }
        let records = store.read("main", 2).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text, "msg3");
        assert_eq!(records[1].text, "msg4");
    }
}
