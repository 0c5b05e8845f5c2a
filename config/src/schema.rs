//! Nested gateway config schema (spec §4.4 "Config schema"): a single JSON
//! document with well-known top-level roots (`agent`, `agents`, `models`,
//! `auth`, `channels.<id>`, `messages`, `session`, `routing`, `skills`,
//! `logging`, `gateway`, `web`), addressed by dot-path for `config.get`
//! /`config.put`, plus filesystem-watched hot reload scoped to whichever
//! top-level key actually changed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, RecursiveMode, Watcher};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

/// Top-level roots the gateway's config document recognizes (spec §4.4).
pub const TOP_LEVEL_ROOTS: &[&str] =
    &["agent", "agents", "models", "auth", "channels", "messages", "session", "routing", "skills", "logging", "gateway", "web"];

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no value at path {0:?}")]
    NotFound(String),
}

/// Live, in-memory view of `clawdis.json` (spec §6 "On-disk layout"),
/// persisted atomically to disk on every `put_path`.
pub struct ConfigDocument {
    path: PathBuf,
    value: Mutex<Value>,
}

impl ConfigDocument {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref().to_path_buf();
        let value = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Value::Object(Default::default()),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, value: Mutex::new(value) })
    }

    /// `config.get`: dot-path lookup (`"channels.whatsapp.allowFrom"`).
    pub async fn get_path(&self, dot_path: &str) -> Option<Value> {
        let guard = self.value.lock().await;
        walk(&guard, dot_path).cloned()
    }

    /// `config.put`: dot-path write, creating intermediate objects as
    /// needed. Returns the top-level root that changed, for hot-reload
    /// dispatch.
    pub async fn put_path(&self, dot_path: &str, new_value: Value) -> Result<String, SchemaError> {
        let root = dot_path.split('.').next().unwrap_or(dot_path).to_string();
        let mut guard = self.value.lock().await;
        set_path(&mut guard, dot_path, new_value);
        self.flush(&guard).await?;
        Ok(root)
    }

    pub async fn snapshot(&self) -> Value {
        self.value.lock().await.clone()
    }

    /// Parses the `models` root into typed [`model_spec_core::ModelSpec`]
    /// entries, skipping (and logging) any entry with an unrecognized or
    /// missing provider rather than failing the whole document.
    pub async fn parsed_models(&self) -> Vec<model_spec_core::ModelSpec> {
        let guard = self.value.lock().await;
        let Some(models) = guard.get("models").and_then(|v| v.as_object()) else {
            return Vec::new();
        };
        models
            .iter()
            .filter_map(|(id, value)| match model_spec_core::parse_model_spec(id, value) {
                Ok(spec) => Some(spec),
                Err(e) => {
                    tracing::warn!("skipping models.{id}: {e}");
                    None
                }
            })
            .collect()
    }

    async fn flush(&self, value: &Value) -> Result<(), SchemaError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn walk<'a>(value: &'a Value, dot_path: &str) -> Option<&'a Value> {
    dot_path.split('.').try_fold(value, |cur, segment| cur.get(segment))
}

fn set_path(root: &mut Value, dot_path: &str, new_value: Value) {
    let mut cur = root;
    let segments: Vec<&str> = dot_path.split('.').collect();
    for segment in &segments[..segments.len().saturating_sub(1)] {
        if !cur.is_object() {
            *cur = Value::Object(Default::default());
        }
        cur = cur.as_object_mut().unwrap().entry(segment.to_string()).or_insert_with(|| Value::Object(Default::default()));
    }
    if let Some(last) = segments.last() {
        if !cur.is_object() {
            *cur = Value::Object(Default::default());
        }
        cur.as_object_mut().unwrap().insert(last.to_string(), new_value);
    }
}

/// Watches `clawdis.json` for external edits and reports which top-level
/// root changed between reads (spec §1 "configuration"/"hot reload by
/// prefix"). Adapters subscribe by checking whether their
/// `ReloadSurface::config_prefixes()` intersect the reported root.
pub struct ConfigWatcher {
    _inner: notify::RecommendedWatcher,
    pub changes: mpsc::UnboundedReceiver<HashSet<String>>,
}

impl ConfigWatcher {
    pub fn start(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref().to_path_buf();
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<Event>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = raw_tx.send(event);
            }
        })
        .map_err(|e| SchemaError::Io(std::io::Error::other(e)))?;

        if let Some(parent) = path.parent() {
            watcher.watch(parent, RecursiveMode::NonRecursive).map_err(|e| SchemaError::Io(std::io::Error::other(e)))?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let last_value = Arc::new(Mutex::new(Value::Null));
        let watched_path = path.clone();
        tokio::spawn(async move {
            while let Some(event) = raw_rx.recv().await {
                if !event.paths.iter().any(|p| p == &watched_path) {
                    continue;
                }
                let Ok(bytes) = tokio::fs::read(&watched_path).await else { continue };
                let Ok(new_value): Result<Value, _> = serde_json::from_slice(&bytes) else { continue };
                let mut prev = last_value.lock().await;
                let changed = changed_roots(&prev, &new_value);
                *prev = new_value;
                drop(prev);
                if !changed.is_empty() {
                    let _ = tx.send(changed);
                }
            }
        });

        Ok(Self { _inner: watcher, changes: rx })
    }
}

fn changed_roots(old: &Value, new: &Value) -> HashSet<String> {
    let mut changed = HashSet::new();
    for root in TOP_LEVEL_ROOTS {
        if old.get(root) != new.get(root) {
            changed.insert(root.to_string());
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips_a_dotted_path() {
        let dir = tempfile::tempdir().unwrap();
        let doc = ConfigDocument::open(dir.path().join("clawdis.json")).await.unwrap();
        doc.put_path("channels.whatsapp.allowFrom", serde_json::json!(["*"])).await.unwrap();
        let got = doc.get_path("channels.whatsapp.allowFrom").await.unwrap();
        assert_eq!(got, serde_json::json!(["*"]));
    }

    #[tokio::test]
    async fn put_path_reports_the_top_level_root() {
        let dir = tempfile::tempdir().unwrap();
        let doc = ConfigDocument::open(dir.path().join("clawdis.json")).await.unwrap();
        let root = doc.put_path("messages.queue.mode", serde_json::json!("collect")).await.unwrap();
        assert_eq!(root, "messages");
    }

    #[tokio::test]
    async fn missing_path_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let doc = ConfigDocument::open(dir.path().join("clawdis.json")).await.unwrap();
        assert!(doc.get_path("gateway.port").await.is_none());
    }

    #[test]
    fn changed_roots_reports_only_differing_top_level_keys() {
        let old = serde_json::json!({"channels": {"whatsapp": {}}, "agent": {"model": "a"}});
        let new = serde_json::json!({"channels": {"whatsapp": {"allowFrom": ["*"]}}, "agent": {"model": "a"}});
        let changed = changed_roots(&old, &new);
        assert_eq!(changed, HashSet::from(["channels".to_string()]));
    }

    #[tokio::test]
    async fn parsed_models_skips_entries_with_unrecognized_provider() {
        let dir = tempfile::tempdir().unwrap();
        let doc = ConfigDocument::open(dir.path().join("clawdis.json")).await.unwrap();
        doc.put_path("models.opus.provider", serde_json::json!("anthropic")).await.unwrap();
        doc.put_path("models.bogus.provider", serde_json::json!("nonexistent")).await.unwrap();
        let models = doc.parsed_models().await;
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "opus");
    }
}
