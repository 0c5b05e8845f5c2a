//! PairingRequest: explicit owner approval for an unknown sender or node
//! (spec §3 "PairingRequest", §8 pairing invariants).

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const CODE_LEN: usize = 8;
/// Excludes `{0,O,1,I}` (spec §3).
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const TTL_SECONDS: i64 = 3600;
const MAX_PENDING_PER_CHANNEL: usize = 3;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PairingRequest {
    pub code: String,
    pub channel: String,
    pub peer: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl PairingRequest {
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("too many pending pairing requests for channel {0}")]
    TooManyPending(String),
    #[error("no pending pairing request with code {0}")]
    NotFound(String),
}

fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// In-memory pairing request registry. Persisted to
/// `credentials/<channel>-pairing.json` by the owning adapter; this type
/// holds the live, TTL-pruned set.
#[derive(Default)]
pub struct PairingStore {
    requests: Arc<Mutex<HashMap<String, PairingRequest>>>,
}

impl PairingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new pairing request for `(channel, peer)`. At most 3
    /// pending requests may exist per channel at a time (spec §3/§8).
    pub async fn create(&self, channel: &str, peer: &str) -> Result<PairingRequest, PairingError> {
        let mut guard = self.requests.lock().await;
        let now = chrono::Utc::now();
        guard.retain(|_, r| !r.is_expired(now));

        let pending_for_channel = guard.values().filter(|r| r.channel == channel).count();
        if pending_for_channel >= MAX_PENDING_PER_CHANNEL {
            return Err(PairingError::TooManyPending(channel.to_string()));
        }

        let code = loop {
            let candidate = generate_code();
            if !guard.contains_key(&candidate) {
                break candidate;
            }
        };

        let request = PairingRequest {
            code: code.clone(),
            channel: channel.to_string(),
            peer: peer.to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::seconds(TTL_SECONDS),
        };
        guard.insert(code, request.clone());
        Ok(request)
    }

    /// Lists non-expired pairing requests (`pairing.list` RPC).
    pub async fn list(&self) -> Vec<PairingRequest> {
        let now = chrono::Utc::now();
        self.requests
            .lock()
            .await
            .values()
            .filter(|r| !r.is_expired(now))
            .cloned()
            .collect()
    }

    /// Approves and removes a pairing request (`pairing.approve` RPC).
    pub async fn approve(&self, code: &str) -> Result<PairingRequest, PairingError> {
        let mut guard = self.requests.lock().await;
        let now = chrono::Utc::now();
        match guard.remove(code) {
            Some(r) if !r.is_expired(now) => Ok(r),
            _ => Err(PairingError::NotFound(code.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn code_charset_excludes_ambiguous_chars() {
        let store = PairingStore::new();
        for _ in 0..20 {
            let req = store.create("whatsapp", "peer").await.unwrap();
            assert_eq!(req.code.len(), CODE_LEN);
            assert!(req.code.chars().all(|c| "0O1I".find(c).is_none()));
            // drop back below the cap between iterations
            store.approve(&req.code).await.unwrap();
        }
    }

    #[tokio::test]
    async fn rejects_beyond_three_pending_per_channel() {
        let store = PairingStore::new();
        for i in 0..3 {
            store.create("telegram", &format!("peer{i}")).await.unwrap();
        }
        assert!(matches!(
            store.create("telegram", "peer4").await,
            Err(PairingError::TooManyPending(_))
        ));
    }

    #[tokio::test]
    async fn ttl_is_one_hour() {
        let store = PairingStore::new();
        let req = store.create("slack", "peer").await.unwrap();
        let delta = req.expires_at - req.created_at;
        assert_eq!(delta.num_seconds(), TTL_SECONDS);
    }
}
