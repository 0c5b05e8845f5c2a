//! Session key resolution, the session store, and pairing requests
//! (spec §3 SessionKey/SessionEntry/SessionStore/PairingRequest, §4.2).

mod key;
mod pairing;
mod store;
pub mod transcript;

pub use key::{resolve_session_key, slugify, SessionScope};
pub use pairing::{PairingError, PairingRequest, PairingStore};
pub use store::{SessionEntry, SessionStore, SessionStoreError};
pub use transcript::{Role, TranscriptError, TranscriptRecord, TranscriptStore};

/// A resolved, stable conversation identifier (spec §3 "SessionKey").
pub type SessionKey = String;

/// Reserved global-scope key.
pub const GLOBAL_SESSION_KEY: &str = "global";
