//! Node pairing registry: separate crate with its own SQLite storage.
//!
//! - **Node**: a remote client (TUI/CLI/companion device) that pairs with
//!   the gateway once, then reconnects using its paired credential.
//! - `nodes/pending.json` / `nodes/paired.json` in the on-disk layout are
//!   produced by exporting this store's tables; the store itself keeps its
//!   own SQLite database (same mechanism the workspace/thread store used).

mod store;

pub use store::{NodeStatus, NodeSummary, Store, StoreError};
