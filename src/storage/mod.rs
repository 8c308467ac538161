//! Persistence: one JSON state record, a post document, and the HTTP
//! response cache snapshot, all written through an atomic file-backed
//! key-value store.

mod json_store;
mod posts;
mod state;

pub(crate) use json_store::atomic_write;
pub use json_store::{JsonStore, StoreError};
pub use posts::{MergeOutcome, Post, PostStore};
pub use state::{AppState, ProxyScoreRecord, Settings, Subscription};
