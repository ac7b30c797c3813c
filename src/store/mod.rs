//! Durable storage for the sync core
//!
//! [`OfflineStore`] owns the pending-upload queue and the asset cache on
//! top of a swappable [`DurableStore`] key-value backend.

mod backend;
mod queue;
mod sqlite;

pub use backend::{DurableStore, MemoryStore};
pub use queue::OfflineStore;
pub use sqlite::SqliteStore;
