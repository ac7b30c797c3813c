//! Carrier - offline-first sync core
//!
//! Durable queue of not-yet-uploaded user actions, connectivity tracking,
//! and a single-flight sync engine that reconciles the queue with a remote
//! service whenever connectivity allows. A queued action survives process
//! restarts and is never discarded by space reclamation.

pub mod error;
pub mod network;
pub mod store;
pub mod sync;
pub mod types;

pub use error::{CarrierError, Result};
pub use network::{ManualProbe, NetworkMonitor};
pub use store::{DurableStore, MemoryStore, OfflineStore, SqliteStore};
pub use sync::{MockTransport, SyncEngine, Transport, UploadError};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
