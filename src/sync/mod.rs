//! Sync orchestration
//!
//! The engine reacts to connectivity regain, periodic ticks, and manual
//! triggers; at most one sync cycle runs at any instant, and concurrent
//! requests join the in-flight cycle rather than queueing another.

pub mod backoff;
mod engine;
mod transport;

pub use engine::SyncEngine;
pub use transport::{MockTransport, Transport, UploadError, UploadResult};
