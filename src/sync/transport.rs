//! Transport collaborator: the "upload one item" seam
//!
//! The engine never talks to a concrete remote; it drives this trait and
//! classifies failures by variant. A scripted [`MockTransport`] ships here
//! for tests and offline development.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::types::{ErrorInfo, ErrorKind, ItemId, PendingItem};

/// Outcome of a single upload attempt
pub type UploadResult = std::result::Result<(), UploadError>;

/// Upload failure classification
///
/// The variant decides what the engine does with the rest of the cycle:
/// `Network` aborts it wholesale, `Rejected` penalizes one item and moves
/// on, `Invalid` parks the item immediately.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    /// Connectivity lost; the whole cycle stops, no item-level penalty
    #[error("network unavailable: {0}")]
    Network(String),

    /// Remote rejected or timed out for this item; retried with backoff
    #[error("rejected by remote: {0}")]
    Rejected(String),

    /// Payload the remote can never accept; no amount of retrying helps
    #[error("invalid payload: {0}")]
    Invalid(String),
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::Network(_) => ErrorKind::Network,
            UploadError::Rejected(_) => ErrorKind::Transport,
            UploadError::Invalid(_) => ErrorKind::Serialization,
        }
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo::new(self.kind(), self.to_string())
    }
}

/// Uploads one pending item to the remote service
#[async_trait]
pub trait Transport: Send + Sync {
    async fn upload(&self, item: &PendingItem) -> UploadResult;
}

type Handler = dyn Fn(&PendingItem) -> UploadResult + Send + Sync;

/// Scripted transport double
///
/// The handler decides each item's fate; every attempted upload is recorded
/// in call order for assertions.
pub struct MockTransport {
    handler: Box<Handler>,
    delay: Option<Duration>,
    uploads: Mutex<Vec<ItemId>>,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&PendingItem) -> UploadResult + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            delay: None,
            uploads: Mutex::new(Vec::new()),
        }
    }

    /// Transport that accepts everything
    pub fn succeeding() -> Self {
        Self::new(|_| Ok(()))
    }

    /// Make every upload take `delay` before resolving
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Item ids in the order uploads were attempted
    pub fn uploads(&self) -> Vec<ItemId> {
        self.uploads.lock().clone()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn upload(&self, item: &PendingItem) -> UploadResult {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.uploads.lock().push(item.id);
        (self.handler)(item)
    }
}
