//! Offline store: the durable queue of pending uploads plus the asset cache
//!
//! Single source of truth for "what is unsynced". All mutations go
//! write-first to the durable backend, then to the in-memory index, so an
//! operation that has returned `Ok` survives a process crash. Pending items
//! and cached assets live under separate key prefixes with independent
//! lifecycles: space reclamation only ever touches assets.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::backend::DurableStore;
use crate::error::Result;
use crate::types::{base64_bytes, CachedAsset, ErrorInfo, ItemId, PendingItem, QueueConfig};

const QUEUE_PREFIX: &str = "queue/";
const ASSET_PREFIX: &str = "asset/";
const SEQ_KEY: &str = "meta/next_seq";

fn queue_key(id: ItemId) -> String {
    format!("{QUEUE_PREFIX}{id}")
}

fn asset_key(key: &str) -> String {
    format!("{ASSET_PREFIX}{key}")
}

/// Sort key giving a total FIFO order: creation time, then enqueue counter
type SortKey = (DateTime<Utc>, u64);

/// Persisted asset record; the metadata half is what the index holds
#[derive(Debug, Serialize, Deserialize)]
struct AssetRecord {
    key: String,
    size_bytes: u64,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    #[serde(with = "base64_bytes")]
    data: Vec<u8>,
}

impl AssetRecord {
    fn meta(&self) -> CachedAsset {
        CachedAsset {
            key: self.key.clone(),
            size_bytes: self.size_bytes,
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
        }
    }
}

struct Inner {
    backend: Arc<dyn DurableStore>,
    items: BTreeMap<SortKey, PendingItem>,
    by_id: HashMap<ItemId, SortKey>,
    assets: HashMap<String, CachedAsset>,
    next_seq: u64,
}

/// Durable queue of pending upload items plus a bounded cache of assets
pub struct OfflineStore {
    config: QueueConfig,
    inner: Mutex<Inner>,
}

impl OfflineStore {
    /// Open the store over a durable backend, rebuilding the in-memory
    /// index from whatever the backend holds
    ///
    /// Partial or corrupt records are skipped and logged; one damaged entry
    /// never blocks enumeration of the rest of the queue.
    pub fn open(backend: Arc<dyn DurableStore>, config: QueueConfig) -> Result<Self> {
        let mut items = BTreeMap::new();
        let mut by_id = HashMap::new();
        let mut max_seq: u64 = 0;
        let mut skipped: u64 = 0;

        for (key, bytes) in backend.enumerate(QUEUE_PREFIX)? {
            match serde_json::from_slice::<PendingItem>(&bytes) {
                Ok(item) => {
                    max_seq = max_seq.max(item.seq + 1);
                    by_id.insert(item.id, (item.created_at, item.seq));
                    items.insert((item.created_at, item.seq), item);
                }
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(key = %key, error = %e, "skipping corrupt queue record");
                }
            }
        }

        let mut assets = HashMap::new();
        for (key, bytes) in backend.enumerate(ASSET_PREFIX)? {
            match serde_json::from_slice::<AssetRecord>(&bytes) {
                Ok(record) => {
                    assets.insert(record.key.clone(), record.meta());
                }
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(key = %key, error = %e, "skipping corrupt asset record");
                }
            }
        }

        let persisted_seq = backend
            .get(SEQ_KEY)?
            .and_then(|bytes| bytes.try_into().ok().map(u64::from_le_bytes))
            .unwrap_or(0);
        let next_seq = persisted_seq.max(max_seq);

        if skipped > 0 {
            tracing::warn!(skipped, "offline store opened with damaged records skipped");
        }
        tracing::debug!(
            pending = items.len(),
            assets = assets.len(),
            "offline store opened"
        );

        Ok(Self {
            config,
            inner: Mutex::new(Inner {
                backend,
                items,
                by_id,
                assets,
                next_seq,
            }),
        })
    }

    /// Durably persist a new pending item and return its id
    ///
    /// The write has hit the backend before this returns.
    pub fn enqueue(&self, entity_type: &str, payload: Vec<u8>) -> Result<ItemId> {
        let inner = &mut *self.inner.lock();
        let seq = inner.next_seq;

        let item = PendingItem {
            id: Uuid::new_v4(),
            entity_type: entity_type.to_string(),
            payload,
            created_at: Utc::now(),
            seq,
            attempt_count: 0,
            last_attempt_at: None,
            last_error: None,
            permanently_failed: false,
        };

        inner.backend.set(SEQ_KEY, &(seq + 1).to_le_bytes())?;
        inner
            .backend
            .set(&queue_key(item.id), &serde_json::to_vec(&item)?)?;

        inner.next_seq = seq + 1;
        let id = item.id;
        inner.by_id.insert(id, (item.created_at, seq));
        inner.items.insert((item.created_at, seq), item);
        Ok(id)
    }

    /// All queued items, oldest first
    ///
    /// Permanently failed items stay visible here for inspection; filtering
    /// for retry eligibility is the engine's concern.
    pub fn list_pending(&self) -> Vec<PendingItem> {
        self.inner.lock().items.values().cloned().collect()
    }

    /// Look up a single item by id
    pub fn get(&self, id: ItemId) -> Option<PendingItem> {
        let inner = self.inner.lock();
        let key = inner.by_id.get(&id)?;
        inner.items.get(key).cloned()
    }

    /// Record a failed upload attempt against an item
    ///
    /// Once the attempt ceiling is reached the item is marked permanently
    /// failed and drops out of automatic retry until explicitly cleared.
    pub fn record_failure(&self, id: ItemId, error: ErrorInfo) -> Result<()> {
        let max_attempts = self.config.max_attempts;
        self.update_item(id, |item| {
            item.attempt_count += 1;
            item.last_attempt_at = Some(Utc::now());
            item.last_error = Some(error);
            if item.attempt_count >= max_attempts {
                item.permanently_failed = true;
                tracing::warn!(
                    id = %item.id,
                    entity_type = %item.entity_type,
                    attempts = item.attempt_count,
                    "item reached attempt ceiling, parking it"
                );
            }
        })
    }

    /// Park an item immediately, without burning through the retry ceiling
    ///
    /// Used for payloads the remote can never accept.
    pub fn mark_permanently_failed(&self, id: ItemId, error: ErrorInfo) -> Result<()> {
        self.update_item(id, |item| {
            item.attempt_count += 1;
            item.last_attempt_at = Some(Utc::now());
            item.last_error = Some(error);
            item.permanently_failed = true;
        })
    }

    fn update_item<F: FnOnce(&mut PendingItem)>(&self, id: ItemId, apply: F) -> Result<()> {
        let inner = &mut *self.inner.lock();
        let Some(key) = inner.by_id.get(&id).copied() else {
            tracing::debug!(id = %id, "update for absent item ignored");
            return Ok(());
        };
        // Mutate a copy, persist, then commit to the index, so a failed
        // backend write leaves the item as last-known-good
        let Some(current) = inner.items.get(&key) else {
            return Ok(());
        };
        let mut updated = current.clone();
        apply(&mut updated);
        inner
            .backend
            .set(&queue_key(id), &serde_json::to_vec(&updated)?)?;
        inner.items.insert(key, updated);
        Ok(())
    }

    /// Delete an item; removing an absent id is a no-op
    pub fn remove(&self, id: ItemId) -> Result<()> {
        let inner = &mut *self.inner.lock();
        inner.backend.delete(&queue_key(id))?;
        if let Some(key) = inner.by_id.remove(&id) {
            inner.items.remove(&key);
        }
        Ok(())
    }

    /// Items awaiting upload, excluding permanently failed ones
    pub fn pending_count(&self) -> u64 {
        self.inner
            .lock()
            .items
            .values()
            .filter(|item| !item.permanently_failed)
            .count() as u64
    }

    /// Items parked at the attempt ceiling, tracked for error reporting
    pub fn failed_count(&self) -> u64 {
        self.inner
            .lock()
            .items
            .values()
            .filter(|item| item.permanently_failed)
            .count() as u64
    }

    /// Reset failure flags on every item without retrying anything
    ///
    /// Attempt counts are kept, so backoff and the ceiling still apply once
    /// the items re-enter the retry pool. Returns how many items changed.
    pub fn clear_failure_flags(&self) -> Result<u64> {
        let inner = &mut *self.inner.lock();
        let mut cleared = 0u64;
        let keys: Vec<SortKey> = inner
            .items
            .iter()
            .filter(|(_, item)| item.permanently_failed || item.last_error.is_some())
            .map(|(key, _)| *key)
            .collect();

        for key in keys {
            let Some(current) = inner.items.get(&key) else {
                continue;
            };
            let mut updated = current.clone();
            updated.permanently_failed = false;
            updated.last_error = None;
            inner
                .backend
                .set(&queue_key(updated.id), &serde_json::to_vec(&updated)?)?;
            inner.items.insert(key, updated);
            cleared += 1;
        }
        Ok(cleared)
    }

    /// Store a downloaded artifact for re-use
    ///
    /// Re-caching an existing key replaces it and restarts its age.
    pub fn cache_asset(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let inner = &mut *self.inner.lock();
        let now = Utc::now();
        let record = AssetRecord {
            key: key.to_string(),
            size_bytes: bytes.len() as u64,
            created_at: now,
            last_accessed_at: now,
            data: bytes.to_vec(),
        };
        inner
            .backend
            .set(&asset_key(key), &serde_json::to_vec(&record)?)?;
        inner.assets.insert(key.to_string(), record.meta());
        Ok(())
    }

    /// Read a cached asset back, touching its access time
    pub fn get_asset(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let inner = &mut *self.inner.lock();
        let Some(bytes) = inner.backend.get(&asset_key(key))? else {
            return Ok(None);
        };
        let mut record: AssetRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cached asset is corrupt, dropping it");
                inner.backend.delete(&asset_key(key))?;
                inner.assets.remove(key);
                return Ok(None);
            }
        };

        record.last_accessed_at = Utc::now();
        inner
            .backend
            .set(&asset_key(key), &serde_json::to_vec(&record)?)?;
        inner.assets.insert(key.to_string(), record.meta());
        Ok(Some(record.data))
    }

    /// Metadata for a cached asset, if present
    pub fn asset(&self, key: &str) -> Option<CachedAsset> {
        self.inner.lock().assets.get(key).cloned()
    }

    /// Number of cached assets
    pub fn asset_count(&self) -> u64 {
        self.inner.lock().assets.len() as u64
    }

    /// Drop cached assets older than `max_age_days`
    ///
    /// Only ever touches the asset keyspace. Queued items are never subject
    /// to age-based eviction, whatever their age.
    pub fn evict_stale(&self, max_age_days: i64) -> Result<u64> {
        let inner = &mut *self.inner.lock();
        let cutoff = Utc::now() - Duration::days(max_age_days);

        let stale: Vec<String> = inner
            .assets
            .values()
            .filter(|asset| asset.created_at < cutoff)
            .map(|asset| asset.key.clone())
            .collect();

        let mut evicted = 0u64;
        for key in stale {
            inner.backend.delete(&asset_key(&key))?;
            inner.assets.remove(&key);
            evicted += 1;
        }

        if evicted > 0 {
            tracing::info!(evicted, max_age_days, "evicted stale cached assets");
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::MemoryStore;
    use crate::types::ErrorKind;

    fn open_store(backend: Arc<dyn DurableStore>) -> OfflineStore {
        OfflineStore::open(backend, QueueConfig::default()).unwrap()
    }

    #[test]
    fn enqueue_orders_by_creation_then_seq() {
        let store = open_store(Arc::new(MemoryStore::new()));
        let a = store.enqueue("checkin", b"a".to_vec()).unwrap();
        let b = store.enqueue("checkin", b"b".to_vec()).unwrap();
        let c = store.enqueue("note", b"c".to_vec()).unwrap();

        let ids: Vec<_> = store.list_pending().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![a, b, c]);

        let seqs: Vec<_> = store.list_pending().iter().map(|i| i.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn index_rebuilds_after_reopen_and_seq_does_not_rewind() {
        let backend: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        let first = open_store(backend.clone());
        let a = first.enqueue("checkin", b"a".to_vec()).unwrap();
        let b = first.enqueue("checkin", b"b".to_vec()).unwrap();
        first.remove(a).unwrap();
        drop(first);

        let second = open_store(backend);
        let remaining: Vec<_> = second.list_pending().iter().map(|i| i.id).collect();
        assert_eq!(remaining, vec![b]);

        let c = second.enqueue("checkin", b"c".to_vec()).unwrap();
        assert!(second.get(c).unwrap().seq > second.get(b).unwrap().seq);
    }

    #[test]
    fn corrupt_records_are_skipped_not_fatal() {
        let backend: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        let first = open_store(backend.clone());
        let good = first.enqueue("checkin", b"good".to_vec()).unwrap();
        drop(first);

        backend.set("queue/not-even-json", b"{truncated").unwrap();
        backend.set("asset/broken", b"\xff\xfe").unwrap();

        let second = open_store(backend);
        let ids: Vec<_> = second.list_pending().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![good]);
        assert_eq!(second.asset_count(), 0);
    }

    #[test]
    fn failure_ceiling_parks_item() {
        let store = open_store(Arc::new(MemoryStore::new()));
        let id = store.enqueue("checkin", b"x".to_vec()).unwrap();

        for n in 1..=5u32 {
            store
                .record_failure(id, ErrorInfo::new(ErrorKind::Transport, "rejected"))
                .unwrap();
            let item = store.get(id).unwrap();
            assert_eq!(item.attempt_count, n);
            assert_eq!(item.permanently_failed, n >= 5);
        }

        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.failed_count(), 1);
        // Still enumerable for reporting
        assert_eq!(store.list_pending().len(), 1);
    }

    #[test]
    fn clear_failure_flags_keeps_attempt_count() {
        let store = open_store(Arc::new(MemoryStore::new()));
        let id = store.enqueue("checkin", b"x".to_vec()).unwrap();
        store
            .mark_permanently_failed(id, ErrorInfo::new(ErrorKind::Serialization, "bad payload"))
            .unwrap();
        assert_eq!(store.pending_count(), 0);

        let cleared = store.clear_failure_flags().unwrap();
        assert_eq!(cleared, 1);

        let item = store.get(id).unwrap();
        assert!(!item.permanently_failed);
        assert_eq!(item.last_error, None);
        assert_eq!(item.attempt_count, 1);
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let store = open_store(Arc::new(MemoryStore::new()));
        let id = store.enqueue("checkin", b"x".to_vec()).unwrap();
        store.remove(id).unwrap();
        store.remove(id).unwrap();
        store.remove(Uuid::new_v4()).unwrap();
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn eviction_only_touches_assets() {
        let store = open_store(Arc::new(MemoryStore::new()));
        let id = store.enqueue("checkin", b"keep me".to_vec()).unwrap();
        store.cache_asset("map-tile", b"pixels").unwrap();

        // Cutoff of zero days makes everything created before "now" stale
        let evicted = store.evict_stale(0).unwrap();
        assert_eq!(evicted, 1);
        assert_eq!(store.asset_count(), 0);
        assert_eq!(store.get_asset("map-tile").unwrap(), None);

        // The queued item is untouchable by eviction
        assert_eq!(store.get(id).unwrap().payload, b"keep me".to_vec());
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn get_asset_touches_access_time() {
        let store = open_store(Arc::new(MemoryStore::new()));
        store.cache_asset("avatar", b"bytes").unwrap();
        let before = store.asset("avatar").unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        let data = store.get_asset("avatar").unwrap().unwrap();
        assert_eq!(data, b"bytes".to_vec());

        let after = store.asset("avatar").unwrap();
        assert!(after.last_accessed_at > before.last_accessed_at);
        assert_eq!(after.created_at, before.created_at);
    }
}
