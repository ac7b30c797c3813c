//! Durable key-value backend trait
//!
//! The offline store talks to durability through this trait so the
//! underlying engine (SQLite today, anything with ordered keys tomorrow)
//! can be swapped without touching queue logic.
//!
//! # Design Principles
//!
//! 1. **Sync Interface**: All methods are synchronous. Callers hold the
//!    store lock only for the duration of one operation; async wrappers
//!    belong at a higher level if ever needed.
//!
//! 2. **Error Handling**: All methods return `Result<T>` using the crate's
//!    error type.
//!
//! 3. **Immutable Self**: Methods take `&self` to allow interior-mutability
//!    patterns in implementations.
//!
//! 4. **Write visibility**: a `set` that has returned `Ok` must be visible
//!    to every subsequent `get`/`enumerate`, including after a process
//!    restart for persistent implementations.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::error::Result;

/// Opaque durable key-value primitives underneath the offline store
pub trait DurableStore: Send + Sync {
    /// Read a value by key
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Delete a key; absent keys are a no-op
    fn delete(&self, key: &str) -> Result<()>;

    /// List all entries whose key starts with `prefix`, in key order
    fn enumerate(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
}

/// In-memory backend for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn enumerate(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let entries = self.entries.lock();
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete_round_trip() {
        let store = MemoryStore::new();
        store.set("queue/a", b"one").unwrap();
        assert_eq!(store.get("queue/a").unwrap(), Some(b"one".to_vec()));

        store.set("queue/a", b"two").unwrap();
        assert_eq!(store.get("queue/a").unwrap(), Some(b"two".to_vec()));

        store.delete("queue/a").unwrap();
        assert_eq!(store.get("queue/a").unwrap(), None);
        // Deleting again is a no-op
        store.delete("queue/a").unwrap();
    }

    #[test]
    fn enumerate_respects_prefix_and_order() {
        let store = MemoryStore::new();
        store.set("asset/z", b"3").unwrap();
        store.set("queue/b", b"2").unwrap();
        store.set("queue/a", b"1").unwrap();
        store.set("meta/next_seq", b"0").unwrap();

        let keys: Vec<String> = store
            .enumerate("queue/")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["queue/a".to_string(), "queue/b".to_string()]);
    }
}
