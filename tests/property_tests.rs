//! Property-based tests for carrier
//!
//! These tests verify invariants that must hold for all inputs:
//! - The pending count always matches the live item set
//! - FIFO order is total and stable
//! - Backoff grows monotonically and respects its cap
//! - Eviction can never reach the queue
//!
//! Run with: cargo test --test property_tests

use std::sync::Arc;

use proptest::prelude::*;

use carrier::sync::backoff;
use carrier::{ErrorInfo, ErrorKind, ItemId, MemoryStore, OfflineStore, QueueConfig};

fn open_store(max_attempts: u32) -> OfflineStore {
    OfflineStore::open(Arc::new(MemoryStore::new()), QueueConfig { max_attempts }).unwrap()
}

// ============================================================================
// QUEUE ACCOUNTING
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Enqueue,
    Remove(usize),
    Fail(usize),
    ClearFlags,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Enqueue),
        2 => (0usize..16).prop_map(Op::Remove),
        3 => (0usize..16).prop_map(Op::Fail),
        1 => Just(Op::ClearFlags),
    ]
}

proptest! {
    /// Invariant: pending_count is exactly the number of live items that
    /// are not permanently failed, whatever sequence of operations ran
    #[test]
    fn pending_count_matches_live_item_set(ops in proptest::collection::vec(op_strategy(), 1..50)) {
        let store = open_store(3);
        let mut ids: Vec<ItemId> = Vec::new();

        for op in ops {
            match op {
                Op::Enqueue => ids.push(store.enqueue("op", vec![1]).unwrap()),
                Op::Remove(n) => {
                    if let Some(&id) = ids.get(n % ids.len().max(1)) {
                        store.remove(id).unwrap();
                    }
                }
                Op::Fail(n) => {
                    if let Some(&id) = ids.get(n % ids.len().max(1)) {
                        store
                            .record_failure(id, ErrorInfo::new(ErrorKind::Transport, "refused"))
                            .unwrap();
                    }
                }
                Op::ClearFlags => {
                    store.clear_failure_flags().unwrap();
                }
            }

            let items = store.list_pending();
            let live = items.iter().filter(|i| !i.permanently_failed).count() as u64;
            prop_assert_eq!(store.pending_count(), live);
            prop_assert_eq!(store.failed_count(), items.len() as u64 - live);
        }
    }

    /// Invariant: items come back in enqueue order with strictly
    /// increasing sequence numbers and non-decreasing creation times
    #[test]
    fn listing_is_strictly_fifo(count in 1usize..25) {
        let store = open_store(5);
        let mut expected = Vec::new();
        for n in 0..count {
            expected.push(store.enqueue("op", vec![n as u8]).unwrap());
        }

        let items = store.list_pending();
        let listed: Vec<_> = items.iter().map(|i| i.id).collect();
        prop_assert_eq!(listed, expected);

        for pair in items.windows(2) {
            prop_assert!(pair[0].created_at <= pair[1].created_at);
            prop_assert!(pair[0].seq < pair[1].seq);
        }
    }

    /// Invariant: age-based eviction removes assets only, never queue items
    #[test]
    fn eviction_never_touches_the_queue(
        items in 1usize..10,
        assets in 0usize..10,
        age in 0i64..30,
    ) {
        let store = open_store(5);
        for n in 0..items {
            store.enqueue("op", vec![n as u8]).unwrap();
        }
        for n in 0..assets {
            store.cache_asset(&format!("asset-{n}"), b"data").unwrap();
        }

        store.evict_stale(age).unwrap();
        prop_assert_eq!(store.list_pending().len(), items);
        prop_assert_eq!(store.pending_count(), items as u64);
    }
}

// ============================================================================
// BACKOFF
// ============================================================================

proptest! {
    /// Invariant: delay never shrinks as attempts accumulate and never
    /// exceeds the cap
    #[test]
    fn backoff_is_monotonic_and_capped(
        base in 1u64..5_000,
        max in 1u64..600_000,
        attempts in 0u32..64,
    ) {
        let current = backoff::retry_delay(base, attempts, max);
        let next = backoff::retry_delay(base, attempts + 1, max);
        prop_assert!(next >= current);
        prop_assert!(next <= chrono::Duration::milliseconds(max as i64));
    }

    /// Invariant: huge attempt counts saturate instead of overflowing
    #[test]
    fn backoff_never_panics(base in 0u64..u64::MAX, attempts in 0u32..u32::MAX) {
        let _ = backoff::retry_delay(base, attempts, 300_000);
    }
}
