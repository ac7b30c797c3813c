//! Exponential retry backoff

use chrono::{DateTime, Duration, Utc};

use crate::types::PendingItem;

/// Delay before an item with `attempt_count` prior failures may retry
///
/// `base * 2^n`, saturating, capped at `max_delay_ms`. Zero attempts means
/// no delay at all.
pub fn retry_delay(base_delay_ms: u64, attempt_count: u32, max_delay_ms: u64) -> Duration {
    if attempt_count == 0 {
        return Duration::zero();
    }
    let multiplier = 1u64.checked_shl(attempt_count).unwrap_or(u64::MAX);
    let delay_ms = base_delay_ms.saturating_mul(multiplier).min(max_delay_ms);
    Duration::milliseconds(delay_ms.min(i64::MAX as u64) as i64)
}

/// Whether an item may be attempted at `now`
///
/// Permanently failed items are never eligible; fresh items always are.
pub fn is_eligible(
    item: &PendingItem,
    now: DateTime<Utc>,
    base_delay_ms: u64,
    max_delay_ms: u64,
) -> bool {
    if item.permanently_failed {
        return false;
    }
    if item.attempt_count == 0 {
        return true;
    }
    let Some(last_attempt) = item.last_attempt_at else {
        return true;
    };
    now.signed_duration_since(last_attempt)
        >= retry_delay(base_delay_ms, item.attempt_count, max_delay_ms)
}
