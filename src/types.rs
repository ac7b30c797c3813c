//! Core types for Carrier

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a queued item
pub type ItemId = Uuid;

/// Whether the internet is actually reachable, beyond link-level connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    Yes,
    No,
    #[default]
    Unknown,
}

/// Physical connection type reported by the platform probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Wifi,
    Cellular,
    Ethernet,
    None,
    #[default]
    Unknown,
}

/// Immutable connectivity snapshot, replaced wholesale on each probe update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NetworkState {
    /// Link-level connectivity
    pub is_connected: bool,
    /// Whether the wider internet answered the last reachability check
    pub internet_reachable: Reachability,
    /// Connection type
    pub connection_type: ConnectionType,
}

impl NetworkState {
    /// Online for sync purposes: connected and the internet confirmed reachable
    pub fn is_online(&self) -> bool {
        self.is_connected && self.internet_reachable == Reachability::Yes
    }

    /// Snapshot for a confirmed-online connection
    pub fn online(connection_type: ConnectionType) -> Self {
        Self {
            is_connected: true,
            internet_reachable: Reachability::Yes,
            connection_type,
        }
    }

    /// Snapshot for a fully offline device
    pub fn offline() -> Self {
        Self {
            is_connected: false,
            internet_reachable: Reachability::No,
            connection_type: ConnectionType::None,
        }
    }
}

/// Phase of the sync engine state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
    Error,
}

/// Failure category, surfaced as data rather than thrown across the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Connectivity lost mid-cycle; no item-level penalty
    Network,
    /// Remote rejected or timed out for one item; retried with backoff
    Transport,
    /// Payload malformed; permanent immediately
    Serialization,
    /// Durable store operation failed; item left as last-known-good
    Storage,
}

/// A recorded failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Sync status snapshot published to subscribers
///
/// `pending_count` is recomputed from the store every time a snapshot is
/// built, never cached on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorInfo>,
    pub pending_count: u64,
}

/// A durably queued, not-yet-confirmed user action awaiting upload
///
/// Owned exclusively by the offline store; mutated only through it during a
/// sync cycle; destroyed only on confirmed upload or explicit removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingItem {
    pub id: ItemId,
    /// Caller-defined tag describing what kind of action this is
    pub entity_type: String,
    /// Opaque serialized action payload
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    /// Monotonic enqueue counter; makes FIFO order total within one timestamp
    pub seq: u64,
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorInfo>,
    /// Retry ceiling reached; excluded from automatic retry until cleared
    pub permanently_failed: bool,
}

/// Metadata for a re-fetchable downloaded artifact
///
/// Unlike a [`PendingItem`], losing one of these never loses user data, so
/// assets are subject to age-based eviction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAsset {
    pub key: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// Result of one sync cycle, delivered to every caller that joined it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CycleOutcome {
    /// Uploads attempted, including one cut short by a connectivity loss
    pub attempted: u64,
    pub succeeded: u64,
    /// Per-item failures recorded against their items
    pub failed: u64,
    /// Cycle ended early on a transport-wide failure
    pub aborted: bool,
    pub error: Option<ErrorInfo>,
}

/// Configuration for the network monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Coalescing window for raw probe events, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    300
}

/// Configuration for the offline store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Attempt ceiling after which an item is marked permanently failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

/// Configuration for the sync engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base retry delay; an item with `attempt_count = n` waits `base * 2^n`
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on the computed retry delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// How often the pending count is republished while idle
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    /// Optional periodic sync trigger; disabled when `None`
    #[serde(default)]
    pub sync_interval_ms: Option<u64>,
    /// Age threshold used when reclaiming cache space before a forced retry
    #[serde(default = "default_stale_asset_max_age_days")]
    pub stale_asset_max_age_days: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            refresh_interval_ms: default_refresh_interval_ms(),
            sync_interval_ms: None,
            stale_asset_max_age_days: default_stale_asset_max_age_days(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    300_000
}

fn default_refresh_interval_ms() -> u64 {
    30_000
}

fn default_stale_asset_max_age_days() -> i64 {
    7
}

/// Serialize byte payloads as base64 strings instead of JSON number arrays
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}
