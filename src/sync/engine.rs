//! Sync engine: drains the offline queue against the transport
//!
//! One worker task owns all queue mutation, so cycles never overlap. A
//! cycle is started by connectivity regain, a periodic tick, or an explicit
//! [`SyncEngine::force_sync_now`]; whichever fires first wins, and every
//! caller that asks while a cycle is in flight joins that cycle instead of
//! starting another.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::backoff;
use super::transport::{Transport, UploadError};
use crate::store::OfflineStore;
use crate::types::{
    CycleOutcome, EngineConfig, ErrorInfo, ErrorKind, NetworkState, PendingItem, SyncPhase,
    SyncStatus,
};

#[derive(Debug)]
enum Command {
    RunCycle,
    Shutdown,
}

/// Single-flight bookkeeping: whether a cycle is scheduled or running, and
/// who is waiting for it to finish
#[derive(Default)]
struct Flight {
    scheduled: bool,
    shutdown: bool,
    waiters: Vec<oneshot::Sender<CycleOutcome>>,
}

struct EngineShared {
    store: Arc<OfflineStore>,
    transport: Arc<dyn Transport>,
    config: EngineConfig,
    flight: Mutex<Flight>,
    status_tx: watch::Sender<SyncStatus>,
    cmd_tx: mpsc::Sender<Command>,
}

impl EngineShared {
    /// Rebuild and publish a status snapshot; `pending_count` is always
    /// recomputed from the store, never carried over
    fn publish<F: FnOnce(&mut SyncStatus)>(&self, apply: F) {
        let mut status = self.status_tx.borrow().clone();
        apply(&mut status);
        status.pending_count = self.store.pending_count();
        self.status_tx.send_replace(status);
    }

    /// Claim the right to run a cycle; false when one is already scheduled
    /// or the engine is shutting down
    fn try_begin(&self) -> bool {
        let mut flight = self.flight.lock();
        if flight.shutdown || flight.scheduled {
            false
        } else {
            flight.scheduled = true;
            true
        }
    }
}

/// Orchestrates sync cycles and publishes [`SyncStatus`]
///
/// Construct one at application startup and hand references to whatever
/// needs it; the engine holds no durable state of its own.
pub struct SyncEngine {
    inner: Arc<EngineShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Start the engine worker
    ///
    /// `network` is a subscription from [`crate::NetworkMonitor`]; when
    /// given, an offline-to-online transition triggers a cycle. Without it
    /// the engine relies on explicit and periodic triggers only.
    pub fn start(
        store: Arc<OfflineStore>,
        transport: Arc<dyn Transport>,
        network: Option<watch::Receiver<NetworkState>>,
        config: EngineConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let initial = SyncStatus {
            phase: SyncPhase::Idle,
            last_sync_at: None,
            last_error: None,
            pending_count: store.pending_count(),
        };
        let (status_tx, _) = watch::channel(initial);

        let shared = Arc::new(EngineShared {
            store,
            transport,
            config,
            flight: Mutex::new(Flight::default()),
            status_tx,
            cmd_tx,
        });

        let has_monitor = network.is_some();
        // Engines without a monitor get a silent stand-in receiver so the
        // worker loop has one shape either way
        let (net_rx, net_keepalive) = match network {
            Some(rx) => (rx, None),
            None => {
                let (tx, rx) = watch::channel(NetworkState::default());
                (rx, Some(tx))
            }
        };

        let worker = Worker {
            shared: shared.clone(),
            cmd_rx,
            net_rx,
            _net_keepalive: net_keepalive,
            net_alive: true,
            has_monitor,
        };
        let handle = tokio::spawn(worker.run());

        Self {
            inner: shared,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Current snapshot, with `pending_count` read fresh from the store
    pub fn status(&self) -> SyncStatus {
        let mut status = self.inner.status_tx.borrow().clone();
        status.pending_count = self.inner.store.pending_count();
        status
    }

    /// Subscribe to status snapshots
    ///
    /// Notified on every phase transition and on every periodic
    /// pending-count refresh.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Run a sync cycle now, or join the one already in flight
    ///
    /// Concurrent callers all observe the completion of the same cycle.
    /// An outcome with `aborted` set and no error means the engine shut
    /// down before the cycle could run.
    pub async fn force_sync_now(&self) -> CycleOutcome {
        let (tx, rx) = oneshot::channel();
        let needs_start = {
            let mut flight = self.inner.flight.lock();
            if flight.shutdown {
                return shutdown_outcome();
            }
            flight.waiters.push(tx);
            if flight.scheduled {
                false
            } else {
                flight.scheduled = true;
                true
            }
        };

        if needs_start && self.inner.cmd_tx.send(Command::RunCycle).await.is_err() {
            // Worker is gone; resolve everyone who was waiting on it
            let waiters = {
                let mut flight = self.inner.flight.lock();
                flight.shutdown = true;
                flight.scheduled = false;
                std::mem::take(&mut flight.waiters)
            };
            drop(waiters);
        }

        rx.await.unwrap_or_else(|_| shutdown_outcome())
    }

    /// Reset error reporting without retrying anything
    ///
    /// Clears the engine's `last_error`, leaves the `Error` phase, and
    /// clears failure flags on queued items so they re-enter the retry
    /// pool on the next trigger. Returns how many items were cleared.
    pub fn clear_sync_errors(&self) -> crate::error::Result<u64> {
        let cleared = self.inner.store.clear_failure_flags()?;
        self.inner.publish(|status| {
            status.last_error = None;
            if status.phase == SyncPhase::Error {
                status.phase = SyncPhase::Idle;
            }
        });
        if cleared > 0 {
            tracing::info!(cleared, "failure flags cleared");
        }
        Ok(cleared)
    }

    /// Reclaim cache space, then force a cycle
    ///
    /// Evicts cached assets older than the configured threshold and runs
    /// (or joins) a sync cycle. Permanently failed items stay parked; use
    /// [`Self::clear_sync_errors`] first to put them back in play.
    pub async fn retry_failed_uploads(&self) -> CycleOutcome {
        match self
            .inner
            .store
            .evict_stale(self.inner.config.stale_asset_max_age_days)
        {
            Ok(evicted) if evicted > 0 => {
                tracing::info!(evicted, "reclaimed cache space before retry");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "cache eviction failed, retrying uploads anyway");
            }
        }
        self.force_sync_now().await
    }

    /// Stop the worker, letting an in-flight cycle finish first
    pub async fn shutdown(&self) {
        {
            let mut flight = self.inner.flight.lock();
            flight.shutdown = true;
        }
        let _ = self.inner.cmd_tx.send(Command::Shutdown).await;

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        // Anyone still waiting sees a closed channel and resolves
        let waiters = {
            let mut flight = self.inner.flight.lock();
            flight.scheduled = false;
            std::mem::take(&mut flight.waiters)
        };
        drop(waiters);
        tracing::info!("sync engine stopped");
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }
}

fn shutdown_outcome() -> CycleOutcome {
    CycleOutcome {
        aborted: true,
        ..CycleOutcome::default()
    }
}

struct Worker {
    shared: Arc<EngineShared>,
    cmd_rx: mpsc::Receiver<Command>,
    net_rx: watch::Receiver<NetworkState>,
    _net_keepalive: Option<watch::Sender<NetworkState>>,
    net_alive: bool,
    has_monitor: bool,
}

impl Worker {
    async fn run(mut self) {
        let refresh_period =
            Duration::from_millis(self.shared.config.refresh_interval_ms.max(1));
        let mut refresh = interval_at(Instant::now() + refresh_period, refresh_period);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let sync_enabled = self.shared.config.sync_interval_ms.is_some();
        let sync_period = Duration::from_millis(
            self.shared.config.sync_interval_ms.unwrap_or(86_400_000).max(1),
        );
        let mut sync_tick = interval_at(Instant::now() + sync_period, sync_period);
        sync_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut was_online = self.net_rx.borrow_and_update().is_online();

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::RunCycle) => {
                        run_cycle(&self.shared).await;
                    }
                    Some(Command::Shutdown) | None => break,
                },
                _ = refresh.tick() => {
                    self.shared.publish(|_| {});
                }
                _ = sync_tick.tick(), if sync_enabled => {
                    let online_enough = !self.has_monitor || was_online;
                    if online_enough
                        && self.shared.store.pending_count() > 0
                        && self.shared.try_begin()
                    {
                        tracing::debug!("periodic sync tick");
                        run_cycle(&self.shared).await;
                    }
                }
                changed = self.net_rx.changed(), if self.net_alive => {
                    match changed {
                        Ok(()) => {
                            let online = self.net_rx.borrow_and_update().is_online();
                            if online
                                && !was_online
                                && self.shared.store.pending_count() > 0
                                && self.shared.try_begin()
                            {
                                tracing::info!("connectivity regained, syncing");
                                was_online = online;
                                run_cycle(&self.shared).await;
                            } else {
                                was_online = online;
                            }
                        }
                        Err(_) => self.net_alive = false,
                    }
                }
            }
        }
        tracing::info!("sync worker stopped");
    }
}

/// One sync cycle, entered only with the flight claim held
///
/// The work list is fixed at cycle start; items enqueued while the cycle
/// runs wait for the next trigger.
async fn run_cycle(shared: &EngineShared) -> CycleOutcome {
    shared.publish(|status| status.phase = SyncPhase::Syncing);

    let now = Utc::now();
    let work: Vec<PendingItem> = shared
        .store
        .list_pending()
        .into_iter()
        .filter(|item| {
            backoff::is_eligible(
                item,
                now,
                shared.config.base_delay_ms,
                shared.config.max_delay_ms,
            )
        })
        .collect();
    tracing::debug!(eligible = work.len(), "sync cycle started");

    let mut outcome = CycleOutcome::default();
    for item in &work {
        outcome.attempted += 1;
        match shared.transport.upload(item).await {
            Ok(()) => {
                outcome.succeeded += 1;
                if let Err(e) = shared.store.remove(item.id) {
                    // Uploaded but not removed: leave it as last-known-good
                    // rather than failing the cycle
                    tracing::error!(id = %item.id, error = %e, "failed to remove uploaded item");
                }
            }
            Err(UploadError::Network(message)) => {
                // Transport-wide failure: stop here, unattempted items stay
                // completely untouched
                outcome.aborted = true;
                outcome.error = Some(ErrorInfo::new(ErrorKind::Network, message));
                break;
            }
            Err(error @ UploadError::Rejected(_)) => {
                outcome.failed += 1;
                if let Err(e) = shared.store.record_failure(item.id, error.to_error_info()) {
                    tracing::error!(id = %item.id, error = %e, "failed to record upload failure");
                }
            }
            Err(error @ UploadError::Invalid(_)) => {
                outcome.failed += 1;
                if let Err(e) = shared
                    .store
                    .mark_permanently_failed(item.id, error.to_error_info())
                {
                    tracing::error!(id = %item.id, error = %e, "failed to park invalid item");
                }
            }
        }
    }

    if outcome.aborted {
        let error = outcome.error.clone();
        shared.publish(|status| {
            status.phase = SyncPhase::Error;
            status.last_error = error;
        });
        tracing::warn!(
            succeeded = outcome.succeeded,
            "sync cycle aborted, connectivity lost mid-cycle"
        );
    } else {
        let finished_at = Utc::now();
        shared.publish(|status| {
            status.phase = SyncPhase::Idle;
            status.last_sync_at = Some(finished_at);
            status.last_error = None;
        });
        tracing::info!(
            attempted = outcome.attempted,
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            "sync cycle completed"
        );
    }

    // Release the flight claim and resolve everyone who joined this cycle
    let waiters = {
        let mut flight = shared.flight.lock();
        flight.scheduled = false;
        std::mem::take(&mut flight.waiters)
    };
    for waiter in waiters {
        let _ = waiter.send(outcome.clone());
    }
    outcome
}
