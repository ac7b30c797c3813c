//! Connectivity tracking
//!
//! [`NetworkMonitor`] wraps a platform connectivity probe: it keeps the
//! last accepted [`NetworkState`] snapshot, coalesces rapid flapping behind
//! a debounce window, and fans accepted transitions out through a watch
//! channel. New subscribers observe the current snapshot immediately, so
//! there is never a stale gap between subscribing and the first update.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::types::{MonitorConfig, NetworkState};

/// Push handle standing in for a platform probe
///
/// Real deployments wire the platform's reachability callbacks to
/// [`ManualProbe::push`]; tests drive it directly.
#[derive(Clone)]
pub struct ManualProbe {
    tx: mpsc::Sender<NetworkState>,
}

impl ManualProbe {
    /// Create a probe handle and the raw event stream it feeds
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<NetworkState>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    /// Push a raw connectivity event; dropped silently if the monitor is gone
    pub async fn push(&self, state: NetworkState) {
        let _ = self.tx.send(state).await;
    }
}

/// Tracks connectivity from a probe's raw event stream
pub struct NetworkMonitor {
    state_rx: watch::Receiver<NetworkState>,
    task: JoinHandle<()>,
}

impl NetworkMonitor {
    /// Start the monitor over a raw probe event stream
    pub fn start(
        initial: NetworkState,
        events: mpsc::Receiver<NetworkState>,
        config: MonitorConfig,
    ) -> Self {
        let (tx, state_rx) = watch::channel(initial);
        let debounce = Duration::from_millis(config.debounce_ms);
        let task = tokio::spawn(run_monitor(tx, events, debounce));
        Self { state_rx, task }
    }

    /// Start the monitor together with a [`ManualProbe`] feeding it
    pub fn with_manual_probe(initial: NetworkState, config: MonitorConfig) -> (Self, ManualProbe) {
        let (probe, events) = ManualProbe::new(32);
        (Self::start(initial, events, config), probe)
    }

    /// Last accepted snapshot; never queries the platform synchronously
    pub fn current_state(&self) -> NetworkState {
        *self.state_rx.borrow()
    }

    /// Subscribe to connectivity transitions
    ///
    /// The receiver holds the current snapshot right away and is notified
    /// on every accepted transition afterwards.
    pub fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.state_rx.clone()
    }

    /// Stop the monitor task
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Debounce loop: raw events within the window collapse to the final state
async fn run_monitor(
    tx: watch::Sender<NetworkState>,
    mut events: mpsc::Receiver<NetworkState>,
    debounce: Duration,
) {
    let mut candidate: Option<NetworkState> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(state) => {
                    candidate = Some(state);
                    deadline = Some(Instant::now() + debounce);
                }
                None => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                if let Some(state) = candidate.take() {
                    publish(&tx, state);
                }
            }
        }
    }

    // Probe stream ended; commit whatever was still coalescing
    if let Some(state) = candidate {
        publish(&tx, state);
    }
    tracing::debug!("network monitor stopped");
}

fn publish(tx: &watch::Sender<NetworkState>, state: NetworkState) {
    let changed = tx.send_if_modified(|current| {
        if *current != state {
            *current = state;
            true
        } else {
            false
        }
    });
    if changed {
        tracing::info!(
            online = state.is_online(),
            connection = ?state.connection_type,
            "connectivity changed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConnectionType;

    fn config(debounce_ms: u64) -> MonitorConfig {
        MonitorConfig { debounce_ms }
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_current_snapshot_immediately() {
        let (monitor, _probe) =
            NetworkMonitor::with_manual_probe(NetworkState::offline(), config(300));
        let rx = monitor.subscribe();
        assert_eq!(*rx.borrow(), NetworkState::offline());
        assert!(!monitor.current_state().is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn flapping_collapses_to_final_state() {
        let (monitor, probe) =
            NetworkMonitor::with_manual_probe(NetworkState::offline(), config(300));
        let mut rx = monitor.subscribe();

        // A burst of flaps inside one window
        probe.push(NetworkState::online(ConnectionType::Wifi)).await;
        probe.push(NetworkState::offline()).await;
        probe.push(NetworkState::online(ConnectionType::Cellular)).await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        rx.changed().await.unwrap();
        assert_eq!(
            *rx.borrow_and_update(),
            NetworkState::online(ConnectionType::Cellular)
        );

        // Only the final state was ever published
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_state_is_not_republished() {
        let (monitor, probe) =
            NetworkMonitor::with_manual_probe(NetworkState::offline(), config(100));
        let mut rx = monitor.subscribe();

        probe.push(NetworkState::offline()).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!rx.has_changed().unwrap());

        probe.push(NetworkState::online(ConnectionType::Wifi)).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_events_each_publish() {
        let (monitor, probe) =
            NetworkMonitor::with_manual_probe(NetworkState::offline(), config(50));
        let mut rx = monitor.subscribe();

        probe.push(NetworkState::online(ConnectionType::Wifi)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_online());

        probe.push(NetworkState::offline()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        rx.changed().await.unwrap();
        assert!(!rx.borrow_and_update().is_online());
    }
}
