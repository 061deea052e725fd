//! Connectivity tracking and reconnect-triggered sync.
//!
//! The monitor does not poll the network. The host forwards the platform's
//! online/offline notifications into [`NetworkMonitor::set_online`] and the
//! rest of the core reads the last known value.

use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::sync::SyncEngine;

/// Last reported connectivity plus the number of offline→online
/// transitions seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connectivity {
    pub online: bool,
    pub reconnects: u64,
}

/// Cloneable handle over the shared connectivity flag.
#[derive(Clone)]
pub struct NetworkMonitor {
    state: Arc<watch::Sender<Connectivity>>,
}

impl NetworkMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (sender, _receiver) = watch::channel(Connectivity {
            online: initially_online,
            reconnects: 0,
        });
        Self {
            state: Arc::new(sender),
        }
    }

    pub fn is_online(&self) -> bool {
        self.state.borrow().online
    }

    /// Records a platform connectivity event. Repeated identical events are
    /// ignored so subscribers only see real transitions.
    pub fn set_online(&self, online: bool) {
        let changed = self.state.send_if_modified(|current| {
            if current.online == online {
                return false;
            }
            current.online = online;
            if online {
                current.reconnects += 1;
            }
            true
        });

        if changed {
            if online {
                info!("Network: online");
            } else {
                warn!("Network: offline");
            }
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.state.subscribe()
    }

    /// Runs Sync-Up then Sync-Down for `rep_id` after every offline→online
    /// transition reported from now on, until the returned handle is stopped
    /// or dropped.
    ///
    /// Transitions are counted rather than inferred from the current flag, so
    /// a drop and reconnect that happen before the listener wakes still
    /// trigger a sync. Reconnects that arrive while a sync is running are
    /// folded into one follow-up sync.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_auto_sync(&self, engine: Arc<SyncEngine>, rep_id: impl Into<String>) -> AutoSyncHandle {
        let rep_id = rep_id.into();
        let mut receiver = self.subscribe();
        let mut handled = receiver.borrow_and_update().reconnects;
        info!("Auto-sync enabled for rep {rep_id}");

        let task = tokio::spawn(async move {
            while receiver.changed().await.is_ok() {
                let reconnects = receiver.borrow_and_update().reconnects;
                if reconnects == handled {
                    continue;
                }
                handled = reconnects;

                info!("Connection restored, draining queue before refreshing cache");
                match engine.sync_all(&rep_id).await {
                    Ok(summary) => info!(
                        "Auto-sync finished: {} mutations pushed, {} rows pulled",
                        summary.pushed,
                        summary.pulled.total_rows()
                    ),
                    Err(e) => error!("Auto-sync failed, will retry on next sync: {e}"),
                }
            }
        });

        AutoSyncHandle { task }
    }
}

/// Owns the reconnect listener. Dropping it also stops the listener.
pub struct AutoSyncHandle {
    task: JoinHandle<()>,
}

impl AutoSyncHandle {
    pub fn stop(self) {
        self.task.abort();
        info!("Auto-sync stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for AutoSyncHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_events_are_not_transitions() {
        let monitor = NetworkMonitor::new(true);
        let mut receiver = monitor.subscribe();
        receiver.borrow_and_update();

        monitor.set_online(true);
        assert!(!receiver.has_changed().unwrap());

        monitor.set_online(false);
        assert!(receiver.has_changed().unwrap());
        assert!(!monitor.is_online());
    }

    #[test]
    fn only_offline_to_online_counts_as_reconnect() {
        let monitor = NetworkMonitor::new(true);
        let receiver = monitor.subscribe();

        monitor.set_online(true);
        monitor.set_online(false);
        assert_eq!(receiver.borrow().reconnects, 0);

        monitor.set_online(true);
        monitor.set_online(false);
        monitor.set_online(true);
        assert_eq!(
            *receiver.borrow(),
            Connectivity {
                online: true,
                reconnects: 2
            }
        );
    }

    #[test]
    fn clones_share_state() {
        let monitor = NetworkMonitor::new(false);
        let clone = monitor.clone();
        clone.set_online(true);
        assert!(monitor.is_online());
    }
}
