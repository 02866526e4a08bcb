//! Reconciliation between the local store and the remote ledger.
//!
//! The coordinator is the only component that talks to the remote ledger
//! for full snapshots. Every remote failure is caught here and converted
//! into a `success: false` outcome — nothing propagates as an error, and
//! the local snapshot stays authoritative until the next successful
//! reconciliation. A per-identity single-flight guard drops (never queues)
//! triggers that arrive while a reconciliation is in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::remote::RemoteLedger;
use crate::storage::LocalProgressStore;
use crate::sync::events::{ProgressEvent, SyncStatus};
use crate::sync::merge::{merge_snapshots, ConflictRecord};
use crate::sync::outbox::{Outbox, OutboxConfig};
use crate::types::{PlayerId, PlayerProgressSnapshot};

/// Result of one reconciliation attempt
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub success: bool,
    /// The snapshot adopted as the new local state, when successful
    pub merged: Option<PlayerProgressSnapshot>,
    pub conflicts: Vec<ConflictRecord>,
}

impl SyncOutcome {
    fn failure() -> Self {
        Self {
            success: false,
            merged: None,
            conflicts: Vec::new(),
        }
    }
}

/// Per-identity coordinator state
#[derive(Default)]
struct SyncState {
    syncing: bool,
    remote_seen: bool,
    /// `last_updated` of the snapshot agreed at the last successful sync
    last_sync_time: Option<i64>,
}

/// Reconciles local snapshots against the remote ledger.
pub struct SyncCoordinator {
    store: LocalProgressStore,
    ledger: Arc<dyn RemoteLedger>,
    outbox: Outbox,
    states: Mutex<HashMap<PlayerId, SyncState>>,
    event_tx: broadcast::Sender<ProgressEvent>,
}

impl SyncCoordinator {
    pub fn new(
        store: LocalProgressStore,
        ledger: Arc<dyn RemoteLedger>,
        event_tx: broadcast::Sender<ProgressEvent>,
        outbox_config: OutboxConfig,
    ) -> Self {
        let outbox = Outbox::new(ledger.clone(), event_tx.clone(), outbox_config);
        Self {
            store,
            ledger,
            outbox,
            states: Mutex::new(HashMap::new()),
            event_tx,
        }
    }

    /// Fetch the remote snapshot. Read-only; transport failures are logged
    /// and reported as absent, leaving the local snapshot authoritative.
    pub async fn load_remote(&self, player_id: &PlayerId) -> Option<PlayerProgressSnapshot> {
        match self.ledger.load_complete_progress(player_id).await {
            Ok(Some(snapshot)) => {
                self.with_state(player_id, |s| s.remote_seen = true);
                Some(snapshot)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(player = %player_id, error = %e, "Remote load failed, treating as absent");
                None
            }
        }
    }

    /// Write-through a snapshot to the remote ledger, bypassing the outbox.
    /// Returns whether the ledger confirmed the write.
    pub async fn save_remote(
        &self,
        player_id: &PlayerId,
        snapshot: &PlayerProgressSnapshot,
    ) -> bool {
        match self.ledger.save_complete_progress(player_id, snapshot).await {
            Ok(confirmed) => {
                if confirmed {
                    self.with_state(player_id, |s| s.remote_seen = true);
                }
                confirmed
            }
            Err(e) => {
                warn!(player = %player_id, error = %e, "Remote save failed");
                false
            }
        }
    }

    /// Reconcile the given local snapshot against the remote ledger.
    ///
    /// On success the merged snapshot has been saved locally and queued for
    /// remote publish; the caller should adopt `merged` as its in-memory
    /// state. A trigger arriving while another reconciliation is in flight
    /// for the same identity is dropped.
    pub async fn reconcile(
        &self,
        player_id: &PlayerId,
        local: &PlayerProgressSnapshot,
    ) -> SyncOutcome {
        if !self.begin_sync(player_id) {
            debug!(player = %player_id, "Reconciliation already in flight, dropping trigger");
            return SyncOutcome::failure();
        }
        let outcome = self.reconcile_inner(player_id, local).await;
        self.end_sync(player_id);
        outcome
    }

    async fn reconcile_inner(
        &self,
        player_id: &PlayerId,
        local: &PlayerProgressSnapshot,
    ) -> SyncOutcome {
        let remote = match self.ledger.load_complete_progress(player_id).await {
            Ok(remote) => {
                if remote.is_some() {
                    self.with_state(player_id, |s| s.remote_seen = true);
                }
                remote
            }
            Err(e) => {
                warn!(player = %player_id, error = %e, "Reconciliation failed at remote load");
                let _ = self.event_tx.send(ProgressEvent::SyncFailed {
                    player_id: player_id.clone(),
                    message: e.to_string(),
                });
                return SyncOutcome::failure();
            }
        };

        let (merged, conflicts) = match remote {
            Some(remote_snapshot) => {
                let outcome = merge_snapshots(local, &remote_snapshot);
                (outcome.merged, outcome.conflicts)
            }
            None => (local.clone(), Vec::new()),
        };

        if let Err(e) = self.store.save_snapshot(&merged) {
            warn!(player = %player_id, error = %e, "Failed to persist merged snapshot");
            let _ = self.event_tx.send(ProgressEvent::SyncFailed {
                player_id: player_id.clone(),
                message: e.to_string(),
            });
            return SyncOutcome::failure();
        }

        // Asynchronous remote persist of the merged snapshot
        self.outbox.enqueue(player_id.clone(), merged.clone());
        self.with_state(player_id, |s| {
            s.last_sync_time = Some(merged.last_updated);
        });

        info!(
            player = %player_id,
            conflicts = conflicts.len(),
            "Reconciliation complete"
        );
        let _ = self.event_tx.send(ProgressEvent::SnapshotReconciled {
            player_id: player_id.clone(),
            conflicts: conflicts.clone(),
        });

        SyncOutcome {
            success: true,
            merged: Some(merged),
            conflicts,
        }
    }

    /// Queue a snapshot for publish after a debounce delay.
    pub fn schedule_publish(
        &self,
        player_id: &PlayerId,
        snapshot: PlayerProgressSnapshot,
        delay: Duration,
    ) {
        debug!(player = %player_id, delay_ms = delay.as_millis() as u64, "Scheduling remote publish");
        self.outbox.enqueue_after(player_id.clone(), snapshot, delay);
    }

    /// Derived sync status for an identity. Computed on demand, never stored.
    pub fn status(&self, player_id: &PlayerId) -> SyncStatus {
        let local = self.store.load_snapshot(player_id);
        let (remote_seen, last_sync_time) = {
            let states = self.states.lock();
            states
                .get(player_id)
                .map(|s| (s.remote_seen, s.last_sync_time))
                .unwrap_or((false, None))
        };
        let needs_sync = match (&local, last_sync_time) {
            (Some(snapshot), Some(synced)) => snapshot.last_updated > synced,
            (Some(_), None) => true,
            (None, _) => false,
        };
        SyncStatus {
            has_local: local.is_some(),
            has_remote: remote_seen,
            last_sync_time,
            needs_sync,
        }
    }

    /// Whether local changes exist that the remote has not seen
    pub fn needs_sync(&self, player_id: &PlayerId) -> bool {
        self.status(player_id).needs_sync
    }

    /// Pending outbox writes (test/diagnostic hook)
    pub fn pending_publishes(&self) -> usize {
        self.outbox.pending()
    }

    /// Stop the outbox worker. Pending writes are dropped.
    pub fn shutdown(&self) {
        self.outbox.shutdown();
    }

    fn begin_sync(&self, player_id: &PlayerId) -> bool {
        let mut states = self.states.lock();
        let state = states.entry(player_id.clone()).or_default();
        if state.syncing {
            false
        } else {
            state.syncing = true;
            true
        }
    }

    fn end_sync(&self, player_id: &PlayerId) {
        self.with_state(player_id, |s| s.syncing = false);
    }

    fn with_state(&self, player_id: &PlayerId, f: impl FnOnce(&mut SyncState)) {
        let mut states = self.states.lock();
        f(states.entry(player_id.clone()).or_default())
    }
}
