//! Outbox for pending remote writes.
//!
//! Every snapshot publish to the remote ledger goes through this queue: a
//! background worker drains due entries and retries failures with
//! exponential backoff. Entries coalesce per identity (the latest snapshot
//! wins), so a burst of local mutations produces one remote write, and a
//! debounced initial publish is just an entry with a delayed due time.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::remote::RemoteLedger;
use crate::sync::events::ProgressEvent;
use crate::types::{PlayerId, PlayerProgressSnapshot};

/// Retry tuning for the outbox worker
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// First retry delay; doubles per attempt
    pub base_delay: Duration,
    /// Backoff ceiling
    pub max_delay: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

/// One queued remote write
struct PendingPublish {
    player_id: PlayerId,
    snapshot: PlayerProgressSnapshot,
    attempts: u32,
    not_before: Instant,
}

/// Queue of pending remote snapshot publishes with a retrying worker.
pub struct Outbox {
    queue: Arc<Mutex<Vec<PendingPublish>>>,
    notify: Arc<Notify>,
    worker: JoinHandle<()>,
}

impl Outbox {
    /// Create the outbox and spawn its worker task.
    pub fn new(
        ledger: Arc<dyn RemoteLedger>,
        event_tx: broadcast::Sender<ProgressEvent>,
        config: OutboxConfig,
    ) -> Self {
        let queue: Arc<Mutex<Vec<PendingPublish>>> = Arc::new(Mutex::new(Vec::new()));
        let notify = Arc::new(Notify::new());
        let worker = tokio::spawn(run_worker(
            queue.clone(),
            notify.clone(),
            ledger,
            event_tx,
            config,
        ));
        Self {
            queue,
            notify,
            worker,
        }
    }

    /// Queue a snapshot for immediate publish.
    pub fn enqueue(&self, player_id: PlayerId, snapshot: PlayerProgressSnapshot) {
        self.enqueue_after(player_id, snapshot, Duration::ZERO);
    }

    /// Queue a snapshot to publish after a delay (debounced publish).
    ///
    /// If an entry for the identity is already pending it is replaced with
    /// the newer snapshot, keeping the earlier of the two due times and
    /// resetting the retry counter.
    pub fn enqueue_after(
        &self,
        player_id: PlayerId,
        snapshot: PlayerProgressSnapshot,
        delay: Duration,
    ) {
        let not_before = Instant::now() + delay;
        {
            let mut queue = self.queue.lock();
            if let Some(existing) = queue.iter_mut().find(|p| p.player_id == player_id) {
                existing.snapshot = snapshot;
                existing.not_before = existing.not_before.min(not_before);
                existing.attempts = 0;
            } else {
                queue.push(PendingPublish {
                    player_id,
                    snapshot,
                    attempts: 0,
                    not_before,
                });
            }
        }
        self.notify.notify_one();
    }

    /// Number of writes waiting to be confirmed
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Stop the worker. Pending entries are dropped.
    pub fn shutdown(&self) {
        self.worker.abort();
    }
}

impl Drop for Outbox {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

fn backoff_delay(config: &OutboxConfig, attempts: u32) -> Duration {
    // attempts is >= 1 here; shift capped to keep the multiply in range
    let factor = 1u32 << (attempts - 1).min(10);
    let delay = config.base_delay.saturating_mul(factor).min(config.max_delay);
    let jitter = rand::rng().random_range(0..250);
    delay + Duration::from_millis(jitter)
}

async fn run_worker(
    queue: Arc<Mutex<Vec<PendingPublish>>>,
    notify: Arc<Notify>,
    ledger: Arc<dyn RemoteLedger>,
    event_tx: broadcast::Sender<ProgressEvent>,
    config: OutboxConfig,
) {
    loop {
        let next_due = queue.lock().iter().map(|p| p.not_before).min();

        match next_due {
            None => notify.notified().await,
            Some(due) => {
                if due > Instant::now() {
                    // Wake early if a new entry arrives with an earlier due time
                    tokio::select! {
                        _ = notify.notified() => continue,
                        _ = tokio::time::sleep_until(due) => {}
                    }
                }

                let item = {
                    let mut q = queue.lock();
                    let now = Instant::now();
                    q.iter()
                        .position(|p| p.not_before <= now)
                        .map(|i| q.remove(i))
                };
                let Some(mut item) = item else { continue };

                let result = ledger
                    .save_complete_progress(&item.player_id, &item.snapshot)
                    .await;
                match &result {
                    Ok(true) => {
                        info!(player = %item.player_id, "Published snapshot to remote ledger");
                        let _ = event_tx.send(ProgressEvent::RemotePublished {
                            player_id: item.player_id.clone(),
                        });
                    }
                    Ok(false) | Err(_) => {
                        let message = match &result {
                            Err(e) => e.to_string(),
                            _ => "remote ledger declined the write".to_string(),
                        };
                        let player_id = item.player_id.clone();
                        item.attempts += 1;
                        let delay = backoff_delay(&config, item.attempts);
                        warn!(
                            player = %item.player_id,
                            attempts = item.attempts,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %message,
                            "Remote publish failed, scheduling retry"
                        );
                        item.not_before = Instant::now() + delay;
                        {
                            let mut q = queue.lock();
                            // A newer snapshot may have been enqueued meanwhile; it wins
                            if q.iter().any(|p| p.player_id == item.player_id) {
                                debug!(player = %item.player_id, "Dropping superseded publish");
                            } else {
                                q.push(item);
                            }
                        }
                        let _ = event_tx.send(ProgressEvent::SyncFailed { player_id, message });
                    }
                }
            }
        }
    }
}
