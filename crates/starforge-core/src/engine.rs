//! Main ProgressEngine - the primary entry point for Starforge progress.
//!
//! ProgressEngine coordinates the local store, the mission engine, the
//! item effect engine, and the sync coordinator for:
//! - Local-first persistence of player progress snapshots
//! - The mission state machine and reward application
//! - Tiered item effects with restart-safe timers
//! - Reconciliation against the remote ledger
//!
//! # Example
//!
//! ```ignore
//! use starforge_core::{ProgressEngine, InMemoryLedger, CreditingIssuer};
//! use std::sync::Arc;
//!
//! let engine = ProgressEngine::new(
//!     "~/.starforge/data",
//!     Arc::new(InMemoryLedger::new()),
//!     Arc::new(CreditingIssuer),
//! )?;
//!
//! // Connect an identity (runs the remote → local → default cascade)
//! let snapshot = engine.connect(&"0xabc".into(), "Miner").await?;
//!
//! // Gameplay events drive mission progress
//! engine.start_mission(&"mine-first-ore".into())?;
//! engine.record_event(&GameEvent::new(EventKind::Mining, "iron_ore", 4))?;
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::MissionCatalog;
use crate::effects::ItemEffectEngine;
use crate::error::{ProgressError, ProgressResult};
use crate::missions::MissionEngine;
use crate::remote::RemoteLedger;
use crate::reward::{RewardIssuer, RewardSummary};
use crate::storage::LocalProgressStore;
use crate::sync::{OutboxConfig, ProgressEvent, SyncCoordinator, SyncOutcome, SyncStatus};
use crate::types::effect::{EffectCategory, ItemEffect};
use crate::types::mission::{MissionId, MissionRecord};
use crate::types::{level_for_experience, GameEvent, PlayerId, PlayerProgressSnapshot};

/// Default capacity for the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Timing knobs for the engine. Defaults follow production behavior; tests
/// compress them.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Period of the automatic reconciliation tick
    pub sync_interval: Duration,
    /// Debounce before publishing a locally-cached snapshot found on connect
    pub local_publish_debounce: Duration,
    /// Debounce before publishing a freshly created default snapshot.
    /// Longer than the local debounce to avoid redundant writes on rapid
    /// reconnect.
    pub default_publish_debounce: Duration,
    pub outbox: OutboxConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(300),
            local_publish_debounce: Duration::from_secs(2),
            default_publish_debounce: Duration::from_secs(3),
            outbox: OutboxConfig::default(),
        }
    }
}

/// In-memory state for the connected identity
struct Session {
    snapshot: PlayerProgressSnapshot,
}

/// Main entry point for the Starforge progress engine.
///
/// One explicitly constructed instance per process; all state is owned by
/// the instance and torn down by `disconnect`, never left in module-level
/// globals.
pub struct ProgressEngine {
    store: LocalProgressStore,
    missions: MissionEngine,
    effects: ItemEffectEngine,
    coordinator: Arc<SyncCoordinator>,
    session: Arc<Mutex<Option<Session>>>,
    event_tx: broadcast::Sender<ProgressEvent>,
    auto_sync: Mutex<Option<JoinHandle<()>>>,
    config: EngineConfig,
}

impl ProgressEngine {
    /// Create an engine with the standard catalog and default timing.
    pub fn new(
        data_dir: impl AsRef<Path>,
        ledger: Arc<dyn RemoteLedger>,
        issuer: Arc<dyn RewardIssuer>,
    ) -> ProgressResult<Self> {
        Self::with_config(
            data_dir,
            ledger,
            issuer,
            MissionCatalog::standard(),
            EngineConfig::default(),
        )
    }

    /// Create an engine with an explicit catalog and timing configuration.
    pub fn with_config(
        data_dir: impl AsRef<Path>,
        ledger: Arc<dyn RemoteLedger>,
        issuer: Arc<dyn RewardIssuer>,
        catalog: MissionCatalog,
        config: EngineConfig,
    ) -> ProgressResult<Self> {
        let store = LocalProgressStore::new(data_dir.as_ref().join("progress.redb"))?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let catalog = Arc::new(catalog);
        let coordinator = Arc::new(SyncCoordinator::new(
            store.clone(),
            ledger.clone(),
            event_tx.clone(),
            config.outbox.clone(),
        ));
        let missions = MissionEngine::new(catalog, store.clone(), issuer, ledger);
        let effects = ItemEffectEngine::new(store.clone(), event_tx.clone());
        Ok(Self {
            store,
            missions,
            effects,
            coordinator,
            session: Arc::new(Mutex::new(None)),
            event_tx,
            auto_sync: Mutex::new(None),
            config,
        })
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.event_tx.subscribe()
    }

    /// Connect an identity and adopt its progress.
    ///
    /// Cascade, executed once per connect:
    /// 1. Remote snapshot, when the ledger has one — adopted as baseline.
    /// 2. Otherwise the locally cached snapshot, republished after a short
    ///    debounce.
    /// 3. Otherwise a fresh default snapshot (level 1, starting credits),
    ///    published after a longer debounce.
    ///
    /// Also rehydrates persisted item effects and starts the periodic
    /// auto-sync task.
    pub async fn connect(
        &self,
        player_id: &PlayerId,
        name: &str,
    ) -> ProgressResult<PlayerProgressSnapshot> {
        // A previous session (same or different identity) is torn down first
        self.disconnect()?;

        let mut snapshot = match self.coordinator.load_remote(player_id).await {
            Some(remote) => {
                info!(player = %player_id, "Adopting remote snapshot as baseline");
                remote
            }
            None => match self.store.load_snapshot(player_id) {
                Some(local) => {
                    info!(player = %player_id, "No remote snapshot, adopting local cache");
                    self.coordinator.schedule_publish(
                        player_id,
                        local.clone(),
                        self.config.local_publish_debounce,
                    );
                    local
                }
                None => {
                    info!(player = %player_id, "No snapshot anywhere, creating default");
                    let fresh = PlayerProgressSnapshot::new(player_id.clone(), name);
                    self.coordinator.schedule_publish(
                        player_id,
                        fresh.clone(),
                        self.config.default_publish_debounce,
                    );
                    fresh
                }
            },
        };

        self.missions.ensure_catalog(&mut snapshot);
        self.missions.refresh_unlocks(&mut snapshot);
        self.store.save_snapshot(&snapshot)?;

        self.effects.rehydrate(player_id);
        *self.session.lock() = Some(Session {
            snapshot: snapshot.clone(),
        });
        self.start_auto_sync(player_id.clone());

        Ok(snapshot)
    }

    /// Persist and tear down the current session. Safe to call when no
    /// session is connected.
    pub fn disconnect(&self) -> ProgressResult<()> {
        if let Some(task) = self.auto_sync.lock().take() {
            task.abort();
        }
        let previous = self.session.lock().take();
        if let Some(session) = previous {
            self.store.save_snapshot(&session.snapshot)?;
            info!(player = %session.snapshot.player_id, "Session disconnected");
        }
        self.effects.reset();
        Ok(())
    }

    /// The connected snapshot, cloned.
    pub fn snapshot(&self) -> ProgressResult<PlayerProgressSnapshot> {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.snapshot.clone())
            .ok_or(ProgressError::NotConnected)
    }

    /// Apply a gameplay event to the active mission.
    ///
    /// The whole read-modify-write runs under the session lock against the
    /// latest in-memory state, so two events in the same tick serialize
    /// instead of losing an update. A completion credits its reward into
    /// the snapshot (experience, credits, resources, derived level) and
    /// recomputes unlocks before the snapshot is persisted.
    pub fn record_event(&self, event: &GameEvent) -> ProgressResult<Option<RewardSummary>> {
        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or(ProgressError::NotConnected)?;

        let completion = self.missions.record_event(&mut session.snapshot, event)?;
        let stat_key = match event.kind {
            crate::types::EventKind::Mining => "ore_mined",
            crate::types::EventKind::Crafting => "items_crafted",
            crate::types::EventKind::Exploration => "sectors_explored",
        };
        session.snapshot.add_stat(stat_key, event.quantity as u64);

        let mut issued = None;
        if let Some(outcome) = completion {
            let player_id = session.snapshot.player_id.clone();
            if let Some(summary) = outcome.summary {
                apply_reward(&mut session.snapshot, &summary);
                self.missions.refresh_unlocks(&mut session.snapshot);
                issued = Some(summary);
            }
            let _ = self.event_tx.send(ProgressEvent::MissionCompleted {
                player_id: player_id.clone(),
                mission_id: outcome.mission_id.clone(),
            });
            if let Some(message) = outcome.reward_error {
                let _ = self.event_tx.send(ProgressEvent::RewardFailed {
                    player_id,
                    mission_id: outcome.mission_id,
                    message,
                });
            }
        }

        session.snapshot.touch();
        self.store.save_snapshot(&session.snapshot)?;
        Ok(issued)
    }

    /// Start a mission (`available → active`).
    pub fn start_mission(&self, mission_id: &MissionId) -> ProgressResult<()> {
        self.with_session(|missions, snapshot| missions.start_mission(snapshot, mission_id))
    }

    /// Abandon the active mission, keeping its progress.
    pub fn abandon_mission(&self) -> ProgressResult<MissionId> {
        self.with_session(|missions, snapshot| missions.abandon_mission(snapshot))
    }

    /// Reset a mission's progress to zero.
    pub fn reset_mission(&self, mission_id: &MissionId) -> ProgressResult<()> {
        self.with_session(|missions, snapshot| missions.reset_mission(snapshot, mission_id))
    }

    /// The connected player's mission list.
    pub fn missions(&self) -> ProgressResult<Vec<MissionRecord>> {
        Ok(self.snapshot()?.missions)
    }

    /// Consume items to (re)activate a tiered effect.
    pub fn use_items(
        &self,
        category: EffectCategory,
        quantity: u32,
        per_unit_duration: Duration,
        description: impl Into<String>,
    ) -> ProgressResult<ItemEffect> {
        self.effects
            .use_items(category, quantity, per_unit_duration, description)
    }

    /// Current multipliers per category, for gameplay calculators.
    pub fn active_multipliers(&self) -> std::collections::HashMap<EffectCategory, f64> {
        self.effects.active_multipliers()
    }

    /// Currently live effects.
    pub fn active_effects(&self) -> Vec<ItemEffect> {
        self.effects.active_effects()
    }

    /// Remove a category's effect before it expires.
    pub fn remove_effect(&self, category: EffectCategory) -> ProgressResult<bool> {
        self.effects.remove_effect(category)
    }

    /// Lifetime items consumed, driving the multiplier tier.
    pub fn lifetime_items_used(&self) -> u64 {
        self.effects.lifetime_items_used()
    }

    /// Reconcile now, on demand.
    ///
    /// The merged result is folded back into the live session with a second
    /// field-aware merge, so gameplay mutations that landed while the
    /// remote round-trip was in flight are not lost.
    pub async fn force_sync(&self) -> ProgressResult<SyncOutcome> {
        let local = self.snapshot()?;
        let player_id = local.player_id.clone();
        let outcome = self.coordinator.reconcile(&player_id, &local).await;

        if let Some(merged) = &outcome.merged {
            let mut guard = self.session.lock();
            if let Some(session) = guard.as_mut() {
                if session.snapshot.player_id == player_id {
                    let folded =
                        crate::sync::merge_snapshots(&session.snapshot, merged).merged;
                    session.snapshot = folded;
                }
            }
        }
        Ok(outcome)
    }

    /// Write the current snapshot straight through to the remote ledger,
    /// bypassing the outbox. For interactive callers that exit before an
    /// outbox worker could drain.
    pub async fn push_remote(&self) -> ProgressResult<bool> {
        let snapshot = self.snapshot()?;
        Ok(self
            .coordinator
            .save_remote(&snapshot.player_id, &snapshot)
            .await)
    }

    /// Derived sync status for the connected identity.
    pub fn sync_status(&self) -> ProgressResult<SyncStatus> {
        let snapshot = self.snapshot()?;
        Ok(self.coordinator.status(&snapshot.player_id))
    }

    /// Drop every locally cached row for an identity.
    pub fn clear_local(&self, player_id: &PlayerId) -> ProgressResult<()> {
        self.store.clear(player_id)
    }

    /// Direct store access for read-only inspection.
    pub fn store(&self) -> &LocalProgressStore {
        &self.store
    }

    fn with_session<T>(
        &self,
        f: impl FnOnce(&MissionEngine, &mut PlayerProgressSnapshot) -> ProgressResult<T>,
    ) -> ProgressResult<T> {
        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or(ProgressError::NotConnected)?;
        let result = f(&self.missions, &mut session.snapshot)?;
        session.snapshot.touch();
        self.store.save_snapshot(&session.snapshot)?;
        Ok(result)
    }

    /// Spawn the periodic reconciliation task for the connected identity.
    ///
    /// Runs until the session disconnects. Each tick checks `needs_sync`
    /// and triggers a reconcile when local changes are unpublished; the
    /// coordinator's single-flight guard drops overlapping triggers.
    fn start_auto_sync(&self, player_id: PlayerId) {
        let coordinator = self.coordinator.clone();
        let session = self.session.clone();
        let interval_period = self.config.sync_interval;

        let task_player_id = player_id.clone();
        let task = tokio::spawn(async move {
            let player_id = task_player_id;
            let mut interval = tokio::time::interval(interval_period);
            // Skip the immediate first tick; connect just reconciled
            interval.tick().await;
            loop {
                interval.tick().await;
                if !coordinator.needs_sync(&player_id) {
                    continue;
                }
                let local = {
                    let guard = session.lock();
                    match guard.as_ref() {
                        Some(s) if s.snapshot.player_id == player_id => Some(s.snapshot.clone()),
                        _ => None,
                    }
                };
                let Some(local) = local else {
                    debug!(player = %player_id, "Session gone, stopping auto-sync");
                    break;
                };
                let outcome = coordinator.reconcile(&player_id, &local).await;
                if let Some(merged) = outcome.merged {
                    let mut guard = session.lock();
                    if let Some(s) = guard.as_mut() {
                        if s.snapshot.player_id == player_id {
                            s.snapshot =
                                crate::sync::merge_snapshots(&s.snapshot, &merged).merged;
                        }
                    }
                } else if !outcome.success {
                    warn!(player = %player_id, "Periodic reconciliation failed, will retry next tick");
                }
            }
        });

        if let Some(previous) = self.auto_sync.lock().replace(task) {
            previous.abort();
        }
        info!(player = %player_id, "Auto-sync task started");
    }
}

impl Drop for ProgressEngine {
    fn drop(&mut self) {
        if let Some(task) = self.auto_sync.lock().take() {
            task.abort();
        }
        self.coordinator.shutdown();
    }
}

/// Credit an issued reward into the snapshot. Level is derived from total
/// experience and clamped so it never decreases.
fn apply_reward(snapshot: &mut PlayerProgressSnapshot, summary: &RewardSummary) {
    snapshot.experience += summary.experience;
    snapshot.credits += summary.credits;
    for grant in &summary.resources {
        snapshot.add_item(&grant.item, grant.quantity);
    }
    snapshot.level = snapshot.level.max(level_for_experience(snapshot.experience));
}
