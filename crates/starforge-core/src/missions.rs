//! Mission state machine and reward issuance.
//!
//! The mission engine owns every status transition
//! (`locked → available → active → completed`) and the completion path's
//! exactly-once reward issuance. Mission state lives inside the player
//! snapshot; the engine mutates it in place and writes the durable audit
//! trail to the mission log. Unlocks are recomputed from the catalog, not
//! causally stored.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::catalog::MissionCatalog;
use crate::error::{ProgressError, ProgressResult};
use crate::remote::RemoteLedger;
use crate::reward::{RewardIssuer, RewardSummary};
use crate::storage::LocalProgressStore;
use crate::types::mission::{MissionId, MissionProgressRecord, MissionRecord, MissionStatus};
use crate::types::{GameEvent, PlayerProgressSnapshot};

/// What happened when a mission completed
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub mission_id: MissionId,
    /// The issued reward; `None` when issuance failed or was already done
    pub summary: Option<RewardSummary>,
    /// Issuance failure message, surfaced but not fatal
    pub reward_error: Option<String>,
}

/// Drives mission transitions against a player snapshot.
pub struct MissionEngine {
    catalog: Arc<MissionCatalog>,
    store: LocalProgressStore,
    issuer: Arc<dyn RewardIssuer>,
    ledger: Arc<dyn RemoteLedger>,
}

impl MissionEngine {
    pub fn new(
        catalog: Arc<MissionCatalog>,
        store: LocalProgressStore,
        issuer: Arc<dyn RewardIssuer>,
        ledger: Arc<dyn RemoteLedger>,
    ) -> Self {
        Self {
            catalog,
            store,
            issuer,
            ledger,
        }
    }

    pub fn catalog(&self) -> &MissionCatalog {
        &self.catalog
    }

    /// Make sure the snapshot carries a record for every catalog entry.
    ///
    /// Fresh snapshots get the full instantiated list; snapshots from an
    /// older catalog get new entries appended. Existing records are left
    /// untouched.
    pub fn ensure_catalog(&self, snapshot: &mut PlayerProgressSnapshot) {
        if snapshot.missions.is_empty() {
            snapshot.missions = self.catalog.instantiate(snapshot.level);
            return;
        }
        let completed = snapshot.completed_missions();
        for entry in self.catalog.entries() {
            if snapshot.mission(&entry.id).is_some() {
                continue;
            }
            let status = if entry.requirements.satisfied(snapshot.level, &completed) {
                MissionStatus::Available
            } else {
                MissionStatus::Locked
            };
            snapshot.missions.push(MissionRecord {
                id: entry.id.clone(),
                title: entry.title.clone(),
                kind: entry.kind,
                status,
                progress: 0,
                max_progress: entry.max_progress,
                reward: entry.reward.clone(),
                requirements: entry.requirements.clone(),
            });
        }
    }

    /// Recompute `locked → available` transitions from the catalog.
    ///
    /// Returns the ids that became available.
    pub fn refresh_unlocks(&self, snapshot: &mut PlayerProgressSnapshot) -> Vec<MissionId> {
        let completed = snapshot.completed_missions();
        let level = snapshot.level;
        let mut unlocked = Vec::new();
        for mission in &mut snapshot.missions {
            if mission.status == MissionStatus::Locked
                && mission.requirements.satisfied(level, &completed)
            {
                mission.status = MissionStatus::Available;
                unlocked.push(mission.id.clone());
            }
        }
        if !unlocked.is_empty() {
            debug!(count = unlocked.len(), "Missions unlocked");
        }
        unlocked
    }

    /// `available → active`. Fails when the target is not available or
    /// another mission is already active.
    pub fn start_mission(
        &self,
        snapshot: &mut PlayerProgressSnapshot,
        mission_id: &MissionId,
    ) -> ProgressResult<()> {
        if self.catalog.entry(mission_id).is_none() {
            return Err(ProgressError::MissionNotFound(mission_id.clone()));
        }
        if let Some(active) = &snapshot.active_mission {
            return Err(ProgressError::MissionAlreadyActive {
                active: active.clone(),
            });
        }
        let player_id = snapshot.player_id.clone();
        let mission = snapshot
            .mission_mut(mission_id)
            .ok_or_else(|| ProgressError::MissionNotFound(mission_id.clone()))?;
        if mission.status != MissionStatus::Available {
            return Err(ProgressError::InvalidTransition {
                id: mission_id.clone(),
                status: mission.status,
                expected: MissionStatus::Available,
            });
        }
        mission.status = MissionStatus::Active;
        snapshot.active_mission = Some(mission_id.clone());

        // Keep the original start time when re-activating after an abandon
        let mut record = self
            .store
            .load_mission_record(&player_id, mission_id)
            .unwrap_or_else(|| MissionProgressRecord::started(player_id.clone(), mission_id.clone()));
        record.last_updated = chrono::Utc::now().timestamp_millis();
        if let Err(e) = self.store.save_mission_record(&record) {
            warn!(mission = %mission_id, error = %e, "Failed to write mission log on start");
        }

        info!(player = %player_id, mission = %mission_id, "Mission started");
        Ok(())
    }

    /// Apply a gameplay event to the active mission.
    ///
    /// The event is mapped through the mission's rule table to a progress
    /// delta and applied as a saturating add. Reaching maximum progress
    /// triggers the completion path synchronously within this call.
    pub fn record_event(
        &self,
        snapshot: &mut PlayerProgressSnapshot,
        event: &GameEvent,
    ) -> ProgressResult<Option<CompletionOutcome>> {
        let Some(active_id) = snapshot.active_mission.clone() else {
            debug!(kind = %event.kind, "No active mission, event ignored");
            return Ok(None);
        };
        let delta = self.catalog.delta_for(&active_id, event);
        if delta == 0 {
            debug!(mission = %active_id, kind = %event.kind, "Event matches no rule, ignored");
            return Ok(None);
        }

        let player_id = snapshot.player_id.clone();
        let mission = snapshot
            .mission_mut(&active_id)
            .ok_or_else(|| ProgressError::MissionNotFound(active_id.clone()))?;
        if mission.status != MissionStatus::Active {
            return Err(ProgressError::InvalidTransition {
                id: active_id.clone(),
                status: mission.status,
                expected: MissionStatus::Active,
            });
        }

        let progress = mission.apply_delta(delta);
        let at_max = mission.at_max();
        debug!(mission = %active_id, progress, delta, "Mission progress");

        if let Some(mut record) = self.store.load_mission_record(&player_id, &active_id) {
            record.progress = progress;
            record.last_updated = chrono::Utc::now().timestamp_millis();
            if let Err(e) = self.store.save_mission_record(&record) {
                warn!(mission = %active_id, error = %e, "Failed to write mission log on progress");
            }
        }

        if at_max {
            return self.complete(snapshot, &active_id).map(Some);
        }
        Ok(None)
    }

    /// Completion path, run synchronously when progress reaches maximum:
    /// status to `completed`, active reference cleared, reward issued
    /// exactly once, and a best-effort remote mirror dispatched.
    fn complete(
        &self,
        snapshot: &mut PlayerProgressSnapshot,
        mission_id: &MissionId,
    ) -> ProgressResult<CompletionOutcome> {
        let player_id = snapshot.player_id.clone();
        let mission = snapshot
            .mission_mut(mission_id)
            .ok_or_else(|| ProgressError::MissionNotFound(mission_id.clone()))?;

        mission.status = MissionStatus::Completed;
        mission.progress = mission.max_progress;
        let reward = mission.reward.clone();
        let mission_snapshot = mission.clone();
        if snapshot.active_mission.as_ref() == Some(mission_id) {
            snapshot.active_mission = None;
        }

        // The mission log's rewarded flag is the exactly-once guard: a
        // re-entrant completion finds it set and stops here.
        let mut record = self
            .store
            .load_mission_record(&player_id, mission_id)
            .unwrap_or_else(|| MissionProgressRecord::started(player_id.clone(), mission_id.clone()));
        if record.completed && record.rewarded {
            debug!(mission = %mission_id, "Completion already recorded, skipping reward");
            return Ok(CompletionOutcome {
                mission_id: mission_id.clone(),
                summary: None,
                reward_error: None,
            });
        }

        let now = chrono::Utc::now().timestamp_millis();
        record.progress = mission_snapshot.max_progress;
        record.completed = true;
        record.completed_at = Some(now);
        record.rewards = Some(reward.clone());
        record.last_updated = now;

        let (summary, reward_error) = match self.issuer.award(&mission_snapshot, &reward) {
            Ok(summary) => {
                record.rewarded = true;
                (Some(summary), None)
            }
            Err(message) => {
                warn!(mission = %mission_id, error = %message, "Reward issuance failed; completion kept");
                (None, Some(message))
            }
        };

        if let Err(e) = self.store.save_mission_record(&record) {
            warn!(mission = %mission_id, error = %e, "Failed to write mission log on completion");
        }

        info!(player = %player_id, mission = %mission_id, "Mission completed");
        self.mirror_progress(&player_id, mission_id, mission_snapshot.max_progress);

        Ok(CompletionOutcome {
            mission_id: mission_id.clone(),
            summary,
            reward_error,
        })
    }

    /// Best-effort, non-blocking remote mirror of mission progress.
    fn mirror_progress(&self, player_id: &crate::types::PlayerId, mission_id: &MissionId, progress: u32) {
        let ledger = self.ledger.clone();
        let player_id = player_id.clone();
        let mission_id = mission_id.clone();
        tokio::spawn(async move {
            if let Err(e) = ledger
                .update_mission_progress(&player_id, &mission_id, progress)
                .await
            {
                warn!(player = %player_id, mission = %mission_id, error = %e, "Mission mirror failed");
            }
        });
    }

    /// `active → available`, keeping accumulated progress.
    pub fn abandon_mission(&self, snapshot: &mut PlayerProgressSnapshot) -> ProgressResult<MissionId> {
        let Some(active_id) = snapshot.active_mission.clone() else {
            return Err(ProgressError::NoActiveMission);
        };
        let mission = snapshot
            .mission_mut(&active_id)
            .ok_or_else(|| ProgressError::MissionNotFound(active_id.clone()))?;
        mission.status = MissionStatus::Available;
        snapshot.active_mission = None;
        info!(mission = %active_id, "Mission abandoned");
        Ok(active_id)
    }

    /// The one sanctioned way progress decreases. Completed missions are
    /// terminal and cannot be reset.
    pub fn reset_mission(
        &self,
        snapshot: &mut PlayerProgressSnapshot,
        mission_id: &MissionId,
    ) -> ProgressResult<()> {
        let player_id = snapshot.player_id.clone();
        let mission = snapshot
            .mission_mut(mission_id)
            .ok_or_else(|| ProgressError::MissionNotFound(mission_id.clone()))?;
        if mission.status == MissionStatus::Completed {
            return Err(ProgressError::MissionCompleted(mission_id.clone()));
        }
        mission.progress = 0;
        if let Some(mut record) = self.store.load_mission_record(&player_id, mission_id) {
            record.progress = 0;
            record.last_updated = chrono::Utc::now().timestamp_millis();
            if let Err(e) = self.store.save_mission_record(&record) {
                warn!(mission = %mission_id, error = %e, "Failed to write mission log on reset");
            }
        }
        info!(mission = %mission_id, "Mission progress reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MissionCatalog;
    use crate::remote::InMemoryLedger;
    use crate::reward::CreditingIssuer;
    use crate::types::mission::MissionRecord;
    use crate::types::{EventKind, PlayerId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingIssuer {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingIssuer {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    impl RewardIssuer for CountingIssuer {
        fn award(
            &self,
            mission: &MissionRecord,
            reward: &crate::types::mission::RewardDescriptor,
        ) -> Result<RewardSummary, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err("issuer offline".to_string())
            } else {
                CreditingIssuer.award(mission, reward)
            }
        }
    }

    fn setup_with_issuer(
        issuer: Arc<dyn RewardIssuer>,
    ) -> (MissionEngine, InMemoryLedger, PlayerProgressSnapshot, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = LocalProgressStore::new(temp.path().join("test.redb")).unwrap();
        let ledger = InMemoryLedger::new();
        let engine = MissionEngine::new(
            Arc::new(MissionCatalog::standard()),
            store,
            issuer,
            Arc::new(ledger.clone()),
        );
        let mut snapshot = PlayerProgressSnapshot::new(PlayerId::from("0xabc"), "Miner");
        engine.ensure_catalog(&mut snapshot);
        (engine, ledger, snapshot, temp)
    }

    fn setup() -> (MissionEngine, InMemoryLedger, PlayerProgressSnapshot, TempDir) {
        setup_with_issuer(Arc::new(CreditingIssuer))
    }

    #[tokio::test]
    async fn test_start_mission_requires_available() {
        let (engine, _ledger, mut snapshot, _temp) = setup();
        let locked = MissionId::from("mine-iron-vein");
        let err = engine.start_mission(&mut snapshot, &locked).unwrap_err();
        assert!(matches!(err, ProgressError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_start_mission_rejects_second_active() {
        let (engine, _ledger, mut snapshot, _temp) = setup();
        engine
            .start_mission(&mut snapshot, &MissionId::from("mine-first-ore"))
            .unwrap();
        let err = engine
            .start_mission(&mut snapshot, &MissionId::from("craft-basic-tools"))
            .unwrap_err();
        assert!(matches!(err, ProgressError::MissionAlreadyActive { .. }));
    }

    #[tokio::test]
    async fn test_unknown_mission_is_error() {
        let (engine, _ledger, mut snapshot, _temp) = setup();
        let err = engine
            .start_mission(&mut snapshot, &MissionId::from("nope"))
            .unwrap_err();
        assert!(matches!(err, ProgressError::MissionNotFound(_)));
    }

    #[tokio::test]
    async fn test_end_to_end_mission_scenario() {
        // maxProgress 10, increments of 4, 4, 4 → 4, 8, 10 clamped;
        // completion exactly on the third increment.
        let issuer = Arc::new(CountingIssuer::new(false));
        let (engine, ledger, mut snapshot, _temp) =
            setup_with_issuer(issuer.clone() as Arc<dyn RewardIssuer>);
        let id = MissionId::from("mine-first-ore");
        engine.start_mission(&mut snapshot, &id).unwrap();

        let event = GameEvent::new(EventKind::Mining, "iron_ore", 4);

        let first = engine.record_event(&mut snapshot, &event).unwrap();
        assert!(first.is_none());
        assert_eq!(snapshot.mission(&id).unwrap().progress, 4);

        let second = engine.record_event(&mut snapshot, &event).unwrap();
        assert!(second.is_none());
        assert_eq!(snapshot.mission(&id).unwrap().progress, 8);

        let third = engine.record_event(&mut snapshot, &event).unwrap();
        let outcome = third.expect("third increment completes the mission");
        assert_eq!(outcome.mission_id, id);
        let summary = outcome.summary.expect("reward issued");
        assert_eq!(summary.experience, 100);

        let mission = snapshot.mission(&id).unwrap();
        assert_eq!(mission.status, MissionStatus::Completed);
        assert_eq!(mission.progress, 10);
        assert!(snapshot.active_mission.is_none());
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);

        // Best-effort mirror reaches the ledger
        tokio::task::yield_now().await;
        let mirrored = ledger.mirrored();
        assert_eq!(mirrored.len(), 1);
        assert_eq!(mirrored[0].1, id);
        assert_eq!(mirrored[0].2, 10);
    }

    #[tokio::test]
    async fn test_completion_is_idempotent() {
        let issuer = Arc::new(CountingIssuer::new(false));
        let (engine, _ledger, mut snapshot, _temp) =
            setup_with_issuer(issuer.clone() as Arc<dyn RewardIssuer>);
        let id = MissionId::from("craft-basic-tools");
        engine.start_mission(&mut snapshot, &id).unwrap();

        // Re-entrant completion: the second pass finds the rewarded flag set
        engine.complete(&mut snapshot, &id).unwrap();
        let second = engine.complete(&mut snapshot, &id).unwrap();
        assert!(second.summary.is_none());
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);

        let completed = snapshot.completed_missions();
        assert_eq!(completed.iter().filter(|m| **m == id).count(), 1);
    }

    #[tokio::test]
    async fn test_reward_failure_keeps_completion() {
        let issuer = Arc::new(CountingIssuer::new(true));
        let (engine, _ledger, mut snapshot, _temp) =
            setup_with_issuer(issuer as Arc<dyn RewardIssuer>);
        let id = MissionId::from("explore-near-sectors");
        engine.start_mission(&mut snapshot, &id).unwrap();

        let event = GameEvent::new(EventKind::Exploration, "sector-1", 3);
        let outcome = engine
            .record_event(&mut snapshot, &event)
            .unwrap()
            .expect("mission completes");
        assert!(outcome.summary.is_none());
        assert_eq!(outcome.reward_error.as_deref(), Some("issuer offline"));
        assert_eq!(
            snapshot.mission(&id).unwrap().status,
            MissionStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_event_without_active_mission_is_ignored() {
        let (engine, _ledger, mut snapshot, _temp) = setup();
        let event = GameEvent::new(EventKind::Mining, "iron_ore", 4);
        let outcome = engine.record_event(&mut snapshot, &event).unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_non_matching_event_leaves_progress() {
        let (engine, _ledger, mut snapshot, _temp) = setup();
        let id = MissionId::from("mine-first-ore");
        engine.start_mission(&mut snapshot, &id).unwrap();
        let event = GameEvent::new(EventKind::Crafting, "plating", 2);
        let outcome = engine.record_event(&mut snapshot, &event).unwrap();
        assert!(outcome.is_none());
        assert_eq!(snapshot.mission(&id).unwrap().progress, 0);
    }

    #[tokio::test]
    async fn test_refresh_unlocks_after_level_and_prereq() {
        let (engine, _ledger, mut snapshot, _temp) = setup();
        let gated = MissionId::from("mine-iron-vein");
        assert_eq!(
            snapshot.mission(&gated).unwrap().status,
            MissionStatus::Locked
        );

        // Complete the prerequisite and raise the level
        let prereq = MissionId::from("mine-first-ore");
        engine.start_mission(&mut snapshot, &prereq).unwrap();
        let event = GameEvent::new(EventKind::Mining, "rock", 10);
        engine.record_event(&mut snapshot, &event).unwrap();
        snapshot.level = 2;

        let unlocked = engine.refresh_unlocks(&mut snapshot);
        assert!(unlocked.contains(&gated));
        assert_eq!(
            snapshot.mission(&gated).unwrap().status,
            MissionStatus::Available
        );
    }

    #[tokio::test]
    async fn test_abandon_keeps_progress() {
        let (engine, _ledger, mut snapshot, _temp) = setup();
        let id = MissionId::from("mine-first-ore");
        engine.start_mission(&mut snapshot, &id).unwrap();
        let event = GameEvent::new(EventKind::Mining, "rock", 4);
        engine.record_event(&mut snapshot, &event).unwrap();

        let abandoned = engine.abandon_mission(&mut snapshot).unwrap();
        assert_eq!(abandoned, id);
        assert!(snapshot.active_mission.is_none());
        let mission = snapshot.mission(&id).unwrap();
        assert_eq!(mission.status, MissionStatus::Available);
        assert_eq!(mission.progress, 4);

        // Can be re-started
        engine.start_mission(&mut snapshot, &id).unwrap();
        assert_eq!(snapshot.mission(&id).unwrap().status, MissionStatus::Active);
    }

    #[tokio::test]
    async fn test_reset_mission_zeroes_progress() {
        let (engine, _ledger, mut snapshot, _temp) = setup();
        let id = MissionId::from("mine-first-ore");
        engine.start_mission(&mut snapshot, &id).unwrap();
        let event = GameEvent::new(EventKind::Mining, "rock", 6);
        engine.record_event(&mut snapshot, &event).unwrap();
        assert_eq!(snapshot.mission(&id).unwrap().progress, 6);

        engine.reset_mission(&mut snapshot, &id).unwrap();
        assert_eq!(snapshot.mission(&id).unwrap().progress, 0);
    }

    #[tokio::test]
    async fn test_reset_completed_mission_rejected() {
        let (engine, _ledger, mut snapshot, _temp) = setup();
        let id = MissionId::from("craft-basic-tools");
        engine.start_mission(&mut snapshot, &id).unwrap();
        engine.complete(&mut snapshot, &id).unwrap();

        let err = engine.reset_mission(&mut snapshot, &id).unwrap_err();
        assert!(matches!(err, ProgressError::MissionCompleted(_)));
    }

    #[tokio::test]
    async fn test_ensure_catalog_appends_new_entries() {
        let (engine, _ledger, mut snapshot, _temp) = setup();
        // Simulate a snapshot persisted before a catalog addition
        snapshot.missions.retain(|m| m.id != MissionId::from("forge-master"));
        let before = snapshot.missions.len();
        engine.ensure_catalog(&mut snapshot);
        assert_eq!(snapshot.missions.len(), before + 1);
    }
}
