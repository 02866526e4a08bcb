//! Tiered, self-expiring item effects.
//!
//! Consuming items grants a time-bounded multiplicative bonus whose size
//! is determined by a lifetime usage counter, not by the size of a single
//! use. Effects are rows with absolute expiry timestamps persisted through
//! the local store; scheduled expiry tasks are rebuilt from those
//! timestamps after a restart, and reads always re-derive activity from
//! the timestamps so a missed callback can never leave a stale bonus
//! active.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ProgressError, ProgressResult};
use crate::storage::LocalProgressStore;
use crate::sync::events::ProgressEvent;
use crate::types::effect::{multiplier_for_usage, EffectCategory, EffectId, ItemEffect};
use crate::types::PlayerId;

#[derive(Default)]
struct EffectState {
    player: Option<PlayerId>,
    /// At most one effect per category
    active: HashMap<EffectCategory, ItemEffect>,
    /// Global lifetime counter across all categories
    lifetime_used: u64,
    /// Expiry tasks, aborted on replacement, manual removal, or reset
    tasks: HashMap<EffectId, JoinHandle<()>>,
}

/// Tracks active item effects and their expiry lifecycle for one session.
pub struct ItemEffectEngine {
    store: LocalProgressStore,
    state: Arc<Mutex<EffectState>>,
    event_tx: broadcast::Sender<ProgressEvent>,
}

impl ItemEffectEngine {
    pub fn new(store: LocalProgressStore, event_tx: broadcast::Sender<ProgressEvent>) -> Self {
        Self {
            store,
            state: Arc::new(Mutex::new(EffectState::default())),
            event_tx,
        }
    }

    /// Load persisted effects for a player and rebuild their timers.
    ///
    /// Expired effects are discarded immediately; survivors get a fresh
    /// expiry task for their *remaining* time, never the full original
    /// duration, so nothing becomes permanent and nothing double-expires.
    pub fn rehydrate(&self, player_id: &PlayerId) {
        self.reset();

        let persisted = self.store.load_effects(player_id);
        let lifetime_used = self.store.load_item_usage(player_id);
        let now = chrono::Utc::now().timestamp_millis();

        let (alive, expired): (Vec<ItemEffect>, Vec<ItemEffect>) = persisted
            .into_iter()
            .partition(|effect| effect.is_active_at(now));
        if !expired.is_empty() {
            debug!(
                player = %player_id,
                discarded = expired.len(),
                "Discarded expired effects during rehydration"
            );
        }

        {
            let mut state = self.state.lock();
            state.player = Some(player_id.clone());
            state.lifetime_used = lifetime_used;
            for effect in &alive {
                let remaining = effect.remaining_ms(now);
                let handle = self.spawn_expiry(player_id.clone(), effect.clone(), remaining);
                state.tasks.insert(effect.id, handle);
                state.active.insert(effect.category, effect.clone());
            }
        }

        if let Err(e) = self.store.save_effects(player_id, &alive) {
            warn!(player = %player_id, error = %e, "Failed to persist effect list after rehydration");
        }
        info!(player = %player_id, active = alive.len(), "Effects rehydrated");
    }

    /// Consume items to (re)activate an effect.
    ///
    /// Bumps the lifetime counter, derives the tiered multiplier from it,
    /// and replaces any active effect of the same category — effects never
    /// stack within a category.
    pub fn use_items(
        &self,
        category: EffectCategory,
        quantity: u32,
        per_unit_duration: Duration,
        description: impl Into<String>,
    ) -> ProgressResult<ItemEffect> {
        if quantity == 0 {
            return Err(ProgressError::InvalidQuantity(quantity));
        }

        let (player_id, effect, effects_to_save) = {
            let mut state = self.state.lock();
            let player_id = state.player.clone().ok_or(ProgressError::NotConnected)?;

            state.lifetime_used += quantity as u64;
            let multiplier = multiplier_for_usage(state.lifetime_used);

            if let Some(previous) = state.active.remove(&category) {
                if let Some(task) = state.tasks.remove(&previous.id) {
                    task.abort();
                }
                debug!(category = %category, "Replacing active effect");
            }

            let duration_ms = per_unit_duration.as_millis() as i64 * quantity as i64;
            let effect = ItemEffect {
                id: EffectId::new(),
                category,
                multiplier,
                duration_ms,
                started_at: chrono::Utc::now().timestamp_millis(),
                quantity,
                description: description.into(),
            };

            let handle = self.spawn_expiry(player_id.clone(), effect.clone(), duration_ms);
            state.tasks.insert(effect.id, handle);
            state.active.insert(category, effect.clone());

            let effects: Vec<ItemEffect> = state.active.values().cloned().collect();
            (player_id, effect, effects)
        };

        self.store.save_item_usage(&player_id, self.lifetime_items_used())?;
        self.store.save_effects(&player_id, &effects_to_save)?;

        info!(
            player = %player_id,
            category = %category,
            quantity,
            multiplier = effect.multiplier,
            duration_ms = effect.duration_ms,
            "Effect activated"
        );
        let _ = self.event_tx.send(ProgressEvent::EffectActivated {
            player_id,
            category,
        });
        Ok(effect)
    }

    /// Current multiplier per category, derived from timestamps at call
    /// time rather than trusting the scheduled callbacks.
    pub fn active_multipliers(&self) -> HashMap<EffectCategory, f64> {
        let now = chrono::Utc::now().timestamp_millis();
        let state = self.state.lock();
        let mut multipliers = HashMap::new();
        for effect in state.active.values() {
            if !effect.is_active_at(now) {
                continue;
            }
            let entry = multipliers.entry(effect.category).or_insert(1.0_f64);
            if effect.multiplier > *entry {
                *entry = effect.multiplier;
            }
        }
        multipliers
    }

    /// Multiplier for one category, `1.0` when no effect is live
    pub fn multiplier(&self, category: EffectCategory) -> f64 {
        self.active_multipliers().get(&category).copied().unwrap_or(1.0)
    }

    /// Currently live effects
    pub fn active_effects(&self) -> Vec<ItemEffect> {
        let now = chrono::Utc::now().timestamp_millis();
        self.state
            .lock()
            .active
            .values()
            .filter(|e| e.is_active_at(now))
            .cloned()
            .collect()
    }

    /// Remaining lifetime of a category's effect, if one is live
    pub fn time_remaining(&self, category: EffectCategory) -> Option<i64> {
        let now = chrono::Utc::now().timestamp_millis();
        self.state
            .lock()
            .active
            .get(&category)
            .filter(|e| e.is_active_at(now))
            .map(|e| e.remaining_ms(now))
    }

    /// Lifetime items consumed across all categories
    pub fn lifetime_items_used(&self) -> u64 {
        self.state.lock().lifetime_used
    }

    /// Manually remove a category's effect, cancelling its timer.
    ///
    /// Returns whether an effect was removed.
    pub fn remove_effect(&self, category: EffectCategory) -> ProgressResult<bool> {
        let (player_id, removed, effects) = {
            let mut state = self.state.lock();
            let player_id = state.player.clone().ok_or(ProgressError::NotConnected)?;
            let removed = match state.active.remove(&category) {
                Some(effect) => {
                    if let Some(task) = state.tasks.remove(&effect.id) {
                        task.abort();
                    }
                    true
                }
                None => false,
            };
            let effects: Vec<ItemEffect> = state.active.values().cloned().collect();
            (player_id, removed, effects)
        };
        if removed {
            self.store.save_effects(&player_id, &effects)?;
            debug!(player = %player_id, category = %category, "Effect removed");
        }
        Ok(removed)
    }

    /// Abort all timers and clear in-memory state. Persisted effects are
    /// untouched and come back on the next `rehydrate`.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        for (_, task) in state.tasks.drain() {
            task.abort();
        }
        state.active.clear();
        state.player = None;
        state.lifetime_used = 0;
    }

    fn spawn_expiry(
        &self,
        player_id: PlayerId,
        effect: ItemEffect,
        delay_ms: i64,
    ) -> JoinHandle<()> {
        let state = self.state.clone();
        let store = self.store.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms.max(0) as u64)).await;

            let expired = {
                let mut state = state.lock();
                // Only remove if this exact effect instance is still the
                // active one; a replacement owns its own timer.
                let still_current = state
                    .active
                    .get(&effect.category)
                    .map(|current| current.id == effect.id)
                    .unwrap_or(false);
                if still_current {
                    state.active.remove(&effect.category);
                }
                state.tasks.remove(&effect.id);
                if still_current {
                    Some(state.active.values().cloned().collect::<Vec<_>>())
                } else {
                    None
                }
            };

            if let Some(effects) = expired {
                if let Err(e) = store.save_effects(&player_id, &effects) {
                    warn!(player = %player_id, error = %e, "Failed to persist effect list after expiry");
                }
                debug!(player = %player_id, category = %effect.category, "Effect expired");
                let _ = event_tx.send(ProgressEvent::EffectExpired {
                    player_id,
                    category: effect.category,
                });
            }
        })
    }

    /// Insert an effect without scheduling a timer. Test hook for
    /// exercising the defensive timestamp checks.
    #[cfg(test)]
    pub(crate) fn insert_unscheduled(&self, effect: ItemEffect) {
        self.state.lock().active.insert(effect.category, effect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (ItemEffectEngine, LocalProgressStore, PlayerId, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = LocalProgressStore::new(temp.path().join("test.redb")).unwrap();
        let (event_tx, _) = broadcast::channel(64);
        let engine = ItemEffectEngine::new(store.clone(), event_tx);
        let player = PlayerId::from("0xabc");
        engine.rehydrate(&player);
        (engine, store, player, temp)
    }

    #[tokio::test]
    async fn test_use_items_requires_session() {
        let temp = TempDir::new().unwrap();
        let store = LocalProgressStore::new(temp.path().join("test.redb")).unwrap();
        let (event_tx, _) = broadcast::channel(64);
        let engine = ItemEffectEngine::new(store, event_tx);
        let err = engine
            .use_items(EffectCategory::MiningEfficiency, 1, Duration::from_secs(60), "boost")
            .unwrap_err();
        assert!(matches!(err, ProgressError::NotConnected));
    }

    #[tokio::test]
    async fn test_tier_progression() {
        let (engine, _store, _player, _temp) = setup();

        let first = engine
            .use_items(EffectCategory::MiningEfficiency, 1, Duration::from_secs(60), "boost")
            .unwrap();
        assert_eq!(first.multiplier, 1.03);
        assert_eq!(engine.lifetime_items_used(), 1);

        let second = engine
            .use_items(EffectCategory::CraftingSpeed, 11, Duration::from_secs(60), "boost")
            .unwrap();
        assert_eq!(engine.lifetime_items_used(), 12);
        assert_eq!(second.multiplier, 1.20);
    }

    #[tokio::test]
    async fn test_same_category_replaces_never_stacks() {
        let (engine, _store, _player, _temp) = setup();

        engine
            .use_items(EffectCategory::MiningEfficiency, 1, Duration::from_secs(60), "boost")
            .unwrap();
        engine
            .use_items(EffectCategory::MiningEfficiency, 11, Duration::from_secs(60), "boost")
            .unwrap();

        let active = engine.active_effects();
        assert_eq!(active.len(), 1);
        // New cumulative tier (12 items → 1.20), not a product of the two
        assert_eq!(active[0].multiplier, 1.20);
        assert_eq!(engine.multiplier(EffectCategory::MiningEfficiency), 1.20);
    }

    #[tokio::test]
    async fn test_duration_scales_with_quantity() {
        let (engine, _store, _player, _temp) = setup();
        let effect = engine
            .use_items(EffectCategory::ResourceYield, 3, Duration::from_secs(60), "yield")
            .unwrap();
        assert_eq!(effect.duration_ms, 180_000);
    }

    #[tokio::test]
    async fn test_zero_quantity_rejected() {
        let (engine, _store, _player, _temp) = setup();
        let err = engine
            .use_items(EffectCategory::ResourceYield, 0, Duration::from_secs(60), "noop")
            .unwrap_err();
        assert!(matches!(err, ProgressError::InvalidQuantity(0)));
    }

    #[tokio::test]
    async fn test_defensive_read_ignores_expired_effect() {
        let (engine, _store, _player, _temp) = setup();
        // An effect whose timestamps say "expired" but whose callback never
        // fired (e.g. missed timer) must not be reported active.
        let now = chrono::Utc::now().timestamp_millis();
        engine.insert_unscheduled(ItemEffect {
            id: EffectId::new(),
            category: EffectCategory::ExperienceBoost,
            multiplier: 1.10,
            duration_ms: 1_000,
            started_at: now - 5_000,
            quantity: 1,
            description: "stale".to_string(),
        });

        assert!(engine.active_multipliers().is_empty());
        assert_eq!(engine.multiplier(EffectCategory::ExperienceBoost), 1.0);
        assert!(engine.time_remaining(EffectCategory::ExperienceBoost).is_none());
    }

    #[tokio::test]
    async fn test_expiry_task_removes_effect() {
        let (engine, _store, _player, _temp) = setup();
        engine
            .use_items(EffectCategory::EnergyRestore, 1, Duration::from_millis(50), "pulse")
            .unwrap();
        assert_eq!(engine.active_effects().len(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(engine.active_effects().is_empty());
        // The effect list on disk is empty too
        assert_eq!(engine.state.lock().active.len(), 0);
    }

    #[tokio::test]
    async fn test_rehydration_discards_expired_keeps_remaining() {
        let temp = TempDir::new().unwrap();
        let store = LocalProgressStore::new(temp.path().join("test.redb")).unwrap();
        let player = PlayerId::from("0xabc");
        let now = chrono::Utc::now().timestamp_millis();

        // One effect three seconds into a ten second lifetime, one long dead
        let alive = ItemEffect {
            id: EffectId::new(),
            category: EffectCategory::MiningEfficiency,
            multiplier: 1.10,
            duration_ms: 10_000,
            started_at: now - 3_000,
            quantity: 2,
            description: "survivor".to_string(),
        };
        let dead = ItemEffect {
            id: EffectId::new(),
            category: EffectCategory::CraftingSpeed,
            multiplier: 1.10,
            duration_ms: 1_000,
            started_at: now - 60_000,
            quantity: 1,
            description: "dead".to_string(),
        };
        store.save_effects(&player, &[alive.clone(), dead]).unwrap();
        store.save_item_usage(&player, 7).unwrap();

        let (event_tx, _) = broadcast::channel(64);
        let engine = ItemEffectEngine::new(store.clone(), event_tx);
        engine.rehydrate(&player);

        // Dead effect discarded immediately, not at some later callback
        let active = engine.active_effects();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, alive.id);
        assert_eq!(engine.lifetime_items_used(), 7);

        // Remaining time is the original expiry minus elapsed, not reset
        let remaining = engine
            .time_remaining(EffectCategory::MiningEfficiency)
            .unwrap();
        assert!(remaining > 6_000 && remaining <= 7_000, "remaining={remaining}");

        // The persisted list was compacted
        assert_eq!(store.load_effects(&player).len(), 1);
    }

    #[tokio::test]
    async fn test_rehydrated_effect_expires_on_schedule() {
        let temp = TempDir::new().unwrap();
        let store = LocalProgressStore::new(temp.path().join("test.redb")).unwrap();
        let player = PlayerId::from("0xabc");
        let now = chrono::Utc::now().timestamp_millis();

        // 100ms left of a 300ms lifetime
        let effect = ItemEffect {
            id: EffectId::new(),
            category: EffectCategory::MiningEfficiency,
            multiplier: 1.03,
            duration_ms: 300,
            started_at: now - 200,
            quantity: 1,
            description: "short".to_string(),
        };
        store.save_effects(&player, &[effect]).unwrap();

        let (event_tx, _) = broadcast::channel(64);
        let engine = ItemEffectEngine::new(store.clone(), event_tx);
        engine.rehydrate(&player);
        assert_eq!(engine.active_effects().len(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(engine.active_effects().is_empty());
        assert!(store.load_effects(&player).is_empty());
    }

    #[tokio::test]
    async fn test_effects_persist_across_engine_instances() {
        let temp = TempDir::new().unwrap();
        let store = LocalProgressStore::new(temp.path().join("test.redb")).unwrap();
        let player = PlayerId::from("0xabc");

        let effect_id = {
            let (event_tx, _) = broadcast::channel(64);
            let engine = ItemEffectEngine::new(store.clone(), event_tx);
            engine.rehydrate(&player);
            let effect = engine
                .use_items(EffectCategory::ResourceYield, 2, Duration::from_secs(600), "yield")
                .unwrap();
            engine.reset();
            effect.id
        };

        let (event_tx, _) = broadcast::channel(64);
        let engine = ItemEffectEngine::new(store, event_tx);
        engine.rehydrate(&player);
        let active = engine.active_effects();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, effect_id);
        assert_eq!(engine.lifetime_items_used(), 2);
    }

    #[tokio::test]
    async fn test_remove_effect_cancels_timer() {
        let (engine, store, player, _temp) = setup();
        engine
            .use_items(EffectCategory::MiningEfficiency, 1, Duration::from_secs(600), "boost")
            .unwrap();
        assert!(engine.remove_effect(EffectCategory::MiningEfficiency).unwrap());
        assert!(engine.active_effects().is_empty());
        assert!(store.load_effects(&player).is_empty());
        assert!(engine.state.lock().tasks.is_empty());

        // Removing again reports nothing to remove
        assert!(!engine.remove_effect(EffectCategory::MiningEfficiency).unwrap());
    }

    #[tokio::test]
    async fn test_activation_emits_event() {
        let temp = TempDir::new().unwrap();
        let store = LocalProgressStore::new(temp.path().join("test.redb")).unwrap();
        let (event_tx, mut event_rx) = broadcast::channel(64);
        let engine = ItemEffectEngine::new(store, event_tx);
        let player = PlayerId::from("0xabc");
        engine.rehydrate(&player);

        engine
            .use_items(EffectCategory::CraftingSpeed, 1, Duration::from_secs(60), "speed")
            .unwrap();

        let event = event_rx.try_recv().unwrap();
        assert!(matches!(event, ProgressEvent::EffectActivated { .. }));
    }
}
