//! Mission types: catalog records, the progress state machine's data, and
//! the durable audit trail.
//!
//! A `MissionRecord` is the in-snapshot, transient view of a mission; the
//! `MissionProgressRecord` is the durable per-player audit row written to
//! the mission log on start, progress, and completion.

use serde::{Deserialize, Serialize};

use crate::types::{EventKind, GameEvent};

/// Catalog-scoped mission identifier (e.g. "mine-first-ore")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MissionId(pub String);

impl MissionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MissionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broad mission category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionKind {
    Mining,
    Crafting,
    Exploration,
    Other,
}

/// Mission state machine: `locked → available → active → completed`.
///
/// `completed` is terminal. `available → active` is an explicit start
/// command; `locked → available` is recomputed from the catalog's unlock
/// requirements whenever the player's level or completed set changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Locked,
    Available,
    Active,
    Completed,
}

impl std::fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissionStatus::Locked => write!(f, "locked"),
            MissionStatus::Available => write!(f, "available"),
            MissionStatus::Active => write!(f, "active"),
            MissionStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Requirements gating the `locked → available` transition
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UnlockRequirements {
    /// Minimum player level
    #[serde(default)]
    pub min_level: u32,
    /// Missions that must be completed first
    #[serde(default)]
    pub prerequisites: Vec<MissionId>,
}

impl UnlockRequirements {
    /// True when the player meets the level threshold and every
    /// prerequisite is in the completed set.
    pub fn satisfied(&self, level: u32, completed: &[MissionId]) -> bool {
        level >= self.min_level && self.prerequisites.iter().all(|p| completed.contains(p))
    }
}

/// What a completed mission awards
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RewardDescriptor {
    #[serde(default)]
    pub experience: u64,
    #[serde(default)]
    pub credits: u64,
    /// Resource grants added to the inventory
    #[serde(default)]
    pub resources: Vec<ResourceGrant>,
}

/// A single resource line in a reward descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceGrant {
    pub item: String,
    pub quantity: u64,
}

/// Maps a gameplay event onto a progress delta for one mission.
///
/// An event matches when its kind equals `kind` and, if `subject` is set,
/// the event's subject equals it. The delta is `event.quantity × per_unit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRule {
    pub kind: EventKind,
    /// Restrict to a specific resource/item type; `None` matches any
    #[serde(default)]
    pub subject: Option<String>,
    pub per_unit: u32,
}

impl ProgressRule {
    /// Progress delta this rule yields for an event, zero when it does not match.
    pub fn delta_for(&self, event: &GameEvent) -> u32 {
        if event.kind != self.kind {
            return 0;
        }
        if let Some(subject) = &self.subject {
            if subject != &event.subject {
                return 0;
            }
        }
        event.quantity.saturating_mul(self.per_unit)
    }
}

/// A mission as carried inside a player snapshot.
///
/// Invariants: `0 ≤ progress ≤ max_progress`; `status == Completed` exactly
/// when `progress == max_progress` was reached through the completion path;
/// at most one record across the snapshot has `status == Active`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionRecord {
    pub id: MissionId,
    pub title: String,
    pub kind: MissionKind,
    pub status: MissionStatus,
    pub progress: u32,
    pub max_progress: u32,
    pub reward: RewardDescriptor,
    pub requirements: UnlockRequirements,
}

impl MissionRecord {
    /// Saturating progress add, clamped to `max_progress`.
    ///
    /// Returns the new progress value.
    pub fn apply_delta(&mut self, delta: u32) -> u32 {
        self.progress = self.progress.saturating_add(delta).min(self.max_progress);
        self.progress
    }

    /// True once progress has reached the maximum
    pub fn at_max(&self) -> bool {
        self.progress >= self.max_progress
    }
}

/// Durable audit record for one (player, mission) pair.
///
/// Distinct from the in-snapshot `MissionRecord`: this row survives in the
/// mission log regardless of later snapshot merges and records when the
/// mission was started, finished, and what was actually awarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionProgressRecord {
    pub mission_id: MissionId,
    pub player_id: crate::types::PlayerId,
    pub progress: u32,
    pub completed: bool,
    /// Snapshot of the reward descriptor at completion time
    #[serde(default)]
    pub rewards: Option<RewardDescriptor>,
    /// Whether the reward was actually issued (guards exactly-once issuance)
    #[serde(default)]
    pub rewarded: bool,
    pub started_at: i64,
    #[serde(default)]
    pub completed_at: Option<i64>,
    pub last_updated: i64,
}

impl MissionProgressRecord {
    /// Create a fresh record at mission start
    pub fn started(player_id: crate::types::PlayerId, mission_id: MissionId) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            mission_id,
            player_id,
            progress: 0,
            completed: false,
            rewards: None,
            rewarded: false,
            started_at: now,
            completed_at: None,
            last_updated: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GameEvent;

    fn record(max: u32) -> MissionRecord {
        MissionRecord {
            id: MissionId::from("test-mission"),
            title: "Test Mission".to_string(),
            kind: MissionKind::Mining,
            status: MissionStatus::Active,
            progress: 0,
            max_progress: max,
            reward: RewardDescriptor::default(),
            requirements: UnlockRequirements::default(),
        }
    }

    #[test]
    fn test_apply_delta_clamps_at_max() {
        let mut m = record(10);
        assert_eq!(m.apply_delta(4), 4);
        assert_eq!(m.apply_delta(4), 8);
        assert_eq!(m.apply_delta(4), 10);
        assert!(m.at_max());
    }

    #[test]
    fn test_progress_rule_matches_kind_and_subject() {
        let rule = ProgressRule {
            kind: EventKind::Mining,
            subject: Some("iron_ore".to_string()),
            per_unit: 2,
        };
        let hit = GameEvent::new(EventKind::Mining, "iron_ore", 3);
        let wrong_subject = GameEvent::new(EventKind::Mining, "copper_ore", 3);
        let wrong_kind = GameEvent::new(EventKind::Crafting, "iron_ore", 3);
        assert_eq!(rule.delta_for(&hit), 6);
        assert_eq!(rule.delta_for(&wrong_subject), 0);
        assert_eq!(rule.delta_for(&wrong_kind), 0);
    }

    #[test]
    fn test_progress_rule_any_subject() {
        let rule = ProgressRule {
            kind: EventKind::Exploration,
            subject: None,
            per_unit: 1,
        };
        let event = GameEvent::new(EventKind::Exploration, "sector-7", 4);
        assert_eq!(rule.delta_for(&event), 4);
    }

    #[test]
    fn test_unlock_requirements() {
        let req = UnlockRequirements {
            min_level: 3,
            prerequisites: vec![MissionId::from("a")],
        };
        let done = vec![MissionId::from("a")];
        assert!(!req.satisfied(2, &done));
        assert!(!req.satisfied(3, &[]));
        assert!(req.satisfied(3, &done));
    }
}
