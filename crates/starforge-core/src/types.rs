//! Core types for the Starforge progress engine

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod effect;
pub mod mission;

use mission::{MissionId, MissionRecord, MissionStatus};

/// Current snapshot schema version, bumped on incompatible layout changes.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Credits granted to a freshly created player snapshot.
pub const STARTING_CREDITS: u64 = 500;

/// Experience required per level.
const XP_PER_LEVEL: u64 = 1000;

/// Stable identity key under which all progress is namespaced.
///
/// Typically an account or wallet address. The engine treats it as an
/// opaque string; storage and the remote ledger key everything by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub String);

impl PlayerId {
    /// Get the identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PlayerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Player position in the world
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// A stack of items in the player's inventory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryEntry {
    /// Item type identifier (e.g. "iron_ore")
    pub item: String,
    /// How many the player holds
    pub quantity: u64,
}

/// Kind of gameplay activity a domain event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Mining,
    Crafting,
    Exploration,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Mining => write!(f, "mining"),
            EventKind::Crafting => write!(f, "crafting"),
            EventKind::Exploration => write!(f, "exploration"),
        }
    }
}

/// A gameplay event produced by upstream actions (mine, craft, explore).
///
/// Events are mapped through the active mission's rule table into progress
/// deltas; events that match no rule are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    pub kind: EventKind,
    /// Resource or item type the action operated on (e.g. "iron_ore")
    pub subject: String,
    pub quantity: u32,
}

impl GameEvent {
    pub fn new(kind: EventKind, subject: impl Into<String>, quantity: u32) -> Self {
        Self {
            kind,
            subject: subject.into(),
            quantity,
        }
    }
}

/// Complete, serializable representation of a player's progress.
///
/// This is the unit the local store persists and the sync layer transports.
/// Mission fields are owned by the mission engine; the remaining player
/// fields are owned by the caller. The sync layer merges it field-aware,
/// never as an opaque blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProgressSnapshot {
    /// Schema version for forward-compatible merges
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub player_id: PlayerId,
    pub name: String,
    pub level: u32,
    pub experience: u64,
    pub credits: u64,
    #[serde(default)]
    pub position: Position,
    /// Named gameplay counters (ore mined, items crafted, ...)
    #[serde(default)]
    pub stats: BTreeMap<String, u64>,
    #[serde(default)]
    pub inventory: Vec<InventoryEntry>,
    #[serde(default)]
    pub missions: Vec<MissionRecord>,
    /// At most one mission is active at any time
    #[serde(default)]
    pub active_mission: Option<MissionId>,
    /// Millisecond Unix timestamp; monotonically non-decreasing per identity
    pub last_updated: i64,
}

fn default_schema_version() -> u32 {
    SNAPSHOT_SCHEMA_VERSION
}

impl PlayerProgressSnapshot {
    /// Create a default snapshot for a newly connected identity.
    ///
    /// Level 1, no experience, the starting credit grant, and no missions;
    /// the mission engine populates the mission list from the catalog.
    pub fn new(player_id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            player_id,
            name: name.into(),
            level: 1,
            experience: 0,
            credits: STARTING_CREDITS,
            position: Position::default(),
            stats: BTreeMap::new(),
            inventory: Vec::new(),
            missions: Vec::new(),
            active_mission: None,
            last_updated: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Bump `last_updated` to now, clamped so it never decreases.
    ///
    /// Always advances by at least one tick so consecutive mutations within
    /// the same millisecond still register as changes against a recorded
    /// sync point.
    pub fn touch(&mut self) {
        let now = chrono::Utc::now().timestamp_millis();
        self.last_updated = now.max(self.last_updated + 1);
    }

    /// Find a mission by id
    pub fn mission(&self, id: &MissionId) -> Option<&MissionRecord> {
        self.missions.iter().find(|m| &m.id == id)
    }

    /// Find a mission by id, mutable
    pub fn mission_mut(&mut self, id: &MissionId) -> Option<&mut MissionRecord> {
        self.missions.iter_mut().find(|m| &m.id == id)
    }

    /// Ids of all completed missions
    pub fn completed_missions(&self) -> Vec<MissionId> {
        self.missions
            .iter()
            .filter(|m| m.status == MissionStatus::Completed)
            .map(|m| m.id.clone())
            .collect()
    }

    /// Add items to the inventory, merging into an existing stack.
    pub fn add_item(&mut self, item: &str, quantity: u64) {
        if let Some(entry) = self.inventory.iter_mut().find(|e| e.item == item) {
            entry.quantity += quantity;
        } else {
            self.inventory.push(InventoryEntry {
                item: item.to_string(),
                quantity,
            });
        }
    }

    /// Increment a named stat counter.
    pub fn add_stat(&mut self, key: &str, delta: u64) {
        *self.stats.entry(key.to_string()).or_insert(0) += delta;
    }
}

/// Level derived from total experience (1000 XP per level).
///
/// The engine clamps the result so a player's level never decreases even
/// if a merge lowers experience-adjacent fields.
pub fn level_for_experience(experience: u64) -> u32 {
    1 + (experience / XP_PER_LEVEL) as u32
}
