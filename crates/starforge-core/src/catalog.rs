//! Static mission catalog.
//!
//! The catalog is a read-only table of mission definitions: unlock
//! requirements, progress rules, and rewards. Mission state lives in the
//! player snapshot; the catalog is consulted to instantiate records and to
//! recompute unlock transitions, never mutated.

use std::collections::HashMap;

use crate::types::mission::{
    MissionId, MissionKind, MissionRecord, MissionStatus, ProgressRule, ResourceGrant,
    RewardDescriptor, UnlockRequirements,
};
use crate::types::{EventKind, GameEvent};

/// One mission definition in the catalog
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub id: MissionId,
    pub title: String,
    pub kind: MissionKind,
    pub max_progress: u32,
    pub requirements: UnlockRequirements,
    pub reward: RewardDescriptor,
    /// Rules mapping gameplay events onto progress deltas
    pub rules: Vec<ProgressRule>,
}

/// Read-only mission catalog, indexed by mission id.
#[derive(Debug, Clone)]
pub struct MissionCatalog {
    entries: Vec<CatalogEntry>,
    index: HashMap<MissionId, usize>,
}

impl MissionCatalog {
    /// Build a catalog from entries. Later duplicates of an id are ignored.
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        let mut index = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            index.entry(entry.id.clone()).or_insert(i);
        }
        Self { entries, index }
    }

    /// Look up a catalog entry by id
    pub fn entry(&self, id: &MissionId) -> Option<&CatalogEntry> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Progress delta an event yields for a mission (sum over its rules).
    pub fn delta_for(&self, id: &MissionId, event: &GameEvent) -> u32 {
        self.entry(id)
            .map(|e| e.rules.iter().map(|r| r.delta_for(event)).sum())
            .unwrap_or(0)
    }

    /// Instantiate the mission list for a fresh player at the given level.
    ///
    /// Every entry becomes a record with zero progress; status is
    /// `available` where the unlock requirements are already met, `locked`
    /// otherwise.
    pub fn instantiate(&self, level: u32) -> Vec<MissionRecord> {
        let completed: Vec<MissionId> = Vec::new();
        self.entries
            .iter()
            .map(|entry| {
                let status = if entry.requirements.satisfied(level, &completed) {
                    MissionStatus::Available
                } else {
                    MissionStatus::Locked
                };
                MissionRecord {
                    id: entry.id.clone(),
                    title: entry.title.clone(),
                    kind: entry.kind,
                    status,
                    progress: 0,
                    max_progress: entry.max_progress,
                    reward: entry.reward.clone(),
                    requirements: entry.requirements.clone(),
                }
            })
            .collect()
    }

    /// The standard catalog shipped with the engine: three short chains
    /// (mining, crafting, exploration) plus a capstone.
    pub fn standard() -> Self {
        let entries = vec![
            CatalogEntry {
                id: MissionId::from("mine-first-ore"),
                title: "First Strike".to_string(),
                kind: MissionKind::Mining,
                max_progress: 10,
                requirements: UnlockRequirements::default(),
                reward: RewardDescriptor {
                    experience: 100,
                    credits: 50,
                    resources: vec![],
                },
                rules: vec![ProgressRule {
                    kind: EventKind::Mining,
                    subject: None,
                    per_unit: 1,
                }],
            },
            CatalogEntry {
                id: MissionId::from("mine-iron-vein"),
                title: "Iron Vein".to_string(),
                kind: MissionKind::Mining,
                max_progress: 25,
                requirements: UnlockRequirements {
                    min_level: 2,
                    prerequisites: vec![MissionId::from("mine-first-ore")],
                },
                reward: RewardDescriptor {
                    experience: 300,
                    credits: 150,
                    resources: vec![ResourceGrant {
                        item: "iron_ingot".to_string(),
                        quantity: 5,
                    }],
                },
                rules: vec![ProgressRule {
                    kind: EventKind::Mining,
                    subject: Some("iron_ore".to_string()),
                    per_unit: 1,
                }],
            },
            CatalogEntry {
                id: MissionId::from("craft-basic-tools"),
                title: "Toolmaker".to_string(),
                kind: MissionKind::Crafting,
                max_progress: 5,
                requirements: UnlockRequirements::default(),
                reward: RewardDescriptor {
                    experience: 150,
                    credits: 75,
                    resources: vec![],
                },
                rules: vec![ProgressRule {
                    kind: EventKind::Crafting,
                    subject: None,
                    per_unit: 1,
                }],
            },
            CatalogEntry {
                id: MissionId::from("craft-mining-rig"),
                title: "Rig Builder".to_string(),
                kind: MissionKind::Crafting,
                max_progress: 3,
                requirements: UnlockRequirements {
                    min_level: 3,
                    prerequisites: vec![MissionId::from("craft-basic-tools")],
                },
                reward: RewardDescriptor {
                    experience: 500,
                    credits: 400,
                    resources: vec![ResourceGrant {
                        item: "mining_rig".to_string(),
                        quantity: 1,
                    }],
                },
                rules: vec![ProgressRule {
                    kind: EventKind::Crafting,
                    subject: Some("mining_rig".to_string()),
                    per_unit: 1,
                }],
            },
            CatalogEntry {
                id: MissionId::from("explore-near-sectors"),
                title: "Near Space".to_string(),
                kind: MissionKind::Exploration,
                max_progress: 3,
                requirements: UnlockRequirements::default(),
                reward: RewardDescriptor {
                    experience: 200,
                    credits: 100,
                    resources: vec![],
                },
                rules: vec![ProgressRule {
                    kind: EventKind::Exploration,
                    subject: None,
                    per_unit: 1,
                }],
            },
            CatalogEntry {
                id: MissionId::from("explore-deep-field"),
                title: "Deep Field".to_string(),
                kind: MissionKind::Exploration,
                max_progress: 8,
                requirements: UnlockRequirements {
                    min_level: 4,
                    prerequisites: vec![MissionId::from("explore-near-sectors")],
                },
                reward: RewardDescriptor {
                    experience: 800,
                    credits: 500,
                    resources: vec![ResourceGrant {
                        item: "star_chart".to_string(),
                        quantity: 1,
                    }],
                },
                rules: vec![ProgressRule {
                    kind: EventKind::Exploration,
                    subject: None,
                    per_unit: 1,
                }],
            },
            CatalogEntry {
                id: MissionId::from("forge-master"),
                title: "Forge Master".to_string(),
                kind: MissionKind::Other,
                max_progress: 50,
                requirements: UnlockRequirements {
                    min_level: 5,
                    prerequisites: vec![
                        MissionId::from("mine-iron-vein"),
                        MissionId::from("craft-mining-rig"),
                    ],
                },
                reward: RewardDescriptor {
                    experience: 2000,
                    credits: 1500,
                    resources: vec![ResourceGrant {
                        item: "forge_core".to_string(),
                        quantity: 1,
                    }],
                },
                rules: vec![
                    ProgressRule {
                        kind: EventKind::Mining,
                        subject: None,
                        per_unit: 1,
                    },
                    ProgressRule {
                        kind: EventKind::Crafting,
                        subject: None,
                        per_unit: 2,
                    },
                ],
            },
        ];
        Self::new(entries)
    }
}
