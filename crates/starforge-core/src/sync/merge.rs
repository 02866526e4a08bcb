//! Field-by-field snapshot reconciliation.
//!
//! Every field of the snapshot has a named merge policy rather than an
//! implicit shallow merge:
//!
//! - `MonotonicMax` — progress-like values (experience, credits, level,
//!   stat counters, inventory quantities, mission progress) take the higher
//!   of the two sides, so neither a stale local nor a stale remote can
//!   regress progress. The cost is occasionally double-counting a remote
//!   write that has not round-tripped yet; that inconsistency is bounded
//!   and accepted.
//! - `RemoteIfNewer` — non-monotonic values (name, position, the active
//!   mission reference) take the remote value when the remote record is
//!   newer by `last_updated`.
//!
//! Divergent scalar fields each produce a `ConflictRecord`. Conflicts are
//! advisory output for the caller; they are never persisted.

use serde::Serialize;
use serde_json::Value;

use crate::types::mission::{MissionRecord, MissionStatus};
use crate::types::PlayerProgressSnapshot;

/// Named merge policy for a snapshot field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Take the higher of the two values
    MonotonicMax,
    /// Take the remote value when the remote snapshot is newer
    RemoteIfNewer,
}

/// Policy table: one named policy per merged scalar field.
pub const FIELD_POLICIES: &[(&str, MergePolicy)] = &[
    ("experience", MergePolicy::MonotonicMax),
    ("credits", MergePolicy::MonotonicMax),
    ("level", MergePolicy::MonotonicMax),
    ("name", MergePolicy::RemoteIfNewer),
    ("position", MergePolicy::RemoteIfNewer),
];

fn policy_for(field: &str) -> MergePolicy {
    FIELD_POLICIES
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, policy)| *policy)
        .unwrap_or(MergePolicy::RemoteIfNewer)
}

/// A single divergent field observed during reconciliation.
///
/// Purely advisory: produced for the caller to decide or display, never
/// stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictRecord {
    pub field: String,
    pub local: Value,
    pub remote: Value,
}

impl ConflictRecord {
    fn new<T: Serialize>(field: &str, local: &T, remote: &T) -> Self {
        Self {
            field: field.to_string(),
            local: serde_json::to_value(local).unwrap_or(Value::Null),
            remote: serde_json::to_value(remote).unwrap_or(Value::Null),
        }
    }
}

/// Result of merging a local and a remote snapshot
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub merged: PlayerProgressSnapshot,
    pub conflicts: Vec<ConflictRecord>,
}

fn merge_field<T>(
    field: &str,
    local: &T,
    remote: &T,
    remote_newer: bool,
    conflicts: &mut Vec<ConflictRecord>,
) -> T
where
    T: Clone + PartialEq + PartialOrd + Serialize,
{
    if local == remote {
        return local.clone();
    }
    conflicts.push(ConflictRecord::new(field, local, remote));
    match policy_for(field) {
        MergePolicy::MonotonicMax => {
            if remote > local {
                remote.clone()
            } else {
                local.clone()
            }
        }
        MergePolicy::RemoteIfNewer => {
            if remote_newer {
                remote.clone()
            } else {
                local.clone()
            }
        }
    }
}

fn status_rank(status: MissionStatus) -> u8 {
    match status {
        MissionStatus::Locked => 0,
        MissionStatus::Available => 1,
        MissionStatus::Active => 2,
        MissionStatus::Completed => 3,
    }
}

/// Merge one mission record pair: progress takes the max, the
/// further-along status wins, and a completed mission is pinned to its
/// maximum progress.
fn merge_mission(local: &MissionRecord, remote: &MissionRecord) -> MissionRecord {
    let mut merged = local.clone();
    merged.progress = local.progress.max(remote.progress);
    if status_rank(remote.status) > status_rank(local.status) {
        merged.status = remote.status;
    }
    if merged.status == MissionStatus::Completed {
        merged.progress = merged.max_progress;
    }
    merged.progress = merged.progress.min(merged.max_progress);
    merged
}

/// Merge a local and a remote snapshot field by field.
///
/// The local side is the base; `player_id` is always the local identity.
/// `last_updated` of the result is the maximum of both sides, preserving
/// the per-identity monotonicity invariant.
pub fn merge_snapshots(
    local: &PlayerProgressSnapshot,
    remote: &PlayerProgressSnapshot,
) -> MergeOutcome {
    let mut conflicts = Vec::new();
    let remote_newer = remote.last_updated > local.last_updated;

    let mut merged = local.clone();
    merged.schema_version = local.schema_version.max(remote.schema_version);
    merged.experience = merge_field(
        "experience",
        &local.experience,
        &remote.experience,
        remote_newer,
        &mut conflicts,
    );
    merged.credits = merge_field(
        "credits",
        &local.credits,
        &remote.credits,
        remote_newer,
        &mut conflicts,
    );
    merged.level = merge_field(
        "level",
        &local.level,
        &remote.level,
        remote_newer,
        &mut conflicts,
    );
    merged.name = merge_field(
        "name",
        &local.name,
        &remote.name,
        remote_newer,
        &mut conflicts,
    );
    merged.position = merge_field(
        "position",
        &local.position,
        &remote.position,
        remote_newer,
        &mut conflicts,
    );

    // Stat counters: per-key monotonic max
    for (key, remote_value) in &remote.stats {
        let entry = merged.stats.entry(key.clone()).or_insert(0);
        *entry = (*entry).max(*remote_value);
    }

    // Inventory: per-item monotonic max on quantity, union of item types
    for remote_entry in &remote.inventory {
        match merged
            .inventory
            .iter_mut()
            .find(|e| e.item == remote_entry.item)
        {
            Some(entry) => entry.quantity = entry.quantity.max(remote_entry.quantity),
            None => merged.inventory.push(remote_entry.clone()),
        }
    }

    // Missions: merge per id, append remote-only entries
    for remote_mission in &remote.missions {
        match merged.missions.iter_mut().find(|m| m.id == remote_mission.id) {
            Some(local_mission) => *local_mission = merge_mission(local_mission, remote_mission),
            None => merged.missions.push(remote_mission.clone()),
        }
    }

    // Active mission reference follows the newer side, then is validated
    // against the merged mission list: at most one record stays active and
    // a completed mission can no longer be referenced.
    let preferred_active = if remote_newer {
        remote.active_mission.clone().or_else(|| local.active_mission.clone())
    } else {
        local.active_mission.clone().or_else(|| remote.active_mission.clone())
    };
    let active_ref = preferred_active.filter(|id| {
        merged
            .mission(id)
            .map(|m| m.status != MissionStatus::Completed)
            .unwrap_or(false)
    });
    for mission in &mut merged.missions {
        if mission.status == MissionStatus::Active {
            if active_ref.as_ref() != Some(&mission.id) {
                mission.status = MissionStatus::Available;
            }
        } else if mission.status != MissionStatus::Completed
            && active_ref.as_ref() == Some(&mission.id)
        {
            mission.status = MissionStatus::Active;
        }
    }
    merged.active_mission = active_ref;

    merged.last_updated = local.last_updated.max(remote.last_updated);

    MergeOutcome { merged, conflicts }
}
