//! Sync status and engine event types.
//!
//! `SyncStatus` is derived on demand from the local store and the
//! coordinator's per-identity state; it is never stored. `ProgressEvent`
//! is the broadcast payload the engine emits so UIs and tests can observe
//! reconciliation, mission, and effect activity.

use std::fmt;

use crate::sync::merge::ConflictRecord;
use crate::types::effect::EffectCategory;
use crate::types::mission::MissionId;
use crate::types::PlayerId;

/// Derived synchronization status for one identity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatus {
    /// A snapshot exists in the local store
    pub has_local: bool,
    /// The remote ledger has been observed to hold a snapshot
    pub has_remote: bool,
    /// `last_updated` of the snapshot agreed at the last successful
    /// reconciliation, if any
    pub last_sync_time: Option<i64>,
    /// Local changes exist that the remote has not seen
    pub needs_sync: bool,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "local={} remote={} needs_sync={}",
            self.has_local, self.has_remote, self.needs_sync
        )
    }
}

/// Events emitted by the progress engine
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A reconciliation finished and the merged snapshot was adopted
    SnapshotReconciled {
        player_id: PlayerId,
        conflicts: Vec<ConflictRecord>,
    },
    /// A mission reached completion
    MissionCompleted {
        player_id: PlayerId,
        mission_id: MissionId,
    },
    /// Reward issuance failed; completion state was kept
    RewardFailed {
        player_id: PlayerId,
        mission_id: MissionId,
        message: String,
    },
    /// An item effect was activated (new or replacing its category)
    EffectActivated {
        player_id: PlayerId,
        category: EffectCategory,
    },
    /// An item effect ran out
    EffectExpired {
        player_id: PlayerId,
        category: EffectCategory,
    },
    /// A pending snapshot was confirmed by the remote ledger
    RemotePublished { player_id: PlayerId },
    /// A sync attempt failed; the local snapshot remains authoritative
    SyncFailed {
        player_id: PlayerId,
        message: String,
    },
}

impl ProgressEvent {
    /// The identity this event concerns
    pub fn player_id(&self) -> &PlayerId {
        match self {
            ProgressEvent::SnapshotReconciled { player_id, .. } => player_id,
            ProgressEvent::MissionCompleted { player_id, .. } => player_id,
            ProgressEvent::RewardFailed { player_id, .. } => player_id,
            ProgressEvent::EffectActivated { player_id, .. } => player_id,
            ProgressEvent::EffectExpired { player_id, .. } => player_id,
            ProgressEvent::RemotePublished { player_id } => player_id,
            ProgressEvent::SyncFailed { player_id, .. } => player_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_status_default() {
        let status = SyncStatus::default();
        assert!(!status.has_local);
        assert!(!status.needs_sync);
        assert!(status.last_sync_time.is_none());
    }

    #[test]
    fn test_sync_status_display() {
        let status = SyncStatus {
            has_local: true,
            has_remote: false,
            last_sync_time: None,
            needs_sync: true,
        };
        assert_eq!(format!("{}", status), "local=true remote=false needs_sync=true");
    }

    #[test]
    fn test_event_player_id() {
        let player = PlayerId::from("0xabc");
        let event = ProgressEvent::RemotePublished {
            player_id: player.clone(),
        };
        assert_eq!(event.player_id(), &player);
    }
}
