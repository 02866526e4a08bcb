//! Remote ledger boundary.
//!
//! The remote ledger is the authoritative long-term backend for player
//! progress. Only its call contract is bound here; the concrete transport
//! lives outside this crate. The sync coordinator catches every failure at
//! this boundary and converts it to a failure result, so nothing behind
//! this trait ever throws into the engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::types::mission::MissionId;
use crate::types::{PlayerId, PlayerProgressSnapshot};

/// Transport-level failure reaching the remote ledger
#[derive(Error, Debug, Clone)]
#[error("remote ledger error: {0}")]
pub struct RemoteError(pub String);

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Call contract of the remote authoritative ledger.
///
/// All writes are idempotent full overwrites keyed by identity, so
/// at-least-once delivery is acceptable.
#[async_trait]
pub trait RemoteLedger: Send + Sync {
    /// Fetch the complete remote snapshot for an identity, if one exists.
    /// Read-only; never mutates remote state.
    async fn load_complete_progress(
        &self,
        player_id: &PlayerId,
    ) -> Result<Option<PlayerProgressSnapshot>, RemoteError>;

    /// Write-through the full snapshot. Returns whether the ledger
    /// confirmed the write.
    async fn save_complete_progress(
        &self,
        player_id: &PlayerId,
        snapshot: &PlayerProgressSnapshot,
    ) -> Result<bool, RemoteError>;

    /// Fire-and-forget mirror of a single mission's progress.
    async fn update_mission_progress(
        &self,
        player_id: &PlayerId,
        mission_id: &MissionId,
        progress: u32,
    ) -> Result<(), RemoteError>;
}

/// In-memory ledger double for tests and the CLI's offline mode.
///
/// Backed by a shared map; `set_failing(true)` makes every call return a
/// transport error, for exercising the coordinator's failure semantics.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    snapshots: Arc<Mutex<HashMap<PlayerId, PlayerProgressSnapshot>>>,
    mirrors: Arc<Mutex<Vec<(PlayerId, MissionId, u32)>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated transport failure
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Seed a remote snapshot directly (test setup)
    pub fn insert_snapshot(&self, snapshot: PlayerProgressSnapshot) {
        self.snapshots
            .lock()
            .insert(snapshot.player_id.clone(), snapshot);
    }

    /// Snapshot currently held by the ledger
    pub fn snapshot(&self, player_id: &PlayerId) -> Option<PlayerProgressSnapshot> {
        self.snapshots.lock().get(player_id).cloned()
    }

    /// Mission mirror calls received, in order
    pub fn mirrored(&self) -> Vec<(PlayerId, MissionId, u32)> {
        self.mirrors.lock().clone()
    }

    fn check(&self) -> Result<(), RemoteError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(RemoteError::new("simulated transport failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteLedger for InMemoryLedger {
    async fn load_complete_progress(
        &self,
        player_id: &PlayerId,
    ) -> Result<Option<PlayerProgressSnapshot>, RemoteError> {
        self.check()?;
        Ok(self.snapshots.lock().get(player_id).cloned())
    }

    async fn save_complete_progress(
        &self,
        player_id: &PlayerId,
        snapshot: &PlayerProgressSnapshot,
    ) -> Result<bool, RemoteError> {
        self.check()?;
        self.snapshots
            .lock()
            .insert(player_id.clone(), snapshot.clone());
        Ok(true)
    }

    async fn update_mission_progress(
        &self,
        player_id: &PlayerId,
        mission_id: &MissionId,
        progress: u32,
    ) -> Result<(), RemoteError> {
        self.check()?;
        self.mirrors
            .lock()
            .push((player_id.clone(), mission_id.clone(), progress));
        Ok(())
    }
}
