//! File-backed stand-in for the remote ledger.
//!
//! Stores one JSON snapshot per identity under the data directory, plus an
//! append-only mirror log. Lets the CLI exercise the full sync path without
//! a real backend; swap in a real `RemoteLedger` implementation to talk to
//! one.

use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use starforge_core::{
    MissionId, PlayerId, PlayerProgressSnapshot, RemoteError, RemoteLedger,
};

pub struct JsonFileLedger {
    dir: PathBuf,
}

impl JsonFileLedger {
    pub fn new(dir: PathBuf) -> Result<Self, RemoteError> {
        std::fs::create_dir_all(&dir).map_err(|e| RemoteError::new(e.to_string()))?;
        Ok(Self { dir })
    }

    fn snapshot_path(&self, player_id: &PlayerId) -> PathBuf {
        self.dir.join(format!("{}.json", player_id.as_str()))
    }
}

#[async_trait]
impl RemoteLedger for JsonFileLedger {
    async fn load_complete_progress(
        &self,
        player_id: &PlayerId,
    ) -> Result<Option<PlayerProgressSnapshot>, RemoteError> {
        let path = self.snapshot_path(player_id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path).map_err(|e| RemoteError::new(e.to_string()))?;
        let snapshot =
            serde_json::from_slice(&bytes).map_err(|e| RemoteError::new(e.to_string()))?;
        Ok(Some(snapshot))
    }

    async fn save_complete_progress(
        &self,
        player_id: &PlayerId,
        snapshot: &PlayerProgressSnapshot,
    ) -> Result<bool, RemoteError> {
        let bytes =
            serde_json::to_vec_pretty(snapshot).map_err(|e| RemoteError::new(e.to_string()))?;
        std::fs::write(self.snapshot_path(player_id), bytes)
            .map_err(|e| RemoteError::new(e.to_string()))?;
        Ok(true)
    }

    async fn update_mission_progress(
        &self,
        player_id: &PlayerId,
        mission_id: &MissionId,
        progress: u32,
    ) -> Result<(), RemoteError> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join("mirrors.log"))
            .map_err(|e| RemoteError::new(e.to_string()))?;
        writeln!(file, "{} {} {}", player_id, mission_id, progress)
            .map_err(|e| RemoteError::new(e.to_string()))?;
        Ok(())
    }
}
