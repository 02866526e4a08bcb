//! Persistent local progress cache using redb.
//!
//! This module provides ACID-compliant storage for:
//! - Player progress snapshots (identity-keyed)
//! - Active item effects (identity-keyed list)
//! - The lifetime item-usage counter
//! - The durable mission log (per player, per mission)
//!
//! The store holds no business logic. Loads never fail toward the caller:
//! a missing key and an unparsable value are both "absent", so a corrupt
//! cache degrades to an empty one instead of wedging the engine.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use tracing::warn;

use crate::error::ProgressResult;
use crate::types::effect::ItemEffect;
use crate::types::mission::{MissionId, MissionProgressRecord};
use crate::types::{PlayerId, PlayerProgressSnapshot};

// Table definitions
const SNAPSHOTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");
const EFFECTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("effects");
const ITEM_USAGE_TABLE: TableDefinition<&str, u64> = TableDefinition::new("item_usage");
const MISSION_LOG_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("mission_log");

/// Identity-keyed snapshot cache backed by redb.
///
/// Single-writer, synchronous; cloning shares the underlying database
/// handle so the engine's components can all persist through one file.
#[derive(Clone)]
pub struct LocalProgressStore {
    db: Arc<RwLock<Database>>,
}

impl LocalProgressStore {
    /// Create a new store at the given path.
    ///
    /// This will:
    /// - Create the database directory if it doesn't exist
    /// - Initialize the database file
    /// - Create all required tables
    pub fn new(path: impl AsRef<Path>) -> ProgressResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SNAPSHOTS_TABLE)?;
            let _ = write_txn.open_table(EFFECTS_TABLE)?;
            let _ = write_txn.open_table(ITEM_USAGE_TABLE)?;
            let _ = write_txn.open_table(MISSION_LOG_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Snapshot Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Save a player's snapshot. Idempotent full overwrite, keyed by identity.
    pub fn save_snapshot(&self, snapshot: &PlayerProgressSnapshot) -> ProgressResult<()> {
        let data = serde_json::to_vec(snapshot)
            .map_err(|e| crate::error::ProgressError::Serialization(e.to_string()))?;
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(SNAPSHOTS_TABLE)?;
            table.insert(snapshot.player_id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a player's snapshot.
    ///
    /// Never raises: a missing key, a storage error, and an unparsable
    /// value are all reported as `None` (the latter two with a `warn!`).
    pub fn load_snapshot(&self, player_id: &PlayerId) -> Option<PlayerProgressSnapshot> {
        match self.load_raw(SNAPSHOTS_TABLE, player_id.as_str()) {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!(player = %player_id, error = %e, "Corrupt snapshot in local store, treating as absent");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(player = %player_id, error = %e, "Failed to read snapshot from local store");
                None
            }
        }
    }

    /// Remove every row stored for an identity.
    pub fn clear(&self, player_id: &PlayerId) -> ProgressResult<()> {
        let mission_keys = self.mission_log_keys(player_id)?;
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut snapshots = write_txn.open_table(SNAPSHOTS_TABLE)?;
            let mut effects = write_txn.open_table(EFFECTS_TABLE)?;
            let mut usage = write_txn.open_table(ITEM_USAGE_TABLE)?;
            let mut log = write_txn.open_table(MISSION_LOG_TABLE)?;

            snapshots.remove(player_id.as_str())?;
            effects.remove(player_id.as_str())?;
            usage.remove(player_id.as_str())?;
            for key in &mission_keys {
                log.remove(key.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Effect Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Save the full active-effect list for a player.
    pub fn save_effects(&self, player_id: &PlayerId, effects: &[ItemEffect]) -> ProgressResult<()> {
        let data = serde_json::to_vec(effects)
            .map_err(|e| crate::error::ProgressError::Serialization(e.to_string()))?;
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(EFFECTS_TABLE)?;
            table.insert(player_id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the persisted effect list; absent or corrupt data yields an
    /// empty list.
    pub fn load_effects(&self, player_id: &PlayerId) -> Vec<ItemEffect> {
        match self.load_raw(EFFECTS_TABLE, player_id.as_str()) {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(effects) => effects,
                Err(e) => {
                    warn!(player = %player_id, error = %e, "Corrupt effect list in local store, treating as empty");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(player = %player_id, error = %e, "Failed to read effect list from local store");
                Vec::new()
            }
        }
    }

    /// Save the lifetime item-usage counter.
    pub fn save_item_usage(&self, player_id: &PlayerId, total: u64) -> ProgressResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(ITEM_USAGE_TABLE)?;
            table.insert(player_id.as_str(), total)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the lifetime item-usage counter, zero when absent.
    pub fn load_item_usage(&self, player_id: &PlayerId) -> u64 {
        let db = self.db.read();
        let result = (|| -> ProgressResult<Option<u64>> {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(ITEM_USAGE_TABLE)?;
            Ok(table.get(player_id.as_str())?.map(|v| v.value()))
        })();
        match result {
            Ok(Some(total)) => total,
            Ok(None) => 0,
            Err(e) => {
                warn!(player = %player_id, error = %e, "Failed to read item usage counter");
                0
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Mission Log Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Save a durable mission progress record.
    pub fn save_mission_record(&self, record: &MissionProgressRecord) -> ProgressResult<()> {
        let key = Self::mission_log_key(&record.player_id, &record.mission_id);
        let data = serde_json::to_vec(record)
            .map_err(|e| crate::error::ProgressError::Serialization(e.to_string()))?;
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(MISSION_LOG_TABLE)?;
            table.insert(key.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the mission log record for one (player, mission) pair.
    pub fn load_mission_record(
        &self,
        player_id: &PlayerId,
        mission_id: &MissionId,
    ) -> Option<MissionProgressRecord> {
        let key = Self::mission_log_key(player_id, mission_id);
        match self.load_raw(MISSION_LOG_TABLE, &key) {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(player = %player_id, mission = %mission_id, error = %e, "Corrupt mission log record, treating as absent");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(player = %player_id, mission = %mission_id, error = %e, "Failed to read mission log record");
                None
            }
        }
    }

    /// List all mission log records for a player.
    pub fn list_mission_records(&self, player_id: &PlayerId) -> Vec<MissionProgressRecord> {
        let prefix = format!("{}/", player_id.as_str());
        let db = self.db.read();
        let result = (|| -> ProgressResult<Vec<MissionProgressRecord>> {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(MISSION_LOG_TABLE)?;
            let mut records = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                if !key.value().starts_with(&prefix) {
                    continue;
                }
                match serde_json::from_slice(value.value()) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        warn!(key = key.value(), error = %e, "Skipping corrupt mission log record");
                    }
                }
            }
            Ok(records)
        })();
        match result {
            Ok(records) => records,
            Err(e) => {
                warn!(player = %player_id, error = %e, "Failed to list mission log records");
                Vec::new()
            }
        }
    }

    fn mission_log_key(player_id: &PlayerId, mission_id: &MissionId) -> String {
        format!("{}/{}", player_id.as_str(), mission_id.as_str())
    }

    fn mission_log_keys(&self, player_id: &PlayerId) -> ProgressResult<Vec<String>> {
        let prefix = format!("{}/", player_id.as_str());
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(MISSION_LOG_TABLE)?;
        let mut keys = Vec::new();
        for entry in table.iter()? {
            let (key, _) = entry?;
            if key.value().starts_with(&prefix) {
                keys.push(key.value().to_string());
            }
        }
        Ok(keys)
    }

    fn load_raw(
        &self,
        table_def: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> ProgressResult<Option<Vec<u8>>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(table_def)?;
        Ok(table.get(key)?.map(|v| v.value().to_vec()))
    }

    /// Write raw bytes into the snapshot table. Test hook for exercising the
    /// corrupt-value-as-absent contract.
    #[cfg(test)]
    pub(crate) fn write_raw_snapshot(&self, player_id: &PlayerId, bytes: &[u8]) -> ProgressResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(SNAPSHOTS_TABLE)?;
            table.insert(player_id.as_str(), bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::effect::{EffectCategory, EffectId};
    use tempfile::TempDir;

    fn create_test_store() -> (LocalProgressStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        let store = LocalProgressStore::new(&db_path).unwrap();
        (store, temp_dir)
    }

    fn player() -> PlayerId {
        PlayerId::from("0xdeadbeef")
    }

    #[test]
    fn test_store_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/path/progress.redb");
        let store = LocalProgressStore::new(&db_path);
        assert!(store.is_ok());
        assert!(db_path.exists());
    }

    #[test]
    fn test_save_and_load_snapshot() {
        let (store, _temp) = create_test_store();
        let snapshot = PlayerProgressSnapshot::new(player(), "Miner");

        store.save_snapshot(&snapshot).unwrap();

        let loaded = store.load_snapshot(&player()).unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_load_missing_snapshot_is_none() {
        let (store, _temp) = create_test_store();
        assert!(store.load_snapshot(&player()).is_none());
    }

    #[test]
    fn test_corrupt_snapshot_treated_as_absent() {
        let (store, _temp) = create_test_store();
        store
            .write_raw_snapshot(&player(), b"{not valid json")
            .unwrap();
        assert!(store.load_snapshot(&player()).is_none());
    }

    #[test]
    fn test_save_is_idempotent_overwrite() {
        let (store, _temp) = create_test_store();
        let mut snapshot = PlayerProgressSnapshot::new(player(), "Miner");
        store.save_snapshot(&snapshot).unwrap();

        snapshot.credits = 9000;
        store.save_snapshot(&snapshot).unwrap();
        store.save_snapshot(&snapshot).unwrap();

        let loaded = store.load_snapshot(&player()).unwrap();
        assert_eq!(loaded.credits, 9000);
    }

    #[test]
    fn test_identities_do_not_collide() {
        let (store, _temp) = create_test_store();
        let a = PlayerId::from("0xaaaa");
        let b = PlayerId::from("0xbbbb");
        let mut snap_a = PlayerProgressSnapshot::new(a.clone(), "A");
        snap_a.credits = 1;
        let mut snap_b = PlayerProgressSnapshot::new(b.clone(), "B");
        snap_b.credits = 2;

        store.save_snapshot(&snap_a).unwrap();
        store.save_snapshot(&snap_b).unwrap();

        assert_eq!(store.load_snapshot(&a).unwrap().credits, 1);
        assert_eq!(store.load_snapshot(&b).unwrap().credits, 2);
    }

    #[test]
    fn test_clear_removes_all_rows_for_identity() {
        let (store, _temp) = create_test_store();
        let snapshot = PlayerProgressSnapshot::new(player(), "Miner");
        store.save_snapshot(&snapshot).unwrap();
        store.save_item_usage(&player(), 42).unwrap();
        let record = MissionProgressRecord::started(player(), MissionId::from("m1"));
        store.save_mission_record(&record).unwrap();

        store.clear(&player()).unwrap();

        assert!(store.load_snapshot(&player()).is_none());
        assert_eq!(store.load_item_usage(&player()), 0);
        assert!(store.list_mission_records(&player()).is_empty());
    }

    #[test]
    fn test_effects_roundtrip_and_default_empty() {
        let (store, _temp) = create_test_store();
        assert!(store.load_effects(&player()).is_empty());

        let effects = vec![ItemEffect {
            id: EffectId::new(),
            category: EffectCategory::MiningEfficiency,
            multiplier: 1.10,
            duration_ms: 60_000,
            started_at: chrono::Utc::now().timestamp_millis(),
            quantity: 3,
            description: "Mining booster".to_string(),
        }];
        store.save_effects(&player(), &effects).unwrap();
        assert_eq!(store.load_effects(&player()), effects);
    }

    #[test]
    fn test_item_usage_counter() {
        let (store, _temp) = create_test_store();
        assert_eq!(store.load_item_usage(&player()), 0);
        store.save_item_usage(&player(), 7).unwrap();
        assert_eq!(store.load_item_usage(&player()), 7);
        store.save_item_usage(&player(), 12).unwrap();
        assert_eq!(store.load_item_usage(&player()), 12);
    }

    #[test]
    fn test_mission_log_roundtrip_and_listing() {
        let (store, _temp) = create_test_store();
        let r1 = MissionProgressRecord::started(player(), MissionId::from("m1"));
        let mut r2 = MissionProgressRecord::started(player(), MissionId::from("m2"));
        r2.progress = 5;
        let other = MissionProgressRecord::started(PlayerId::from("0xother"), MissionId::from("m1"));

        store.save_mission_record(&r1).unwrap();
        store.save_mission_record(&r2).unwrap();
        store.save_mission_record(&other).unwrap();

        let loaded = store
            .load_mission_record(&player(), &MissionId::from("m2"))
            .unwrap();
        assert_eq!(loaded.progress, 5);

        let listed = store.list_mission_records(&player());
        assert_eq!(listed.len(), 2);
    }

    #[test]
    fn test_snapshot_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("progress.redb");

        {
            let store = LocalProgressStore::new(&db_path).unwrap();
            let snapshot = PlayerProgressSnapshot::new(player(), "Miner");
            store.save_snapshot(&snapshot).unwrap();
        }

        {
            let store = LocalProgressStore::new(&db_path).unwrap();
            assert!(store.load_snapshot(&player()).is_some());
        }
    }
}
