//! Starforge Progress Engine Core Library
//!
//! Local-first synchronization of player progress with missions and
//! tiered item effects.
//!
//! ## Overview
//!
//! A player's progress lives in three uncoordinated authorities: the
//! in-memory session, a local persistent cache, and a remote authoritative
//! ledger. This crate keeps them consistent: gameplay works fully offline
//! against the local cache, and a reconciliation protocol with explicit
//! per-field merge policies folds local and remote state together without
//! regressing progress on either side.
//!
//! ## Core Principles
//!
//! - **Local-first**: every mutation lands in the local store immediately;
//!   the remote ledger is updated opportunistically through an outbox
//! - **Explicit merges**: reconciliation is a named policy per field, with
//!   divergences reported as advisory conflicts
//! - **Restart-safe timers**: item effects are rows with absolute expiry
//!   timestamps; timers are rebuilt from them, never persisted
//!
//! ## Quick Start
//!
//! ```ignore
//! use starforge_core::{CreditingIssuer, InMemoryLedger, ProgressEngine};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = ProgressEngine::new(
//!         "~/.starforge/data",
//!         Arc::new(InMemoryLedger::new()),
//!         Arc::new(CreditingIssuer),
//!     )?;
//!
//!     let snapshot = engine.connect(&"0xabc".into(), "Miner").await?;
//!     println!("level {} with {} credits", snapshot.level, snapshot.credits);
//!
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod effects;
pub mod engine;
pub mod error;
pub mod missions;
pub mod remote;
pub mod reward;
pub mod storage;
pub mod sync;
pub mod types;

// Re-exports
pub use catalog::{CatalogEntry, MissionCatalog};
pub use effects::ItemEffectEngine;
pub use engine::{EngineConfig, ProgressEngine};
pub use error::{ProgressError, ProgressResult};
pub use missions::{CompletionOutcome, MissionEngine};
pub use remote::{InMemoryLedger, RemoteError, RemoteLedger};
pub use reward::{CreditingIssuer, RewardIssuer, RewardSummary};
pub use storage::LocalProgressStore;
pub use sync::{
    ConflictRecord, MergePolicy, OutboxConfig, ProgressEvent, SyncCoordinator, SyncOutcome,
    SyncStatus,
};
pub use types::effect::{multiplier_for_usage, EffectCategory, EffectId, ItemEffect};
pub use types::mission::{
    MissionId, MissionKind, MissionProgressRecord, MissionRecord, MissionStatus, ProgressRule,
    ResourceGrant, RewardDescriptor, UnlockRequirements,
};
pub use types::{
    EventKind, GameEvent, InventoryEntry, PlayerId, PlayerProgressSnapshot, Position,
    STARTING_CREDITS,
};
