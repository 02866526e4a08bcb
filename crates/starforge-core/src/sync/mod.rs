//! Local-first synchronization layer.
//!
//! ## Overview
//!
//! Three authorities hold a player's progress: the in-memory session, the
//! local store, and the remote ledger. This module keeps them consistent:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncCoordinator (reconciliation + failure boundary)            │
//! │  ├── merge: field-by-field policy merge, conflict reporting     │
//! │  ├── single-flight guard per identity                           │
//! │  └── derived SyncStatus / needs_sync                            │
//! │                                                                 │
//! │  Outbox (pending remote writes)                                 │
//! │  ├── coalesces per identity, latest snapshot wins               │
//! │  ├── debounced initial publishes                                │
//! │  └── worker with exponential backoff retry                      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Local mutations are synchronous and immediately visible; remote
//! mutations are eventually consistent, delivered at-least-once as
//! idempotent overwrites, and never reordered per identity because of the
//! single-flight guard.

pub mod coordinator;
pub mod events;
pub mod merge;
pub mod outbox;

pub use coordinator::{SyncCoordinator, SyncOutcome};
pub use events::{ProgressEvent, SyncStatus};
pub use merge::{merge_snapshots, ConflictRecord, MergeOutcome, MergePolicy, FIELD_POLICIES};
pub use outbox::{Outbox, OutboxConfig};
