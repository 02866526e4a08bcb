//! Error types for the Starforge progress engine

use thiserror::Error;

use crate::types::mission::{MissionId, MissionStatus};

/// Main error type for progress engine operations
#[derive(Error, Debug)]
pub enum ProgressError {
    /// No player session is connected
    #[error("No player connected")]
    NotConnected,

    /// Mission id does not exist in the catalog
    #[error("Unknown mission: {0}")]
    MissionNotFound(MissionId),

    /// Mission cannot make the requested transition from its current status
    #[error("Mission {id} is {status}, expected {expected}")]
    InvalidTransition {
        id: MissionId,
        status: MissionStatus,
        expected: MissionStatus,
    },

    /// Another mission is already active for this player
    #[error("Mission {active} is already active")]
    MissionAlreadyActive { active: MissionId },

    /// The operation requires an active mission and none is
    #[error("No mission is active")]
    NoActiveMission,

    /// Resetting a completed mission is not allowed
    #[error("Mission {0} is completed and cannot be reset")]
    MissionCompleted(MissionId),

    /// Item quantity must be at least one
    #[error("Invalid item quantity: {0}")]
    InvalidQuantity(u32),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using ProgressError
pub type ProgressResult<T> = Result<T, ProgressError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProgressError::MissionNotFound(MissionId::from("mine-first-ore"));
        assert_eq!(format!("{}", err), "Unknown mission: mine-first-ore");
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = ProgressError::InvalidTransition {
            id: MissionId::from("craft-basic-tools"),
            status: MissionStatus::Locked,
            expected: MissionStatus::Available,
        };
        assert_eq!(
            format!("{}", err),
            "Mission craft-basic-tools is locked, expected available"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ProgressError = io_err.into();
        assert!(matches!(err, ProgressError::Io(_)));
    }
}
