//! Error taxonomy for the reservation core.

use thiserror::Error;

use crate::models::{EquipmentId, ReservationId, StatusKind};

/// Failure reported by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The backend could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The backend was reached but rejected or failed the operation.
    #[error("Database error: {0}")]
    Database(String),
}

/// Errors returned by the reservation store, scheduler and workflow.
///
/// Domain-rule violations are recoverable and meant for user-facing messaging;
/// `Storage` and `Connection` are collaborator failures passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReservationError {
    #[error("Reservation {0} not found")]
    NotFound(ReservationId),

    #[error("Equipment {0} not found")]
    EquipmentNotFound(EquipmentId),

    #[error("Reservation {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: ReservationId,
        from: StatusKind,
        to: StatusKind,
    },

    #[error("Equipment {0} is not available")]
    EquipmentUnavailable(EquipmentId),

    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("Reservation {0} has no pending expiration")]
    NotScheduled(ReservationId),

    #[error("Reservation {0} has already expired")]
    AlreadyExpired(ReservationId),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl ReservationError {
    /// Whether the error is a collaborator failure rather than a domain-rule violation.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            ReservationError::Storage(_) | ReservationError::Connection(_)
        )
    }
}

impl From<StorageError> for ReservationError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Connection(msg) => ReservationError::Connection(msg),
            StorageError::Database(msg) => ReservationError::Storage(msg),
        }
    }
}

impl From<validator::ValidationError> for ReservationError {
    fn from(err: validator::ValidationError) -> Self {
        let message = err
            .message
            .map(|m| m.to_string())
            .unwrap_or_else(|| err.code.to_string());
        ReservationError::Validation(message)
    }
}
