//! Error taxonomy for the scheduler core.
//!
//! Errors are discriminated results, not control flow: a conditional write
//! that matched nothing is a [`CoreError::ConcurrencyConflict`] the caller
//! may retry or report as "already claimed"; a precondition failure is an
//! [`CoreError::InvalidStateTransition`] carrying the status that forbade
//! the operation. Unexpected persistence failures propagate as
//! [`CoreError::Store`] without partial state change.

use thiserror::Error;

use crate::store::StoreError;
use crate::types::{CubicleId, TurnId, TurnStatus, WorkerId};

/// Errors surfaced to callers of the scheduler core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Unknown turn id.
    #[error("turn not found: {0}")]
    TurnNotFound(TurnId),

    /// Unknown cubicle id.
    #[error("cubicle not found: {0}")]
    CubicleNotFound(CubicleId),

    /// No session exists for the worker.
    #[error("no session for {0}")]
    SessionNotFound(WorkerId),

    /// The turn's current status forbids the requested operation.
    #[error("{operation} is not valid for {turn} in status {status}")]
    InvalidStateTransition {
        operation: &'static str,
        turn: TurnId,
        status: TurnStatus,
    },

    /// Malformed input: missing or too-short reason, bad target, etc.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A conditional write affected zero rows: someone else got there first.
    #[error("conditional update on {0} lost to a concurrent writer")]
    ConcurrencyConflict(TurnId),

    /// The caller lacks the required role.
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    /// Unexpected persistence failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Snapshot serialization failure while building an audit record.
    #[error("snapshot serialization error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl CoreError {
    /// Convenience constructor for status precondition failures.
    pub fn invalid_transition(
        operation: &'static str,
        turn: TurnId,
        status: TurnStatus,
    ) -> Self {
        CoreError::InvalidStateTransition {
            operation,
            turn,
            status,
        }
    }

    /// True for errors the caller may resolve by simply retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::ConcurrencyConflict(_))
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
