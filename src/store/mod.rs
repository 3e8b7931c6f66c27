//! Persistence contract consumed by every component.
//!
//! The core never issues an unconditional write to a turn: every field it
//! touches is also touched by the reaper and by admin overrides, so all
//! mutation goes through [`TurnStore::update_if`], a single atomic
//! compare-and-swap (the SQL shape is "UPDATE ... WHERE id = ? AND
//! <condition>"). Concurrent callers cannot both succeed against the same
//! precondition; a failed condition returns `false` and the caller retries
//! or reports "nothing available".
//!
//! [`MemoryStore`] is the reference implementation used by tests and the
//! bundled binary. Production deployments implement these traits over a
//! transactional store.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{
    AuditRecord, Cubicle, CubicleId, PriorityClass, Turn, TurnId, WorkerId, WorkerSession,
};

pub mod condition;
pub mod memory;

pub use condition::{HoldingExpectation, Patch, TurnCondition, TurnPatch};
pub use memory::MemoryStore;

/// Errors from the persistence layer.
///
/// The reference store is infallible in practice; real backends surface
/// connection and transaction failures through [`StoreError::Backend`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Inserting a record whose id already exists.
    #[error("duplicate id: {0}")]
    DuplicateId(TurnId),

    /// Backend failure (connection lost, transaction aborted, ...).
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Reads and conditional writes over turn records.
///
/// Query methods return turns ordered by the scheduler's candidate order
/// (priority class rank, then effective queue time) where they return more
/// than one; callers rely on that.
pub trait TurnStore: Send + Sync {
    fn get(&self, id: TurnId) -> Result<Option<Turn>>;

    /// Inserts a freshly-created turn. The intake boundary's only write.
    fn insert(&self, turn: Turn) -> Result<()>;

    /// Pending, unheld turns, optionally restricted to one priority class,
    /// in candidate order.
    fn find_eligible(&self, priority: Option<PriorityClass>) -> Result<Vec<Turn>>;

    /// The Pending turn currently held by this worker, if any.
    fn find_held_by(&self, worker: WorkerId) -> Result<Option<Turn>>;

    /// The InProgress turn this worker is attending, if any.
    fn find_attended_by(&self, worker: WorkerId) -> Result<Option<Turn>>;

    /// Pending turns whose holding was taken strictly before `cutoff`.
    fn find_expired_holdings(&self, cutoff: DateTime<Utc>) -> Result<Vec<Turn>>;

    /// All Pending turns of one class (held or not), ordered by effective
    /// queue time. Drives the defer position computation.
    fn find_pending_in_class(&self, class: PriorityClass) -> Result<Vec<Turn>>;

    /// Every turn still in a non-terminal status, in candidate order.
    fn find_unfinished(&self) -> Result<Vec<Turn>>;

    /// Atomic conditional write. Applies `patch` iff `condition` still
    /// matches the stored record; returns whether it did. Never partially
    /// applies.
    fn update_if(&self, id: TurnId, condition: &TurnCondition, patch: &TurnPatch)
        -> Result<bool>;
}

/// Session and cubicle state.
pub trait SessionStore: Send + Sync {
    fn get_session(&self, worker: WorkerId) -> Result<Option<WorkerSession>>;

    /// Creates or replaces a session record.
    fn upsert_session(&self, session: WorkerSession) -> Result<()>;

    /// Sessions that currently have a cubicle selected.
    fn sessions_with_cubicle(&self) -> Result<Vec<WorkerSession>>;

    /// Clears `selected_cubicle_id` iff it still equals `expected`.
    /// The session analogue of [`TurnStore::update_if`].
    fn clear_cubicle_if(&self, worker: WorkerId, expected: CubicleId) -> Result<bool>;

    fn get_cubicle(&self, id: CubicleId) -> Result<Option<Cubicle>>;

    fn upsert_cubicle(&self, cubicle: Cubicle) -> Result<()>;
}

/// Append-only audit trail.
pub trait AuditSink: Send + Sync {
    fn append(&self, record: AuditRecord) -> Result<()>;
}
