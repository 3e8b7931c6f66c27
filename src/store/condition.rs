//! Conditions and patches as data.
//!
//! Every mutation in the core is a compare-and-swap: "apply this patch if
//! the record still looks like this". Expressing both sides as plain data
//! (rather than closures) keeps them loggable and portable: a SQL-backed
//! store can translate a [`TurnCondition`] into a WHERE clause and a
//! [`TurnPatch`] into a SET list, while the in-memory reference store
//! evaluates them directly under one lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CubicleId, PriorityClass, Turn, TurnStatus, WorkerId};

/// What a condition expects of the holding fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldingExpectation {
    /// `holding_by` must be empty.
    Unheld,
    /// `holding_by` must be exactly this worker.
    HeldBy(WorkerId),
    /// `holding_by` must be set, holder irrelevant.
    HeldByAnyone,
}

/// The expected prior state for a conditional write.
///
/// Every populated field must match for the write to apply; an empty
/// condition matches unconditionally (used only by intake-style writes that
/// have no precondition).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnCondition {
    /// Status must be exactly this.
    pub status: Option<TurnStatus>,

    /// Status must be none of these. Used for the admin "not yet finished"
    /// preconditions.
    pub status_not: Vec<TurnStatus>,

    /// Expectation on the holding fields.
    pub holding: Option<HoldingExpectation>,

    /// `holding_at` must be exactly this. The reaper uses it so a holding
    /// re-taken between its read and its write is never released.
    pub held_since: Option<DateTime<Utc>>,

    /// `attended_by` must be exactly this worker.
    pub attended_by: Option<WorkerId>,

    /// `call_count` must be exactly this. Pins read-modify-write updates
    /// of the announcement counter so concurrent calls cannot both write
    /// the same incremented value.
    pub call_count: Option<u32>,
}

impl TurnCondition {
    /// Pending and unheld: the claim precondition.
    pub fn claimable() -> Self {
        TurnCondition {
            status: Some(TurnStatus::Pending),
            holding: Some(HoldingExpectation::Unheld),
            ..TurnCondition::default()
        }
    }

    /// Pending and held by exactly this worker.
    pub fn held_by(worker: WorkerId) -> Self {
        TurnCondition {
            status: Some(TurnStatus::Pending),
            holding: Some(HoldingExpectation::HeldBy(worker)),
            ..TurnCondition::default()
        }
    }

    /// Status equals `status`, nothing else checked.
    pub fn status_is(status: TurnStatus) -> Self {
        TurnCondition {
            status: Some(status),
            ..TurnCondition::default()
        }
    }

    /// Status is neither Attended nor Cancelled.
    pub fn not_finished() -> Self {
        TurnCondition {
            status_not: vec![TurnStatus::Attended, TurnStatus::Cancelled],
            ..TurnCondition::default()
        }
    }

    /// Evaluates the condition against a turn.
    pub fn matches(&self, turn: &Turn) -> bool {
        if let Some(status) = self.status {
            if turn.status != status {
                return false;
            }
        }
        if self.status_not.contains(&turn.status) {
            return false;
        }
        match self.holding {
            Some(HoldingExpectation::Unheld) if turn.holding_by.is_some() => return false,
            Some(HoldingExpectation::HeldBy(w)) if turn.holding_by != Some(w) => return false,
            Some(HoldingExpectation::HeldByAnyone) if turn.holding_by.is_none() => return false,
            _ => {}
        }
        if let Some(at) = self.held_since {
            if turn.holding_at != Some(at) {
                return false;
            }
        }
        if let Some(worker) = self.attended_by {
            if turn.attended_by != Some(worker) {
                return false;
            }
        }
        if let Some(count) = self.call_count {
            if turn.call_count != count {
                return false;
            }
        }
        true
    }
}

/// A single-field update: leave the field alone, or set it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Patch<T> {
    #[default]
    Keep,
    Set(T),
}

impl<T: Clone> Patch<T> {
    fn apply(&self, slot: &mut T) {
        if let Patch::Set(value) = self {
            *slot = value.clone();
        }
    }
}

/// The fields a conditional write may change.
///
/// `created_at`, `id` and `sequence_number` are deliberately absent: they
/// are immutable for the life of a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnPatch {
    pub status: Patch<TurnStatus>,
    pub priority_class: Patch<PriorityClass>,
    pub holding_by: Patch<Option<WorkerId>>,
    pub holding_at: Patch<Option<DateTime<Utc>>>,
    pub attended_by: Patch<Option<WorkerId>>,
    pub attended_at: Patch<Option<DateTime<Utc>>>,
    pub finished_at: Patch<Option<DateTime<Utc>>>,
    pub cubicle_id: Patch<Option<CubicleId>>,
    pub is_called: Patch<bool>,
    pub call_count: Patch<u32>,
    pub is_deferred: Patch<bool>,
    pub deferred_at: Patch<Option<DateTime<Utc>>>,
}

impl TurnPatch {
    /// Takes a holding for `worker` at `now`.
    pub fn hold(worker: WorkerId, now: DateTime<Utc>) -> Self {
        TurnPatch {
            holding_by: Patch::Set(Some(worker)),
            holding_at: Patch::Set(Some(now)),
            ..TurnPatch::default()
        }
    }

    /// Clears both holding fields, leaving everything else untouched.
    pub fn release_holding() -> Self {
        TurnPatch {
            holding_by: Patch::Set(None),
            holding_at: Patch::Set(None),
            ..TurnPatch::default()
        }
    }

    /// Applies every populated field to the turn.
    pub fn apply_to(&self, turn: &mut Turn) {
        self.status.apply(&mut turn.status);
        self.priority_class.apply(&mut turn.priority_class);
        self.holding_by.apply(&mut turn.holding_by);
        self.holding_at.apply(&mut turn.holding_at);
        self.attended_by.apply(&mut turn.attended_by);
        self.attended_at.apply(&mut turn.attended_at);
        self.finished_at.apply(&mut turn.finished_at);
        self.cubicle_id.apply(&mut turn.cubicle_id);
        self.is_called.apply(&mut turn.is_called);
        self.call_count.apply(&mut turn.call_count);
        self.is_deferred.apply(&mut turn.is_deferred);
        self.deferred_at.apply(&mut turn.deferred_at);
    }

    /// Returns the turn as it would look after this patch.
    pub fn applied(&self, turn: &Turn) -> Turn {
        let mut next = turn.clone();
        self.apply_to(&mut next);
        next
    }
}
