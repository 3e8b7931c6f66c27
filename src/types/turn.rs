//! The turn record and its status/priority enums.
//!
//! A turn is one sample-collection ticket. It cycles
//! Pending → (holding) → InProgress → Attended | Cancelled, with a deferred
//! loop returning InProgress → Pending at a penalty position.
//!
//! INVARIANTS:
//! - `holding_by`/`holding_at` are set only while `status = Pending`.
//! - `attended_by`/`cubicle_id` are set only while the turn is being served;
//!   attendance timestamps survive into terminal states as history.
//! - At most one turn is held by, or in progress for, a given worker at a
//!   time. The scheduler enforces this, not the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CubicleId, SequenceNumber, TurnId, WorkerId};

/// The lifecycle state of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Waiting in the queue, possibly held by a worker.
    Pending,

    /// A worker is currently drawing the patient's samples.
    InProgress,

    /// Finished successfully. Terminal (except admin reactivation).
    Attended,

    /// Cancelled by an operator. Terminal.
    Cancelled,
}

impl TurnStatus {
    /// Returns the status name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            TurnStatus::Pending => "pending",
            TurnStatus::InProgress => "in_progress",
            TurnStatus::Attended => "attended",
            TurnStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true for the two terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnStatus::Attended | TurnStatus::Cancelled)
    }
}

impl std::fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Priority class of a turn. Special is always served before General.
///
/// There is deliberately no aging: sustained Special-class load starves
/// General turns. See DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    /// Pregnant patients, disabilities, urgent orders.
    Special,
    /// Everyone else.
    General,
}

impl PriorityClass {
    /// Sort rank: lower is served first.
    pub fn rank(&self) -> u8 {
        match self {
            PriorityClass::Special => 0,
            PriorityClass::General => 1,
        }
    }

    /// The other class, for priority toggling.
    pub fn toggled(&self) -> PriorityClass {
        match self {
            PriorityClass::Special => PriorityClass::General,
            PriorityClass::General => PriorityClass::Special,
        }
    }
}

impl std::fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriorityClass::Special => f.write_str("special"),
            PriorityClass::General => f.write_str("general"),
        }
    }
}

/// One sample-collection ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Stable identity.
    pub id: TurnId,

    /// Display ticket number shown to patients.
    pub sequence_number: SequenceNumber,

    pub status: TurnStatus,

    pub priority_class: PriorityClass,

    /// The worker holding a short-lived reservation on this turn, if any.
    /// Only meaningful while `status = Pending`.
    pub holding_by: Option<WorkerId>,

    /// When the current holding was taken. Paired with `holding_by`.
    pub holding_at: Option<DateTime<Utc>>,

    /// The worker serving (or who served) this turn.
    pub attended_by: Option<WorkerId>,

    /// When attendance started.
    pub attended_at: Option<DateTime<Utc>>,

    /// When the turn reached Attended.
    pub finished_at: Option<DateTime<Utc>>,

    /// The cubicle the patient is being served in. Only while in progress.
    pub cubicle_id: Option<CubicleId>,

    /// Whether the turn has been announced on the call screen.
    pub is_called: bool,

    /// How many times the turn has been announced.
    pub call_count: u32,

    /// Whether the turn re-entered the queue via a defer.
    pub is_deferred: bool,

    /// Penalty timestamp assigned on defer. When present it, not
    /// `created_at`, is the effective queue time.
    pub deferred_at: Option<DateTime<Utc>>,

    /// Intake time. Immutable.
    pub created_at: DateTime<Utc>,
}

impl Turn {
    /// Creates a fresh Pending turn as the intake boundary would.
    pub fn new(
        id: TurnId,
        sequence_number: SequenceNumber,
        priority_class: PriorityClass,
        created_at: DateTime<Utc>,
    ) -> Self {
        Turn {
            id,
            sequence_number,
            status: TurnStatus::Pending,
            priority_class,
            holding_by: None,
            holding_at: None,
            attended_by: None,
            attended_at: None,
            finished_at: None,
            cubicle_id: None,
            is_called: false,
            call_count: 0,
            is_deferred: false,
            deferred_at: None,
            created_at,
        }
    }

    /// The timestamp that determines FIFO position within a priority class:
    /// `deferred_at` when present, else `created_at`.
    pub fn effective_queue_time(&self) -> DateTime<Utc> {
        self.deferred_at.unwrap_or(self.created_at)
    }

    /// True if some worker currently holds a reservation on this turn.
    pub fn is_held(&self) -> bool {
        self.holding_by.is_some()
    }

    /// True if this turn can be claimed right now: Pending and unheld.
    pub fn is_claimable(&self) -> bool {
        self.status == TurnStatus::Pending && self.holding_by.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn effective_queue_time_prefers_deferred_at() {
        let mut turn = Turn::new(
            TurnId(1),
            SequenceNumber(1),
            PriorityClass::General,
            ts(100),
        );
        assert_eq!(turn.effective_queue_time(), ts(100));

        turn.is_deferred = true;
        turn.deferred_at = Some(ts(500));
        assert_eq!(turn.effective_queue_time(), ts(500));
    }

    #[test]
    fn fresh_turn_is_claimable() {
        let turn = Turn::new(
            TurnId(1),
            SequenceNumber(1),
            PriorityClass::Special,
            ts(0),
        );
        assert!(turn.is_claimable());
        assert!(!turn.is_held());
    }

    #[test]
    fn held_turn_is_not_claimable() {
        let mut turn = Turn::new(
            TurnId(1),
            SequenceNumber(1),
            PriorityClass::General,
            ts(0),
        );
        turn.holding_by = Some(WorkerId(7));
        turn.holding_at = Some(ts(1));
        assert!(!turn.is_claimable());
        assert!(turn.is_held());
    }

    #[test]
    fn terminal_statuses() {
        assert!(TurnStatus::Attended.is_terminal());
        assert!(TurnStatus::Cancelled.is_terminal());
        assert!(!TurnStatus::Pending.is_terminal());
        assert!(!TurnStatus::InProgress.is_terminal());
    }

    #[test]
    fn special_ranks_before_general() {
        assert!(PriorityClass::Special.rank() < PriorityClass::General.rank());
    }

    #[test]
    fn toggled_flips_both_ways() {
        assert_eq!(PriorityClass::Special.toggled(), PriorityClass::General);
        assert_eq!(PriorityClass::General.toggled(), PriorityClass::Special);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TurnStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
