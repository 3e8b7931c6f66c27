//! Audit records for privileged operations.
//!
//! Every successful admin override writes exactly one record (batch
//! operations write one record covering the whole batch). Records are
//! append-only: they are never mutated or deleted, so the audit trail is a
//! faithful history of who forced what and why.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{TurnId, WorkerId};

/// The privileged operation an audit record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    CancelTurn,
    ForceComplete,
    ReactivateTurn,
    ReturnToQueue,
    ReassignCubicle,
    ReassignWorker,
    ChangePriority,
    ReleaseHolding,
    FinishAll,
}

impl AuditAction {
    /// Stable name used in logs and serialized records.
    pub fn name(&self) -> &'static str {
        match self {
            AuditAction::CancelTurn => "cancel_turn",
            AuditAction::ForceComplete => "force_complete",
            AuditAction::ReactivateTurn => "reactivate_turn",
            AuditAction::ReturnToQueue => "return_to_queue",
            AuditAction::ReassignCubicle => "reassign_cubicle",
            AuditAction::ReassignWorker => "reassign_worker",
            AuditAction::ChangePriority => "change_priority",
            AuditAction::ReleaseHolding => "release_holding",
            AuditAction::FinishAll => "finish_all",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One append-only audit entry.
///
/// `old_value`/`new_value` are full JSON snapshots of the affected turn
/// before and after the mutation. For [`AuditAction::FinishAll`] they are
/// arrays covering every turn in the batch and `entity_id` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Who performed the operation.
    pub actor_id: WorkerId,

    pub action: AuditAction,

    /// The affected turn; `None` for batch operations.
    pub entity_id: Option<TurnId>,

    /// Snapshot of the turn(s) before the mutation.
    pub old_value: serde_json::Value,

    /// Snapshot of the turn(s) after the mutation.
    pub new_value: serde_json::Value,

    /// The operator's justification, where one was required or given.
    pub reason: Option<String>,

    pub timestamp: DateTime<Utc>,

    /// Network address the request originated from, when the adapter knows it.
    pub source_address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn action_serializes_snake_case() {
        let json = serde_json::to_string(&AuditAction::ForceComplete).unwrap();
        assert_eq!(json, "\"force_complete\"");
    }

    #[test]
    fn record_serde_roundtrip() {
        let record = AuditRecord {
            actor_id: WorkerId(3),
            action: AuditAction::CancelTurn,
            entity_id: Some(TurnId(9)),
            old_value: serde_json::json!({"status": "pending"}),
            new_value: serde_json::json!({"status": "cancelled"}),
            reason: Some("patient left the building".to_string()),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            source_address: Some("10.0.0.4".to_string()),
        };
        let json = serde_json::to_string(&record).unwrap();
        let parsed: AuditRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, parsed);
    }
}
