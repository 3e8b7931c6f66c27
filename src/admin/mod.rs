//! Privileged override operations.
//!
//! A fixed menu of role-gated transitions that bypass the normal flow:
//! cancel, force-complete, reactivate, return-to-queue, reassign, change
//! priority, release a holding, and a bulk end-of-day finish. Each
//! operation validates the turn's current status against a precondition,
//! applies its mutation as one conditional write, and appends exactly one
//! audit record with full before/after snapshots (batch operations append
//! one record covering the whole batch).
//!
//! Operations that destroy in-flight work require a justification of at
//! least [`MIN_REASON_LEN`] characters and fail validation without any
//! mutation when it is missing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::store::{AuditSink, Patch, SessionStore, TurnCondition, TurnPatch, TurnStore};
use crate::types::{
    AuditAction, AuditRecord, CubicleId, PriorityClass, Turn, TurnId, TurnStatus, WorkerId,
};

/// Minimum trimmed length of a justification for destructive overrides.
pub const MIN_REASON_LEN: usize = 5;

/// Caller roles known to the core. Authentication happens elsewhere; the
/// adapter passes the authenticated role through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Staff,
    Admin,
}

/// The authenticated caller of an override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: WorkerId,
    pub role: Role,
    /// Network address the request came from, for the audit trail.
    pub source_address: Option<String>,
}

impl Actor {
    pub fn admin(id: WorkerId) -> Self {
        Actor {
            id,
            role: Role::Admin,
            source_address: None,
        }
    }
}

/// A successful single-turn override: the updated turn and its audit entry.
#[derive(Debug, Clone)]
pub struct OverrideOutcome {
    pub turn: Turn,
    pub record: AuditRecord,
}

/// A successful bulk finish: every turn moved to Attended and the single
/// audit entry covering them.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub finished: Vec<Turn>,
    pub record: AuditRecord,
}

/// Role-gated, reason-justified state overrides with an audit trail.
#[derive(Clone)]
pub struct AdminOverrideController {
    turns: Arc<dyn TurnStore>,
    sessions: Arc<dyn SessionStore>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl AdminOverrideController {
    pub fn new(
        turns: Arc<dyn TurnStore>,
        sessions: Arc<dyn SessionStore>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        AdminOverrideController {
            turns,
            sessions,
            audit,
            clock,
        }
    }

    /// Cancels a not-yet-finished turn, dropping any holding, attendance
    /// and cubicle assignment.
    #[instrument(skip(self, actor, reason), fields(actor = %actor.id, turn = %turn_id))]
    pub fn cancel_turn(
        &self,
        actor: &Actor,
        turn_id: TurnId,
        reason: &str,
    ) -> Result<OverrideOutcome> {
        require_admin(actor)?;
        let reason = require_reason(reason)?;
        let before = self.load(turn_id)?;
        if before.status.is_terminal() {
            return Err(CoreError::invalid_transition(
                "cancel_turn",
                turn_id,
                before.status,
            ));
        }

        let patch = TurnPatch {
            status: Patch::Set(TurnStatus::Cancelled),
            holding_by: Patch::Set(None),
            holding_at: Patch::Set(None),
            attended_by: Patch::Set(None),
            attended_at: Patch::Set(None),
            cubicle_id: Patch::Set(None),
            ..TurnPatch::default()
        };
        self.apply_one(
            actor,
            AuditAction::CancelTurn,
            &before,
            &TurnCondition::not_finished(),
            &patch,
            Some(reason),
        )
    }

    /// Forces a not-yet-finished turn straight to Attended.
    #[instrument(skip(self, actor, reason), fields(actor = %actor.id, turn = %turn_id))]
    pub fn force_complete(
        &self,
        actor: &Actor,
        turn_id: TurnId,
        reason: &str,
    ) -> Result<OverrideOutcome> {
        require_admin(actor)?;
        let reason = require_reason(reason)?;
        let before = self.load(turn_id)?;
        if before.status.is_terminal() {
            return Err(CoreError::invalid_transition(
                "force_complete",
                turn_id,
                before.status,
            ));
        }

        let patch = TurnPatch {
            status: Patch::Set(TurnStatus::Attended),
            holding_by: Patch::Set(None),
            holding_at: Patch::Set(None),
            cubicle_id: Patch::Set(None),
            finished_at: Patch::Set(Some(self.clock.now())),
            ..TurnPatch::default()
        };
        self.apply_one(
            actor,
            AuditAction::ForceComplete,
            &before,
            &TurnCondition::not_finished(),
            &patch,
            Some(reason),
        )
    }

    /// Returns an Attended turn finished earlier today to the queue with a
    /// full reset of holding, attendance and call state.
    #[instrument(skip(self, actor, reason), fields(actor = %actor.id, turn = %turn_id))]
    pub fn reactivate_turn(
        &self,
        actor: &Actor,
        turn_id: TurnId,
        reason: &str,
    ) -> Result<OverrideOutcome> {
        require_admin(actor)?;
        let reason = require_reason(reason)?;
        let before = self.load(turn_id)?;
        if before.status != TurnStatus::Attended {
            return Err(CoreError::invalid_transition(
                "reactivate_turn",
                turn_id,
                before.status,
            ));
        }
        let today = self.clock.now().date_naive();
        let finished_today = before
            .finished_at
            .is_some_and(|at| at.date_naive() == today);
        if !finished_today {
            return Err(CoreError::Validation(format!(
                "{turn_id} was not finished today; reactivation window has passed"
            )));
        }

        let patch = TurnPatch {
            status: Patch::Set(TurnStatus::Pending),
            holding_by: Patch::Set(None),
            holding_at: Patch::Set(None),
            attended_by: Patch::Set(None),
            attended_at: Patch::Set(None),
            finished_at: Patch::Set(None),
            cubicle_id: Patch::Set(None),
            is_called: Patch::Set(false),
            call_count: Patch::Set(0),
            ..TurnPatch::default()
        };
        self.apply_one(
            actor,
            AuditAction::ReactivateTurn,
            &before,
            &TurnCondition::status_is(TurnStatus::Attended),
            &patch,
            Some(reason),
        )
    }

    /// Puts an InProgress turn back in the queue, clearing attendance,
    /// cubicle and call state but keeping its queue position.
    #[instrument(skip(self, actor, reason), fields(actor = %actor.id, turn = %turn_id))]
    pub fn return_to_queue(
        &self,
        actor: &Actor,
        turn_id: TurnId,
        reason: &str,
    ) -> Result<OverrideOutcome> {
        require_admin(actor)?;
        let reason = require_reason(reason)?;
        let before = self.load(turn_id)?;
        if before.status != TurnStatus::InProgress {
            return Err(CoreError::invalid_transition(
                "return_to_queue",
                turn_id,
                before.status,
            ));
        }

        let patch = TurnPatch {
            status: Patch::Set(TurnStatus::Pending),
            attended_by: Patch::Set(None),
            attended_at: Patch::Set(None),
            cubicle_id: Patch::Set(None),
            is_called: Patch::Set(false),
            ..TurnPatch::default()
        };
        self.apply_one(
            actor,
            AuditAction::ReturnToQueue,
            &before,
            &TurnCondition::status_is(TurnStatus::InProgress),
            &patch,
            Some(reason),
        )
    }

    /// Moves an InProgress turn to a different active cubicle.
    #[instrument(skip(self, actor, reason), fields(actor = %actor.id, turn = %turn_id))]
    pub fn reassign_cubicle(
        &self,
        actor: &Actor,
        turn_id: TurnId,
        cubicle: CubicleId,
        reason: Option<&str>,
    ) -> Result<OverrideOutcome> {
        require_admin(actor)?;
        let before = self.load(turn_id)?;
        if before.status != TurnStatus::InProgress {
            return Err(CoreError::invalid_transition(
                "reassign_cubicle",
                turn_id,
                before.status,
            ));
        }
        let target = self
            .sessions
            .get_cubicle(cubicle)?
            .ok_or(CoreError::CubicleNotFound(cubicle))?;
        if !target.is_active {
            return Err(CoreError::Validation(format!("{cubicle} is inactive")));
        }

        let patch = TurnPatch {
            cubicle_id: Patch::Set(Some(cubicle)),
            ..TurnPatch::default()
        };
        self.apply_one(
            actor,
            AuditAction::ReassignCubicle,
            &before,
            &TurnCondition::status_is(TurnStatus::InProgress),
            &patch,
            reason.map(str::to_owned),
        )
    }

    /// Hands an InProgress turn to a different worker who is not already
    /// attending one.
    #[instrument(skip(self, actor, reason), fields(actor = %actor.id, turn = %turn_id))]
    pub fn reassign_worker(
        &self,
        actor: &Actor,
        turn_id: TurnId,
        worker: WorkerId,
        reason: Option<&str>,
    ) -> Result<OverrideOutcome> {
        require_admin(actor)?;
        let before = self.load(turn_id)?;
        if before.status != TurnStatus::InProgress {
            return Err(CoreError::invalid_transition(
                "reassign_worker",
                turn_id,
                before.status,
            ));
        }
        if before.attended_by == Some(worker) {
            return Err(CoreError::Validation(format!(
                "{turn_id} is already attended by {worker}"
            )));
        }
        if self.turns.find_attended_by(worker)?.is_some() {
            return Err(CoreError::Validation(format!(
                "{worker} is already attending a turn"
            )));
        }

        let patch = TurnPatch {
            attended_by: Patch::Set(Some(worker)),
            ..TurnPatch::default()
        };
        self.apply_one(
            actor,
            AuditAction::ReassignWorker,
            &before,
            &TurnCondition::status_is(TurnStatus::InProgress),
            &patch,
            reason.map(str::to_owned),
        )
    }

    /// Toggles a live turn between Special and General.
    #[instrument(skip(self, actor, reason), fields(actor = %actor.id, turn = %turn_id))]
    pub fn change_priority(
        &self,
        actor: &Actor,
        turn_id: TurnId,
        class: PriorityClass,
        reason: Option<&str>,
    ) -> Result<OverrideOutcome> {
        require_admin(actor)?;
        let before = self.load(turn_id)?;
        if before.status.is_terminal() {
            return Err(CoreError::invalid_transition(
                "change_priority",
                turn_id,
                before.status,
            ));
        }
        if before.priority_class == class {
            return Err(CoreError::Validation(format!(
                "{turn_id} is already {class}"
            )));
        }

        let patch = TurnPatch {
            priority_class: Patch::Set(class),
            ..TurnPatch::default()
        };
        self.apply_one(
            actor,
            AuditAction::ChangePriority,
            &before,
            &TurnCondition::not_finished(),
            &patch,
            reason.map(str::to_owned),
        )
    }

    /// Strips a holding from whichever worker has it.
    #[instrument(skip(self, actor, reason), fields(actor = %actor.id, turn = %turn_id))]
    pub fn release_holding(
        &self,
        actor: &Actor,
        turn_id: TurnId,
        reason: Option<&str>,
    ) -> Result<OverrideOutcome> {
        require_admin(actor)?;
        let before = self.load(turn_id)?;
        let Some(holder) = before.holding_by else {
            return Err(CoreError::Validation(format!("{turn_id} is not held")));
        };

        self.apply_one(
            actor,
            AuditAction::ReleaseHolding,
            &before,
            &TurnCondition::held_by(holder),
            &TurnPatch::release_holding(),
            reason.map(str::to_owned),
        )
    }

    /// End-of-day sweep: every Pending or InProgress turn becomes Attended.
    /// One audit record covers the whole batch.
    #[instrument(skip(self, actor, reason), fields(actor = %actor.id))]
    pub fn finish_all(&self, actor: &Actor, reason: &str) -> Result<BatchOutcome> {
        require_admin(actor)?;
        let reason = require_reason(reason)?;
        let unfinished = self.turns.find_unfinished()?;
        if unfinished.is_empty() {
            return Err(CoreError::Validation(
                "no pending or in-progress turns to finish".to_string(),
            ));
        }

        let now = self.clock.now();
        let patch = TurnPatch {
            status: Patch::Set(TurnStatus::Attended),
            holding_by: Patch::Set(None),
            holding_at: Patch::Set(None),
            cubicle_id: Patch::Set(None),
            finished_at: Patch::Set(Some(now)),
            ..TurnPatch::default()
        };

        let mut befores = Vec::new();
        let mut finished = Vec::new();
        for turn in unfinished {
            // A turn that raced to a terminal state between the read and
            // this write simply drops out of the batch.
            if self
                .turns
                .update_if(turn.id, &TurnCondition::not_finished(), &patch)?
            {
                finished.push(patch.applied(&turn));
                befores.push(turn);
            }
        }
        if finished.is_empty() {
            return Err(CoreError::Validation(
                "no pending or in-progress turns to finish".to_string(),
            ));
        }

        let record = AuditRecord {
            actor_id: actor.id,
            action: AuditAction::FinishAll,
            entity_id: None,
            old_value: serde_json::to_value(&befores)?,
            new_value: serde_json::to_value(&finished)?,
            reason: Some(reason),
            timestamp: now,
            source_address: actor.source_address.clone(),
        };
        self.audit.append(record.clone())?;
        info!(count = finished.len(), "finish-all applied");
        Ok(BatchOutcome { finished, record })
    }

    fn load(&self, turn_id: TurnId) -> Result<Turn> {
        self.turns
            .get(turn_id)?
            .ok_or(CoreError::TurnNotFound(turn_id))
    }

    /// Applies one validated override: conditional write, then exactly one
    /// audit record with before/after snapshots.
    fn apply_one(
        &self,
        actor: &Actor,
        action: AuditAction,
        before: &Turn,
        condition: &TurnCondition,
        patch: &TurnPatch,
        reason: Option<String>,
    ) -> Result<OverrideOutcome> {
        if !self.turns.update_if(before.id, condition, patch)? {
            return Err(CoreError::ConcurrencyConflict(before.id));
        }
        let after = patch.applied(before);

        let record = AuditRecord {
            actor_id: actor.id,
            action,
            entity_id: Some(before.id),
            old_value: serde_json::to_value(before)?,
            new_value: serde_json::to_value(&after)?,
            reason,
            timestamp: self.clock.now(),
            source_address: actor.source_address.clone(),
        };
        self.audit.append(record.clone())?;
        info!(action = %action, turn = %before.id, "override applied");
        Ok(OverrideOutcome { turn: after, record })
    }
}

fn require_admin(actor: &Actor) -> Result<()> {
    if actor.role != Role::Admin {
        return Err(CoreError::Forbidden("admin role required"));
    }
    Ok(())
}

fn require_reason(reason: &str) -> Result<String> {
    let trimmed = reason.trim();
    if trimmed.len() < MIN_REASON_LEN {
        return Err(CoreError::Validation(format!(
            "justification must be at least {MIN_REASON_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}
