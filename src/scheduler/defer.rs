//! Deferral: returning an in-progress turn to the queue at a penalty
//! position.
//!
//! When a draw cannot be completed (patient stepped out, missing order),
//! the turn goes back to Pending inside its own priority class, five slots
//! behind the front. This is a penalty, not a punishment: the patient is
//! neither instantly re-served nor lost to the back of the queue.
//!
//! The penalty position is expressed as a timestamp, `deferred_at`, which
//! becomes the turn's effective queue time. Placement rules:
//! - 5 or more Pending turns in the class: just after the 5th one's
//!   effective time (re-enters ahead of turns 6+).
//! - 1 to 4: just after the last one (tail of the group).
//! - none: just after the turn's own `created_at`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument};

use crate::error::{CoreError, Result};
use crate::store::{Patch, TurnCondition, TurnPatch, TurnStore};
use crate::types::{Turn, TurnId, TurnStatus};

/// How many turns of the same class a deferred turn re-enters behind.
pub const DEFER_PENALTY_SLOTS: usize = 5;

/// Nudge that places a deferred turn "just after" its anchor.
fn just_after(anchor: DateTime<Utc>) -> DateTime<Utc> {
    anchor + Duration::milliseconds(1)
}

/// Moves in-progress turns back into their priority group at a computed
/// penalty position.
#[derive(Clone)]
pub struct DeferralEngine {
    turns: Arc<dyn TurnStore>,
}

impl DeferralEngine {
    pub fn new(turns: Arc<dyn TurnStore>) -> Self {
        DeferralEngine { turns }
    }

    /// Defers an InProgress turn. Fails with `InvalidStateTransition` for
    /// any other status.
    ///
    /// The position is computed from a read of the pending group, then
    /// written with a conditional update that re-checks the turn is still
    /// InProgress, so a concurrent admin transition can cost us the defer
    /// but never corrupt state.
    #[instrument(skip(self), fields(turn = %turn_id))]
    pub fn defer_turn(&self, turn_id: TurnId) -> Result<Turn> {
        let turn = self
            .turns
            .get(turn_id)?
            .ok_or(CoreError::TurnNotFound(turn_id))?;
        if turn.status != TurnStatus::InProgress {
            return Err(CoreError::invalid_transition(
                "defer_turn",
                turn_id,
                turn.status,
            ));
        }

        let group = self.turns.find_pending_in_class(turn.priority_class)?;
        let anchor = if group.len() >= DEFER_PENALTY_SLOTS {
            group[DEFER_PENALTY_SLOTS - 1].effective_queue_time()
        } else if let Some(last) = group.last() {
            last.effective_queue_time()
        } else {
            turn.created_at
        };
        let deferred_at = just_after(anchor);

        let patch = TurnPatch {
            status: Patch::Set(TurnStatus::Pending),
            is_deferred: Patch::Set(true),
            deferred_at: Patch::Set(Some(deferred_at)),
            holding_by: Patch::Set(None),
            holding_at: Patch::Set(None),
            attended_by: Patch::Set(None),
            attended_at: Patch::Set(None),
            cubicle_id: Patch::Set(None),
            is_called: Patch::Set(false),
            ..TurnPatch::default()
        };
        if !self.turns.update_if(
            turn_id,
            &TurnCondition::status_is(TurnStatus::InProgress),
            &patch,
        )? {
            return Err(CoreError::ConcurrencyConflict(turn_id));
        }

        info!(
            class = %turn.priority_class,
            group = group.len(),
            %deferred_at,
            "turn deferred"
        );
        Ok(patch.applied(&turn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordering::candidate_order;
    use crate::store::MemoryStore;
    use crate::types::{PriorityClass, WorkerId};
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn harness() -> (Arc<MemoryStore>, DeferralEngine) {
        let store = Arc::new(MemoryStore::new());
        let engine = DeferralEngine::new(store.clone());
        (store, engine)
    }

    /// An InProgress turn of the given class, created at `created`.
    fn in_progress(store: &MemoryStore, class: PriorityClass, created: i64) -> Turn {
        let turn = store.create_turn(class, ts(created)).unwrap();
        store
            .update_if(
                turn.id,
                &TurnCondition::claimable(),
                &TurnPatch {
                    status: Patch::Set(TurnStatus::InProgress),
                    attended_by: Patch::Set(Some(WorkerId(1))),
                    attended_at: Patch::Set(Some(ts(created + 10))),
                    ..TurnPatch::default()
                },
            )
            .unwrap();
        store.get(turn.id).unwrap().unwrap()
    }

    #[test]
    fn reenters_five_slots_back_in_a_long_group() {
        let (store, engine) = harness();
        // T1..T7 pending, spaced one second apart.
        let pending: Vec<Turn> = (1..=7)
            .map(|i| {
                store
                    .create_turn(PriorityClass::Special, ts(i * 1_000))
                    .unwrap()
            })
            .collect();
        let x = in_progress(&store, PriorityClass::Special, 0);

        let deferred = engine.defer_turn(x.id).unwrap();
        assert_eq!(deferred.status, TurnStatus::Pending);
        assert!(deferred.is_deferred);

        // Resulting order: T1..T5, X, T6, T7.
        let mut all = store.find_pending_in_class(PriorityClass::Special).unwrap();
        all.sort_by(candidate_order);
        let ids: Vec<TurnId> = all.iter().map(|t| t.id).collect();
        let expected: Vec<TurnId> = pending[..5]
            .iter()
            .map(|t| t.id)
            .chain([x.id])
            .chain(pending[5..].iter().map(|t| t.id))
            .collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn short_group_lands_at_the_tail() {
        let (store, engine) = harness();
        let pending: Vec<Turn> = (1..=3)
            .map(|i| {
                store
                    .create_turn(PriorityClass::General, ts(i * 1_000))
                    .unwrap()
            })
            .collect();
        let x = in_progress(&store, PriorityClass::General, 0);

        let deferred = engine.defer_turn(x.id).unwrap();

        let mut all = store.find_pending_in_class(PriorityClass::General).unwrap();
        all.sort_by(candidate_order);
        assert_eq!(all.last().unwrap().id, x.id);
        assert!(
            deferred.deferred_at.unwrap()
                > pending.last().unwrap().effective_queue_time()
        );
    }

    #[test]
    fn empty_group_defers_just_after_creation() {
        let (store, engine) = harness();
        let x = in_progress(&store, PriorityClass::General, 500);

        let deferred = engine.defer_turn(x.id).unwrap();
        assert_eq!(
            deferred.deferred_at.unwrap(),
            ts(500) + Duration::milliseconds(1)
        );
    }

    #[test]
    fn other_class_does_not_influence_position() {
        let (store, engine) = harness();
        // A crowd of Special turns must not push a General defer back.
        for i in 1..=6 {
            store
                .create_turn(PriorityClass::Special, ts(i * 1_000))
                .unwrap();
        }
        let x = in_progress(&store, PriorityClass::General, 500);

        let deferred = engine.defer_turn(x.id).unwrap();
        assert_eq!(
            deferred.deferred_at.unwrap(),
            ts(500) + Duration::milliseconds(1)
        );
    }

    #[test]
    fn clears_service_state() {
        let (store, engine) = harness();
        let x = in_progress(&store, PriorityClass::General, 0);

        let deferred = engine.defer_turn(x.id).unwrap();
        assert!(deferred.holding_by.is_none());
        assert!(deferred.attended_by.is_none());
        assert!(deferred.attended_at.is_none());
        assert!(deferred.cubicle_id.is_none());
        assert!(!deferred.is_called);
    }

    #[test]
    fn only_in_progress_turns_can_defer() {
        let (store, engine) = harness();
        let pending = store.create_turn(PriorityClass::General, ts(0)).unwrap();

        let err = engine.defer_turn(pending.id).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidStateTransition {
                operation: "defer_turn",
                ..
            }
        ));

        let stored = store.get(pending.id).unwrap().unwrap();
        assert_eq!(stored, pending);
    }

    #[test]
    fn unknown_turn_is_not_found() {
        let (_store, engine) = harness();
        assert!(matches!(
            engine.defer_turn(TurnId(42)).unwrap_err(),
            CoreError::TurnNotFound(TurnId(42))
        ));
    }

    #[test]
    fn second_defer_anchors_on_the_current_group() {
        let (store, engine) = harness();
        let x = in_progress(&store, PriorityClass::General, 0);
        let first = engine.defer_turn(x.id).unwrap();

        // The queue has grown since; a second defer lands behind the new
        // tail, not at the original penalty position.
        store.create_turn(PriorityClass::General, ts(5_000)).unwrap();
        store
            .update_if(
                first.id,
                &TurnCondition::status_is(TurnStatus::Pending),
                &TurnPatch {
                    status: Patch::Set(TurnStatus::InProgress),
                    ..TurnPatch::default()
                },
            )
            .unwrap();

        let second = engine.defer_turn(x.id).unwrap();
        assert_eq!(
            second.deferred_at.unwrap(),
            ts(5_000) + Duration::milliseconds(1)
        );
        assert!(second.deferred_at.unwrap() > first.deferred_at.unwrap());
    }
}
