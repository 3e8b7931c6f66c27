//! Skip cycles: passing over a held turn without losing it for others.
//!
//! A worker who cannot serve the patient they hold (stepped away, missing
//! paperwork) releases the holding, remembers the turn in a per-worker skip
//! set and claims the next candidate outside that set. The skipped turn
//! stays Pending and visible to every other worker the whole time.
//!
//! When the skip set covers every eligible turn the cycle is complete: the
//! set is cleared in place, `cycle_completed` is reported, and selection
//! restarts from the full pool, so the first skipped turn can resurface.

use std::collections::HashSet;

use tracing::{debug, info, instrument};

use crate::error::{CoreError, Result};
use crate::store::{TurnCondition, TurnPatch};
use crate::types::{Turn, TurnId, WorkerId};

use super::HoldingScheduler;

/// Result of one skip request.
#[derive(Debug, Clone)]
pub struct SkipOutcome {
    /// The replacement holding, if any turn was claimable.
    pub turn: Option<Turn>,

    /// True when the skip set covered every eligible turn and was cleared.
    pub cycle_completed: bool,
}

/// Lets a worker pass on its held turn and receive a different one.
#[derive(Clone)]
pub struct SkipCoordinator {
    scheduler: HoldingScheduler,
}

impl SkipCoordinator {
    pub fn new(scheduler: HoldingScheduler) -> Self {
        SkipCoordinator { scheduler }
    }

    /// Releases `current`'s holding, adds it to the caller's skip set and
    /// claims the next candidate outside the set. On cycle completion the
    /// set is cleared in place before reselecting from the full pool.
    #[instrument(skip(self, skipped), fields(worker = %worker, current = %current))]
    pub fn skip_holding(
        &self,
        worker: WorkerId,
        current: TurnId,
        skipped: &mut HashSet<TurnId>,
    ) -> Result<SkipOutcome> {
        self.scheduler.reaper().release_expired_holdings()?;

        if self.scheduler.turns.get(current)?.is_none() {
            return Err(CoreError::TurnNotFound(current));
        }

        // Release without marking attended; tolerate the holding having
        // already lapsed (the reaper or a release may have beaten us).
        self.scheduler.turns.update_if(
            current,
            &TurnCondition::held_by(worker),
            &TurnPatch::release_holding(),
        )?;
        skipped.insert(current);

        if let Some(turn) = self.scheduler.claim_excluding(worker, skipped)? {
            debug!(next = %turn.id, "skipped to next turn");
            return Ok(SkipOutcome {
                turn: Some(turn),
                cycle_completed: false,
            });
        }

        // Every eligible turn has been tried once: start a fresh cycle.
        info!(skipped = skipped.len(), "skip cycle completed");
        skipped.clear();
        let turn = self.scheduler.claim_excluding(worker, skipped)?;
        Ok(SkipOutcome {
            turn,
            cycle_completed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::store::{MemoryStore, TurnStore};
    use crate::types::PriorityClass;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn harness(turn_count: i64) -> (Arc<MemoryStore>, SkipCoordinator, HoldingScheduler) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_000_000, 0).unwrap()));
        for i in 0..turn_count {
            store
                .create_turn(
                    PriorityClass::General,
                    clock.now() - Duration::minutes(turn_count - i),
                )
                .unwrap();
        }
        let scheduler = HoldingScheduler::new(store.clone(), store.clone(), clock);
        (store, SkipCoordinator::new(scheduler.clone()), scheduler)
    }

    #[test]
    fn skip_moves_to_the_next_candidate() {
        let (store, skip, scheduler) = harness(3);
        let first = scheduler.assign_next_holding(WorkerId(1)).unwrap().unwrap();

        let mut skipped = HashSet::new();
        let outcome = skip
            .skip_holding(WorkerId(1), first.id, &mut skipped)
            .unwrap();

        assert!(!outcome.cycle_completed);
        let next = outcome.turn.unwrap();
        assert_ne!(next.id, first.id);
        assert_eq!(next.holding_by, Some(WorkerId(1)));

        // The skipped turn is back in the pool, unheld.
        let released = store.get(first.id).unwrap().unwrap();
        assert!(released.is_claimable());
    }

    #[test]
    fn skipped_turn_remains_visible_to_other_workers() {
        let (_store, skip, scheduler) = harness(2);
        let first = scheduler.assign_next_holding(WorkerId(1)).unwrap().unwrap();

        let mut skipped = HashSet::new();
        skip.skip_holding(WorkerId(1), first.id, &mut skipped)
            .unwrap();

        let other = scheduler.assign_next_holding(WorkerId(2)).unwrap().unwrap();
        assert_eq!(other.id, first.id);
    }

    #[test]
    fn never_repeats_within_one_cycle_and_signals_completion() {
        let (_store, skip, scheduler) = harness(4);
        let mut skipped = HashSet::new();
        let mut seen = Vec::new();

        let mut current = scheduler.assign_next_holding(WorkerId(1)).unwrap().unwrap();
        seen.push(current.id);

        // Skip through the remaining three; none may repeat.
        for _ in 0..3 {
            let outcome = skip
                .skip_holding(WorkerId(1), current.id, &mut skipped)
                .unwrap();
            assert!(!outcome.cycle_completed);
            current = outcome.turn.unwrap();
            assert!(!seen.contains(&current.id), "turn repeated within a cycle");
            seen.push(current.id);
        }

        // The fourth skip exhausts the pool: cycle completes and the first
        // skipped turn resurfaces.
        let outcome = skip
            .skip_holding(WorkerId(1), current.id, &mut skipped)
            .unwrap();
        assert!(outcome.cycle_completed);
        assert!(skipped.is_empty());
        assert_eq!(outcome.turn.unwrap().id, seen[0]);
    }

    #[test]
    fn single_turn_cycle_returns_the_same_turn() {
        let (_store, skip, scheduler) = harness(1);
        let only = scheduler.assign_next_holding(WorkerId(1)).unwrap().unwrap();

        let mut skipped = HashSet::new();
        let outcome = skip
            .skip_holding(WorkerId(1), only.id, &mut skipped)
            .unwrap();

        assert!(outcome.cycle_completed);
        assert_eq!(outcome.turn.unwrap().id, only.id);
    }

    #[test]
    fn unknown_turn_is_rejected() {
        let (_store, skip, _scheduler) = harness(1);
        let mut skipped = HashSet::new();
        let err = skip
            .skip_holding(WorkerId(1), TurnId(999), &mut skipped)
            .unwrap_err();
        assert!(matches!(err, CoreError::TurnNotFound(TurnId(999))));
    }
}
