//! The holding scheduler: claims, lookups, releases and the turn lifecycle.
//!
//! `assign_next_holding` is the heart of the system: it selects the best
//! eligible turn (Special before General, FIFO by effective queue time
//! within the class) and claims it with a single conditional write, so two
//! workers racing for the same turn cannot both win. A lost race reselects
//! a bounded number of times and then reports "nothing available" rather
//! than erroring: the queue state that caused the loss is already stale.
//!
//! Repeated calls are idempotent: a worker who already holds a turn gets
//! that turn back unchanged, which removes any need for a caller-side
//! "already assigned" flag.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::reaper::ExpirationReaper;
use crate::store::{Patch, SessionStore, TurnCondition, TurnPatch, TurnStore};
use crate::types::{CubicleId, Turn, TurnId, TurnStatus, WorkerId};

pub mod defer;
pub mod skip;

pub use defer::DeferralEngine;
pub use skip::{SkipCoordinator, SkipOutcome};

/// Bound on reselection after a lost claim race.
///
/// No backoff: a lost compare-and-swap means another worker took that turn,
/// so the next candidate is tried immediately.
#[derive(Debug, Clone, Copy)]
pub struct ClaimRetry {
    pub max_reselects: u32,
}

impl ClaimRetry {
    pub const DEFAULT: Self = Self { max_reselects: 3 };
}

impl Default for ClaimRetry {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Selects and atomically claims turns for requesting workers, and drives
/// the normal (non-privileged) turn lifecycle.
#[derive(Clone)]
pub struct HoldingScheduler {
    turns: Arc<dyn TurnStore>,
    sessions: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    reaper: ExpirationReaper,
    retry: ClaimRetry,
}

impl HoldingScheduler {
    pub fn new(
        turns: Arc<dyn TurnStore>,
        sessions: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let reaper = ExpirationReaper::new(turns.clone(), sessions.clone(), clock.clone());
        HoldingScheduler {
            turns,
            sessions,
            clock,
            reaper,
            retry: ClaimRetry::DEFAULT,
        }
    }

    pub fn with_retry(mut self, retry: ClaimRetry) -> Self {
        self.retry = retry;
        self
    }

    /// The reaper this scheduler runs before freshness-sensitive reads.
    pub fn reaper(&self) -> &ExpirationReaper {
        &self.reaper
    }

    /// Assigns the next eligible turn to `worker`, or returns the turn the
    /// worker already holds. Returns `None` when the worker is attending a
    /// patient (a worker in a cubicle must not also hold a reservation) or
    /// when no eligible turn remains.
    #[instrument(skip(self), fields(worker = %worker))]
    pub fn assign_next_holding(&self, worker: WorkerId) -> Result<Option<Turn>> {
        self.reaper.release_expired_holdings()?;

        if let Some(held) = self.turns.find_held_by(worker)? {
            debug!(turn = %held.id, "worker already holds a turn");
            return Ok(Some(held));
        }
        if self.turns.find_attended_by(worker)?.is_some() {
            debug!("worker is attending; no holding assigned");
            return Ok(None);
        }

        self.claim_excluding(worker, &HashSet::new())
    }

    /// Selects the best claimable turn outside `excluded` and claims it,
    /// reselecting up to the retry bound when a concurrent claimer wins.
    pub(crate) fn claim_excluding(
        &self,
        worker: WorkerId,
        excluded: &HashSet<TurnId>,
    ) -> Result<Option<Turn>> {
        for attempt in 0..=self.retry.max_reselects {
            let candidates = self.turns.find_eligible(None)?;
            let Some(candidate) = candidates.into_iter().find(|t| !excluded.contains(&t.id))
            else {
                return Ok(None);
            };

            let patch = TurnPatch::hold(worker, self.clock.now());
            if self
                .turns
                .update_if(candidate.id, &TurnCondition::claimable(), &patch)?
            {
                info!(turn = %candidate.id, "holding assigned");
                return Ok(Some(patch.applied(&candidate)));
            }
            debug!(attempt, turn = %candidate.id, "lost claim race, reselecting");
        }

        warn!("claim retries exhausted; reporting nothing available");
        Ok(None)
    }

    /// The turn `worker` currently holds, after a freshness sweep.
    #[instrument(skip(self), fields(worker = %worker))]
    pub fn get_user_holding_turn(&self, worker: WorkerId) -> Result<Option<Turn>> {
        self.reaper.release_expired_holdings()?;
        Ok(self.turns.find_held_by(worker)?)
    }

    /// Releases every holding `worker` has. Used on logout and tab-hidden.
    /// Returns how many were released.
    #[instrument(skip(self), fields(worker = %worker))]
    pub fn release_user_holdings(&self, worker: WorkerId) -> Result<usize> {
        let mut released = 0;
        while let Some(held) = self.turns.find_held_by(worker)? {
            if self.turns.update_if(
                held.id,
                &TurnCondition::held_by(worker),
                &TurnPatch::release_holding(),
            )? {
                released += 1;
            }
            // A failed condition means someone else already moved the turn;
            // the next lookup reflects it.
        }
        if released > 0 {
            info!(released, "released worker holdings");
        }
        Ok(released)
    }

    /// Records one announcement of a Pending turn on the call screen.
    #[instrument(skip(self), fields(turn = %turn_id))]
    pub fn register_call(&self, turn_id: TurnId) -> Result<Turn> {
        let turn = self
            .turns
            .get(turn_id)?
            .ok_or(CoreError::TurnNotFound(turn_id))?;
        if turn.status != TurnStatus::Pending {
            return Err(CoreError::invalid_transition(
                "register_call",
                turn_id,
                turn.status,
            ));
        }

        let patch = TurnPatch {
            is_called: Patch::Set(true),
            call_count: Patch::Set(turn.call_count + 1),
            ..TurnPatch::default()
        };
        // Pin the count we read: a concurrent call that already bumped it
        // fails this condition instead of overwriting its increment.
        let condition = TurnCondition {
            call_count: Some(turn.call_count),
            ..TurnCondition::status_is(TurnStatus::Pending)
        };
        if !self.turns.update_if(turn_id, &condition, &patch)? {
            return Err(CoreError::ConcurrencyConflict(turn_id));
        }
        Ok(patch.applied(&turn))
    }

    /// Transitions a held turn to InProgress in `cubicle` for `worker`:
    /// the holding is consumed and attendance begins.
    #[instrument(skip(self), fields(worker = %worker, turn = %turn_id, cubicle = %cubicle))]
    pub fn start_attending(
        &self,
        worker: WorkerId,
        turn_id: TurnId,
        cubicle: CubicleId,
    ) -> Result<Turn> {
        let turn = self
            .turns
            .get(turn_id)?
            .ok_or(CoreError::TurnNotFound(turn_id))?;
        if turn.status != TurnStatus::Pending {
            return Err(CoreError::invalid_transition(
                "start_attending",
                turn_id,
                turn.status,
            ));
        }
        if turn.holding_by != Some(worker) {
            return Err(CoreError::Validation(format!(
                "{turn_id} is not held by {worker}"
            )));
        }
        let box_record = self
            .sessions
            .get_cubicle(cubicle)?
            .ok_or(CoreError::CubicleNotFound(cubicle))?;
        if !box_record.is_active {
            return Err(CoreError::Validation(format!("{cubicle} is inactive")));
        }
        if self.turns.find_attended_by(worker)?.is_some() {
            return Err(CoreError::Validation(format!(
                "{worker} is already attending a turn"
            )));
        }

        let patch = TurnPatch {
            status: Patch::Set(TurnStatus::InProgress),
            holding_by: Patch::Set(None),
            holding_at: Patch::Set(None),
            attended_by: Patch::Set(Some(worker)),
            attended_at: Patch::Set(Some(self.clock.now())),
            cubicle_id: Patch::Set(Some(cubicle)),
            ..TurnPatch::default()
        };
        if !self
            .turns
            .update_if(turn_id, &TurnCondition::held_by(worker), &patch)?
        {
            return Err(CoreError::ConcurrencyConflict(turn_id));
        }
        info!("attendance started");
        Ok(patch.applied(&turn))
    }

    /// Normal completion: the attending worker finishes an InProgress turn.
    #[instrument(skip(self), fields(worker = %worker, turn = %turn_id))]
    pub fn finish_turn(&self, worker: WorkerId, turn_id: TurnId) -> Result<Turn> {
        let turn = self
            .turns
            .get(turn_id)?
            .ok_or(CoreError::TurnNotFound(turn_id))?;
        if turn.status != TurnStatus::InProgress {
            return Err(CoreError::invalid_transition(
                "finish_turn",
                turn_id,
                turn.status,
            ));
        }
        if turn.attended_by != Some(worker) {
            return Err(CoreError::Validation(format!(
                "{turn_id} is not attended by {worker}"
            )));
        }

        let condition = TurnCondition {
            attended_by: Some(worker),
            ..TurnCondition::status_is(TurnStatus::InProgress)
        };
        let patch = TurnPatch {
            status: Patch::Set(TurnStatus::Attended),
            finished_at: Patch::Set(Some(self.clock.now())),
            cubicle_id: Patch::Set(None),
            ..TurnPatch::default()
        };
        if !self.turns.update_if(turn_id, &condition, &patch)? {
            return Err(CoreError::ConcurrencyConflict(turn_id));
        }
        info!("turn finished");
        Ok(patch.applied(&turn))
    }
}
