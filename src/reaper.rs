//! Timeout reclamation sweeps.
//!
//! Abandoned holdings (worker closed the tab, crashed, walked away) and
//! stale cubicle reservations are reclaimed by idempotent sweeps invoked at
//! the start of every holding-assignment or holding-lookup operation.
//! Freshness is pulled, not pushed: there is no background timer, so the
//! core is portable between request-per-call and long-running designs.
//!
//! Both sweeps are safe to invoke repeatedly and concurrently: each release
//! is a conditional write pinned to the exact reservation that was observed
//! expired, so a reservation re-taken mid-sweep is never clobbered. A sweep
//! that finds nothing expired performs zero writes.

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::error::Result;
use crate::store::{SessionStore, TurnCondition, TurnPatch, TurnStore};

/// How long a holding reservation survives without being acted on.
pub const HOLDING_TTL_MINUTES: i64 = 5;

/// How long a session may sit idle before its cubicle is reclaimed.
pub const SESSION_IDLE_MINUTES: i64 = 20;

/// Counts from one cubicle sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CubicleCleanup {
    /// Reservations released because the session passed its hard expiry.
    pub expired_count: usize,
    /// Reservations released because the worker went idle.
    pub inactive_count: usize,
}

/// Stateless reclamation sweeps over turns and sessions.
#[derive(Clone)]
pub struct ExpirationReaper {
    turns: Arc<dyn TurnStore>,
    sessions: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
}

impl ExpirationReaper {
    pub fn new(
        turns: Arc<dyn TurnStore>,
        sessions: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        ExpirationReaper {
            turns,
            sessions,
            clock,
        }
    }

    /// Releases every holding older than [`HOLDING_TTL_MINUTES`]. Returns
    /// how many were released by this call (a concurrent sweep may win some
    /// of the races; those are not counted here).
    pub fn release_expired_holdings(&self) -> Result<usize> {
        let cutoff = self.clock.now() - Duration::minutes(HOLDING_TTL_MINUTES);
        let expired = self.turns.find_expired_holdings(cutoff)?;

        let mut released = 0;
        for turn in expired {
            let Some(holder) = turn.holding_by else {
                continue;
            };
            // Pin the release to the exact holding we observed. If the
            // holder changed or the holding was re-taken since the read,
            // the condition fails and we leave the fresh reservation alone.
            let condition = TurnCondition {
                held_since: turn.holding_at,
                ..TurnCondition::held_by(holder)
            };
            if self
                .turns
                .update_if(turn.id, &condition, &TurnPatch::release_holding())?
            {
                debug!(turn = %turn.id, holder = %holder, "released expired holding");
                released += 1;
            }
        }
        Ok(released)
    }

    /// Releases cubicle reservations belonging to expired or idle sessions.
    pub fn release_expired_cubicles(&self) -> Result<CubicleCleanup> {
        let now = self.clock.now();
        let idle_cutoff = now - Duration::minutes(SESSION_IDLE_MINUTES);

        let mut cleanup = CubicleCleanup::default();
        for session in self.sessions.sessions_with_cubicle()? {
            let Some(cubicle) = session.selected_cubicle_id else {
                continue;
            };
            let expired = session.is_expired(now);
            let idle = session.last_activity < idle_cutoff;
            if !expired && !idle {
                continue;
            }
            if self
                .sessions
                .clear_cubicle_if(session.worker_id, cubicle)?
            {
                debug!(
                    worker = %session.worker_id,
                    cubicle = %cubicle,
                    expired,
                    "released cubicle reservation"
                );
                if expired {
                    cleanup.expired_count += 1;
                } else {
                    cleanup.inactive_count += 1;
                }
            }
        }
        Ok(cleanup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use crate::types::{CubicleId, PriorityClass, TurnStatus, WorkerId, WorkerSession};
    use chrono::{TimeZone, Utc};

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, ExpirationReaper) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(100_000, 0).unwrap()));
        let reaper = ExpirationReaper::new(store.clone(), store.clone(), clock.clone());
        (store, clock, reaper)
    }

    fn hold(store: &MemoryStore, clock: &ManualClock, worker: WorkerId) -> crate::types::Turn {
        let turn = store
            .create_turn(PriorityClass::General, clock.now())
            .unwrap();
        store
            .update_if(
                turn.id,
                &TurnCondition::claimable(),
                &TurnPatch::hold(worker, clock.now()),
            )
            .unwrap();
        store.get(turn.id).unwrap().unwrap()
    }

    #[test]
    fn holding_survives_within_ttl() {
        let (store, clock, reaper) = setup();
        let turn = hold(&store, &clock, WorkerId(1));

        clock.advance(Duration::minutes(4));
        assert_eq!(reaper.release_expired_holdings().unwrap(), 0);
        assert!(store.get(turn.id).unwrap().unwrap().is_held());
    }

    #[test]
    fn holding_released_after_ttl() {
        let (store, clock, reaper) = setup();
        let turn = hold(&store, &clock, WorkerId(1));

        clock.advance(Duration::minutes(6));
        assert_eq!(reaper.release_expired_holdings().unwrap(), 1);

        let reaped = store.get(turn.id).unwrap().unwrap();
        assert!(!reaped.is_held());
        assert_eq!(reaped.status, TurnStatus::Pending);
    }

    #[test]
    fn sweep_is_idempotent_and_noop_sweep_writes_nothing() {
        let (store, clock, reaper) = setup();
        hold(&store, &clock, WorkerId(1));

        clock.advance(Duration::minutes(6));
        assert_eq!(reaper.release_expired_holdings().unwrap(), 1);

        let writes_after_first = store.turn_write_count();
        assert_eq!(reaper.release_expired_holdings().unwrap(), 0);
        assert_eq!(store.turn_write_count(), writes_after_first);
    }

    #[test]
    fn retaken_holding_is_not_clobbered() {
        let (store, clock, reaper) = setup();
        let turn = hold(&store, &clock, WorkerId(1));

        clock.advance(Duration::minutes(6));
        // Another path releases and re-holds the turn between the sweep's
        // read and its write; simulate by re-holding with a fresh timestamp.
        store
            .update_if(
                turn.id,
                &TurnCondition::held_by(WorkerId(1)),
                &TurnPatch::release_holding(),
            )
            .unwrap();
        store
            .update_if(
                turn.id,
                &TurnCondition::claimable(),
                &TurnPatch::hold(WorkerId(2), clock.now()),
            )
            .unwrap();

        assert_eq!(reaper.release_expired_holdings().unwrap(), 0);
        let fresh = store.get(turn.id).unwrap().unwrap();
        assert_eq!(fresh.holding_by, Some(WorkerId(2)));
    }

    #[test]
    fn idle_and_expired_cubicles_are_counted_separately() {
        let (store, clock, reaper) = setup();
        let now = clock.now();

        // Idle session: active long ago, expiry far in the future.
        let mut idle = WorkerSession::new(
            WorkerId(1),
            now - Duration::minutes(30),
            now + Duration::hours(8),
        );
        idle.selected_cubicle_id = Some(CubicleId(1));
        store.upsert_session(idle).unwrap();

        // Expired session: recently active but past its hard expiry.
        let mut expired =
            WorkerSession::new(WorkerId(2), now, now - Duration::minutes(1));
        expired.selected_cubicle_id = Some(CubicleId(2));
        store.upsert_session(expired).unwrap();

        // Live session: untouched.
        let mut live = WorkerSession::new(WorkerId(3), now, now + Duration::hours(8));
        live.selected_cubicle_id = Some(CubicleId(3));
        store.upsert_session(live).unwrap();

        let cleanup = reaper.release_expired_cubicles().unwrap();
        assert_eq!(cleanup.expired_count, 1);
        assert_eq!(cleanup.inactive_count, 1);

        assert!(store
            .get_session(WorkerId(3))
            .unwrap()
            .unwrap()
            .selected_cubicle_id
            .is_some());

        // Second sweep finds nothing.
        let again = reaper.release_expired_cubicles().unwrap();
        assert_eq!(again, CubicleCleanup::default());
    }
}
