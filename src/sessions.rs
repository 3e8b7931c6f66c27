//! Worker session activity and cubicle selection.
//!
//! Sessions are the producer side of the inactivity reaper: every call a
//! worker makes refreshes `last_activity` through [`SessionService::touch_session`],
//! and a session that stops being touched loses its cubicle reservation
//! after twenty minutes (see `crate::reaper`). Cubicle selection is
//! first-come: a cubicle held by another live session cannot be taken, but
//! a reservation whose session has gone stale is reclaimed on the spot.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, instrument};

use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::reaper::SESSION_IDLE_MINUTES;
use crate::store::SessionStore;
use crate::types::{CubicleId, WorkerId, WorkerSession};

/// Hard session lifetime, renewed on every touch. One shift.
pub const SESSION_LIFETIME_HOURS: i64 = 8;

/// Session refresh and cubicle reservation.
#[derive(Clone)]
pub struct SessionService {
    sessions: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
}

impl SessionService {
    pub fn new(sessions: Arc<dyn SessionStore>, clock: Arc<dyn Clock>) -> Self {
        SessionService { sessions, clock }
    }

    /// Marks the worker active now, creating the session if it does not
    /// exist and renewing the hard expiry either way.
    #[instrument(skip(self), fields(worker = %worker))]
    pub fn touch_session(&self, worker: WorkerId) -> Result<WorkerSession> {
        let now = self.clock.now();
        let expires_at = now + Duration::hours(SESSION_LIFETIME_HOURS);

        let mut session = match self.sessions.get_session(worker)? {
            // A session past its hard expiry starts over: its cubicle
            // reservation does not survive into the new session.
            Some(existing) if !existing.is_expired(now) => existing,
            _ => WorkerSession::new(worker, now, expires_at),
        };
        session.last_activity = now;
        session.expires_at = expires_at;
        self.sessions.upsert_session(session.clone())?;
        Ok(session)
    }

    /// Reserves a cubicle for the worker, replacing any previous selection.
    ///
    /// Fails with a validation error if the cubicle is missing or inactive,
    /// and with a concurrency conflict if another live session already has
    /// it. A reservation belonging to a stale session is reclaimed rather
    /// than honoured.
    #[instrument(skip(self), fields(worker = %worker, cubicle = %cubicle))]
    pub fn select_cubicle(&self, worker: WorkerId, cubicle: CubicleId) -> Result<WorkerSession> {
        let target = self
            .sessions
            .get_cubicle(cubicle)?
            .ok_or(CoreError::CubicleNotFound(cubicle))?;
        if !target.is_active {
            return Err(CoreError::Validation(format!(
                "{cubicle} is inactive and cannot be selected"
            )));
        }

        let now = self.clock.now();
        let idle_cutoff = now - Duration::minutes(SESSION_IDLE_MINUTES);
        for other in self.sessions.sessions_with_cubicle()? {
            if other.worker_id == worker || other.selected_cubicle_id != Some(cubicle) {
                continue;
            }
            let stale = other.is_expired(now) || other.last_activity < idle_cutoff;
            if !stale {
                return Err(CoreError::Validation(format!(
                    "{cubicle} is already selected by {}",
                    other.worker_id
                )));
            }
            // Reclaim in passing; if the owner woke up and re-touched since
            // the read, the conditional clear loses and so do we.
            if !self.sessions.clear_cubicle_if(other.worker_id, cubicle)? {
                return Err(CoreError::Validation(format!(
                    "{cubicle} is already selected by {}",
                    other.worker_id
                )));
            }
            debug!(previous = %other.worker_id, "reclaimed stale cubicle reservation");
        }

        let mut session = self.touch_session(worker)?;
        session.selected_cubicle_id = Some(cubicle);
        self.sessions.upsert_session(session.clone())?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use crate::types::Cubicle;
    use chrono::{TimeZone, Utc};

    fn harness() -> (Arc<MemoryStore>, Arc<ManualClock>, SessionService) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 14, 9, 0, 0).unwrap(),
        ));
        let service = SessionService::new(store.clone(), clock.clone());
        (store, clock, service)
    }

    fn add_cubicle(store: &MemoryStore, id: u64, is_active: bool) {
        store
            .upsert_cubicle(Cubicle {
                id: CubicleId(id),
                is_active,
            })
            .unwrap();
    }

    mod touch_session {
        use super::*;

        #[test]
        fn creates_and_refreshes() {
            let (store, clock, service) = harness();

            let first = service.touch_session(WorkerId(1)).unwrap();
            assert_eq!(first.last_activity, clock.now());

            clock.advance(Duration::minutes(10));
            let second = service.touch_session(WorkerId(1)).unwrap();
            assert_eq!(second.last_activity, clock.now());
            assert_eq!(
                second.expires_at,
                clock.now() + Duration::hours(SESSION_LIFETIME_HOURS)
            );
            assert_eq!(
                store.get_session(WorkerId(1)).unwrap().unwrap(),
                second
            );
        }

        #[test]
        fn expired_session_restarts_without_its_cubicle() {
            let (store, clock, service) = harness();
            add_cubicle(&store, 1, true);
            service.select_cubicle(WorkerId(1), CubicleId(1)).unwrap();

            clock.advance(Duration::hours(SESSION_LIFETIME_HOURS) + Duration::seconds(1));
            let refreshed = service.touch_session(WorkerId(1)).unwrap();
            assert_eq!(refreshed.selected_cubicle_id, None);
        }

        #[test]
        fn live_session_keeps_its_cubicle() {
            let (store, clock, service) = harness();
            add_cubicle(&store, 1, true);
            service.select_cubicle(WorkerId(1), CubicleId(1)).unwrap();

            clock.advance(Duration::minutes(5));
            let refreshed = service.touch_session(WorkerId(1)).unwrap();
            assert_eq!(refreshed.selected_cubicle_id, Some(CubicleId(1)));
        }
    }

    mod select_cubicle {
        use super::*;

        #[test]
        fn reserves_an_active_cubicle() {
            let (store, _clock, service) = harness();
            add_cubicle(&store, 3, true);

            let session = service.select_cubicle(WorkerId(1), CubicleId(3)).unwrap();
            assert_eq!(session.selected_cubicle_id, Some(CubicleId(3)));
        }

        #[test]
        fn replaces_a_previous_selection() {
            let (store, _clock, service) = harness();
            add_cubicle(&store, 1, true);
            add_cubicle(&store, 2, true);
            service.select_cubicle(WorkerId(1), CubicleId(1)).unwrap();

            let session = service.select_cubicle(WorkerId(1), CubicleId(2)).unwrap();
            assert_eq!(session.selected_cubicle_id, Some(CubicleId(2)));
        }

        #[test]
        fn unknown_cubicle_is_not_found() {
            let (_store, _clock, service) = harness();
            let err = service
                .select_cubicle(WorkerId(1), CubicleId(99))
                .unwrap_err();
            assert!(matches!(err, CoreError::CubicleNotFound(_)));
        }

        #[test]
        fn inactive_cubicle_is_rejected() {
            let (store, _clock, service) = harness();
            add_cubicle(&store, 3, false);

            let err = service
                .select_cubicle(WorkerId(1), CubicleId(3))
                .unwrap_err();
            assert!(matches!(err, CoreError::Validation(_)));
        }

        #[test]
        fn cubicle_held_by_a_live_session_is_rejected() {
            let (store, _clock, service) = harness();
            add_cubicle(&store, 3, true);
            service.select_cubicle(WorkerId(1), CubicleId(3)).unwrap();

            let err = service
                .select_cubicle(WorkerId(2), CubicleId(3))
                .unwrap_err();
            assert!(matches!(err, CoreError::Validation(_)));
        }

        #[test]
        fn stale_reservation_is_reclaimed() {
            let (store, clock, service) = harness();
            add_cubicle(&store, 3, true);
            service.select_cubicle(WorkerId(1), CubicleId(3)).unwrap();

            clock.advance(Duration::minutes(SESSION_IDLE_MINUTES + 1));
            let session = service.select_cubicle(WorkerId(2), CubicleId(3)).unwrap();
            assert_eq!(session.selected_cubicle_id, Some(CubicleId(3)));
            assert_eq!(
                store
                    .get_session(WorkerId(1))
                    .unwrap()
                    .unwrap()
                    .selected_cubicle_id,
                None
            );
        }
    }
}
