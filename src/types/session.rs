//! Worker sessions and cubicles.
//!
//! A worker session tracks the cubicle a phlebotomist has selected and when
//! they were last active. Cubicle reservations are released by the reaper on
//! inactivity (20 minutes) or session expiry; see `crate::reaper`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CubicleId, WorkerId};

/// One worker's session state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSession {
    pub worker_id: WorkerId,

    /// The cubicle this worker has reserved, if any.
    pub selected_cubicle_id: Option<CubicleId>,

    /// Last time the worker did anything. Drives the inactivity TTL.
    pub last_activity: DateTime<Utc>,

    /// Hard session expiry, independent of activity.
    pub expires_at: DateTime<Utc>,
}

impl WorkerSession {
    pub fn new(
        worker_id: WorkerId,
        last_activity: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        WorkerSession {
            worker_id,
            selected_cubicle_id: None,
            last_activity,
            expires_at,
        }
    }

    /// True once the hard expiry has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// An extraction cubicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cubicle {
    pub id: CubicleId,

    /// Inactive cubicles cannot be selected or assigned.
    pub is_active: bool,
}
