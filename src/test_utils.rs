//! Shared test utilities and arbitrary generators for property-based testing.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use crate::types::{PriorityClass, SequenceNumber, Turn, TurnId, TurnStatus, WorkerId};

pub fn arb_turn_id() -> impl Strategy<Value = TurnId> {
    any::<u64>().prop_map(TurnId)
}

pub fn arb_worker_id() -> impl Strategy<Value = WorkerId> {
    any::<u64>().prop_map(WorkerId)
}

pub fn arb_priority_class() -> impl Strategy<Value = PriorityClass> {
    prop_oneof![Just(PriorityClass::Special), Just(PriorityClass::General)]
}

pub fn arb_turn_status() -> impl Strategy<Value = TurnStatus> {
    prop_oneof![
        Just(TurnStatus::Pending),
        Just(TurnStatus::InProgress),
        Just(TurnStatus::Attended),
        Just(TurnStatus::Cancelled),
    ]
}

pub fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    // One calendar year of seconds, enough spread for ordering tests.
    (1_700_000_000i64..1_731_536_000).prop_map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
}

/// A Pending turn with an arbitrary identity, class, creation time and
/// optional deferral timestamp.
pub fn arb_pending_turn() -> impl Strategy<Value = Turn> {
    (
        1u64..100_000,
        arb_priority_class(),
        arb_timestamp(),
        prop::option::of(arb_timestamp()),
    )
        .prop_map(|(id, class, created, deferred)| {
            let mut turn = Turn::new(TurnId(id), SequenceNumber(id as u32), class, created);
            if let Some(at) = deferred {
                turn.is_deferred = true;
                turn.deferred_at = Some(at);
            }
            turn
        })
}
