//! Candidate ordering for the holding scheduler.
//!
//! Turns are served Special before General, then FIFO by effective queue
//! time within the class (`deferred_at` when present, else `created_at`).
//! The sequence number breaks exact-timestamp ties so the order is total
//! and deterministic across stores.
//!
//! This is the query-language-free form of
//! "ORDER BY priority rank, COALESCE(deferred_at, created_at)"; a
//! SQL-backed store can push the same ordering into its queries.

use std::cmp::Ordering;

use crate::types::Turn;

/// Total order over claim candidates: lower sorts first, first is served
/// first.
pub fn candidate_order(a: &Turn, b: &Turn) -> Ordering {
    a.priority_class
        .rank()
        .cmp(&b.priority_class.rank())
        .then_with(|| a.effective_queue_time().cmp(&b.effective_queue_time()))
        .then_with(|| a.sequence_number.cmp(&b.sequence_number))
}
