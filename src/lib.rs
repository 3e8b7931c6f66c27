//! Draw Queue - a turn-holding scheduler for a clinical sample-collection queue.
//!
//! This library provides the scheduling core (claiming, skipping, deferral,
//! timeout reclamation, admin overrides) behind store traits, plus an HTTP
//! adapter and an in-memory reference store.

pub mod admin;
pub mod clock;
pub mod error;
pub mod ordering;
pub mod reaper;
pub mod scheduler;
pub mod server;
pub mod sessions;
pub mod store;
pub mod types;

#[cfg(test)]
pub mod test_utils;
