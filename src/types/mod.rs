//! Core domain types for the turn queue.
//!
//! This module contains all the fundamental types used throughout the crate,
//! designed to encode invariants via the type system.

pub mod audit;
pub mod ids;
pub mod session;
pub mod turn;

// Re-export commonly used types at the module level
pub use audit::{AuditAction, AuditRecord};
pub use ids::{CubicleId, SequenceNumber, TurnId, WorkerId};
pub use session::{Cubicle, WorkerSession};
pub use turn::{PriorityClass, Turn, TurnStatus};
