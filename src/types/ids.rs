//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different ID types (e.g., using a
//! WorkerId where a CubicleId is expected) and make the code more
//! self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The opaque identity of a turn (sample-collection ticket).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(pub u64);

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "turn-{}", self.0)
    }
}

impl From<u64> for TurnId {
    fn from(n: u64) -> Self {
        TurnId(n)
    }
}

/// The display ticket number printed on a turn.
///
/// Distinct from [`TurnId`]: sequence numbers restart per day and are what
/// patients see on screens; ids are stable identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceNumber(pub u32);

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for SequenceNumber {
    fn from(n: u32) -> Self {
        SequenceNumber(n)
    }
}

/// A phlebotomist (worker) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

impl From<u64> for WorkerId {
    fn from(n: u64) -> Self {
        WorkerId(n)
    }
}

/// A cubicle (extraction box) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CubicleId(pub u64);

impl fmt::Display for CubicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cubicle-{}", self.0)
    }
}

impl From<u64> for CubicleId {
    fn from(n: u64) -> Self {
        CubicleId(n)
    }
}
