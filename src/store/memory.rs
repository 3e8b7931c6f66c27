//! In-memory reference implementation of the store contracts.
//!
//! A single mutex guards each record family, and `update_if` evaluates its
//! condition and applies its patch inside one critical section, so the
//! compare-and-swap contract holds under concurrent callers. This is the
//! store used by the test suite and the bundled binary; it is intentionally
//! unremarkable.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::ordering::candidate_order;
use crate::types::{
    AuditRecord, Cubicle, CubicleId, PriorityClass, SequenceNumber, Turn, TurnId, TurnStatus,
    WorkerId, WorkerSession,
};

use super::{
    AuditSink, Result, SessionStore, StoreError, TurnCondition, TurnPatch, TurnStore,
};

/// Mutex-guarded store for turns, sessions, cubicles and audit records.
#[derive(Debug, Default)]
pub struct MemoryStore {
    turns: Mutex<BTreeMap<TurnId, Turn>>,
    sessions: Mutex<BTreeMap<WorkerId, WorkerSession>>,
    cubicles: Mutex<BTreeMap<CubicleId, Cubicle>>,
    audit: Mutex<Vec<AuditRecord>>,
    next_id: AtomicU64,
    next_sequence: AtomicU64,
    /// Successful turn mutations (inserts + applied conditional writes).
    /// Lets tests assert that a no-op sweep performed zero writes.
    turn_writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            next_id: AtomicU64::new(1),
            next_sequence: AtomicU64::new(1),
            ..MemoryStore::default()
        }
    }

    /// Intake helper: allocates an id and sequence number, inserts a fresh
    /// Pending turn and returns it.
    pub fn create_turn(&self, priority: PriorityClass, now: DateTime<Utc>) -> Result<Turn> {
        let id = TurnId(self.next_id.fetch_add(1, AtomicOrdering::SeqCst));
        let seq = self.next_sequence.fetch_add(1, AtomicOrdering::SeqCst);
        let turn = Turn::new(id, SequenceNumber(seq as u32), priority, now);
        self.insert(turn.clone())?;
        Ok(turn)
    }

    /// Number of successful turn mutations so far.
    pub fn turn_write_count(&self) -> u64 {
        self.turn_writes.load(AtomicOrdering::SeqCst)
    }

    /// Snapshot of the audit trail, oldest first.
    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.audit.lock().unwrap().clone()
    }

    fn collect_sorted(&self, mut matching: Vec<Turn>) -> Vec<Turn> {
        matching.sort_by(candidate_order);
        matching
    }
}

impl TurnStore for MemoryStore {
    fn get(&self, id: TurnId) -> Result<Option<Turn>> {
        Ok(self.turns.lock().unwrap().get(&id).cloned())
    }

    fn insert(&self, turn: Turn) -> Result<()> {
        let mut turns = self.turns.lock().unwrap();
        if turns.contains_key(&turn.id) {
            return Err(StoreError::DuplicateId(turn.id));
        }
        turns.insert(turn.id, turn);
        self.turn_writes.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }

    fn find_eligible(&self, priority: Option<PriorityClass>) -> Result<Vec<Turn>> {
        let turns = self.turns.lock().unwrap();
        let matching = turns
            .values()
            .filter(|t| t.is_claimable())
            .filter(|t| priority.map_or(true, |p| t.priority_class == p))
            .cloned()
            .collect();
        Ok(self.collect_sorted(matching))
    }

    fn find_held_by(&self, worker: WorkerId) -> Result<Option<Turn>> {
        let turns = self.turns.lock().unwrap();
        Ok(turns
            .values()
            .find(|t| t.status == TurnStatus::Pending && t.holding_by == Some(worker))
            .cloned())
    }

    fn find_attended_by(&self, worker: WorkerId) -> Result<Option<Turn>> {
        let turns = self.turns.lock().unwrap();
        Ok(turns
            .values()
            .find(|t| t.status == TurnStatus::InProgress && t.attended_by == Some(worker))
            .cloned())
    }

    fn find_expired_holdings(&self, cutoff: DateTime<Utc>) -> Result<Vec<Turn>> {
        let turns = self.turns.lock().unwrap();
        let matching = turns
            .values()
            .filter(|t| t.status == TurnStatus::Pending && t.holding_by.is_some())
            .filter(|t| t.holding_at.is_some_and(|at| at < cutoff))
            .cloned()
            .collect();
        Ok(self.collect_sorted(matching))
    }

    fn find_pending_in_class(&self, class: PriorityClass) -> Result<Vec<Turn>> {
        let turns = self.turns.lock().unwrap();
        let mut matching: Vec<Turn> = turns
            .values()
            .filter(|t| t.status == TurnStatus::Pending && t.priority_class == class)
            .cloned()
            .collect();
        matching.sort_by_key(|t| (t.effective_queue_time(), t.sequence_number));
        Ok(matching)
    }

    fn find_unfinished(&self) -> Result<Vec<Turn>> {
        let turns = self.turns.lock().unwrap();
        let matching = turns
            .values()
            .filter(|t| !t.status.is_terminal())
            .cloned()
            .collect();
        Ok(self.collect_sorted(matching))
    }

    fn update_if(
        &self,
        id: TurnId,
        condition: &TurnCondition,
        patch: &TurnPatch,
    ) -> Result<bool> {
        let mut turns = self.turns.lock().unwrap();
        let Some(turn) = turns.get_mut(&id) else {
            return Ok(false);
        };
        if !condition.matches(turn) {
            return Ok(false);
        }
        patch.apply_to(turn);
        self.turn_writes.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(true)
    }
}

impl SessionStore for MemoryStore {
    fn get_session(&self, worker: WorkerId) -> Result<Option<WorkerSession>> {
        Ok(self.sessions.lock().unwrap().get(&worker).cloned())
    }

    fn upsert_session(&self, session: WorkerSession) -> Result<()> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.worker_id, session);
        Ok(())
    }

    fn sessions_with_cubicle(&self) -> Result<Vec<WorkerSession>> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions
            .values()
            .filter(|s| s.selected_cubicle_id.is_some())
            .cloned()
            .collect())
    }

    fn clear_cubicle_if(&self, worker: WorkerId, expected: CubicleId) -> Result<bool> {
        let mut sessions = self.sessions.lock().unwrap();
        let Some(session) = sessions.get_mut(&worker) else {
            return Ok(false);
        };
        if session.selected_cubicle_id != Some(expected) {
            return Ok(false);
        }
        session.selected_cubicle_id = None;
        Ok(true)
    }

    fn get_cubicle(&self, id: CubicleId) -> Result<Option<Cubicle>> {
        Ok(self.cubicles.lock().unwrap().get(&id).cloned())
    }

    fn upsert_cubicle(&self, cubicle: Cubicle) -> Result<()> {
        self.cubicles.lock().unwrap().insert(cubicle.id, cubicle);
        Ok(())
    }
}

impl AuditSink for MemoryStore {
    fn append(&self, record: AuditRecord) -> Result<()> {
        self.audit.lock().unwrap().push(record);
        Ok(())
    }
}
