use std::collections::HashMap;

use rand::Rng;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::SignalingError;

/// What to do with the response to an outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    /// Reply to `join`; the result is the remote answer.
    AwaitInitialAnswer,
    /// Reply to `answer`; nothing depends on it.
    AwaitRenegotiationAck,
}

/// Outstanding requests keyed by JSON-RPC id. Entries are removed exactly
/// once, when their response is observed; unanswered entries are simply
/// abandoned with the table.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: HashMap<u64, PendingAction>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: u64, action: PendingAction) -> Result<(), SignalingError> {
        if self.pending.contains_key(&id) {
            return Err(SignalingError::DuplicateId(id));
        }
        self.pending.insert(id, action);
        Ok(())
    }

    pub fn resolve(&mut self, id: u64) -> Result<PendingAction, SignalingError> {
        self.pending
            .remove(&id)
            .ok_or(SignalingError::UnknownCorrelationId(id))
    }

    pub fn contains(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops every pending entry, returning how many were abandoned.
    pub fn abandon_all(&mut self) -> usize {
        let abandoned = self.pending.len();
        self.pending.clear();
        abandoned
    }
}

/// Source of fresh request ids. Ids are never zero; zero means "absent" on
/// the wire.
pub trait RequestIds: Send {
    fn next_id(&mut self) -> u64;
}

/// Random non-zero 32-bit ids.
pub struct RandomIds {
    rng: StdRng,
}

impl RandomIds {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for RandomIds {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestIds for RandomIds {
    fn next_id(&mut self) -> u64 {
        self.rng.gen_range(1..=u64::from(u32::MAX))
    }
}

/// Counts upward from a starting id; deterministic ids for tests and replay.
#[derive(Debug, Clone)]
pub struct SequentialIds {
    next: u64,
}

impl SequentialIds {
    pub fn starting_at(first: u64) -> Self {
        Self { next: first.max(1) }
    }
}

impl RequestIds for SequentialIds {
    fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next = self.next.checked_add(1).unwrap_or(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_resolve_removes_exactly_one_entry() {
        let mut table = CorrelationTable::new();
        table.register(1, PendingAction::AwaitInitialAnswer).unwrap();
        table.register(2, PendingAction::AwaitRenegotiationAck).unwrap();
        assert_eq!(table.len(), 2);

        assert_eq!(table.resolve(1), Ok(PendingAction::AwaitInitialAnswer));
        assert_eq!(table.len(), 1);
        assert!(!table.contains(1));
        assert!(table.contains(2));
    }

    #[test]
    fn duplicate_registration_is_rejected_without_overwriting() {
        let mut table = CorrelationTable::new();
        table.register(7, PendingAction::AwaitInitialAnswer).unwrap();
        assert_eq!(
            table.register(7, PendingAction::AwaitRenegotiationAck),
            Err(SignalingError::DuplicateId(7))
        );
        assert_eq!(table.resolve(7), Ok(PendingAction::AwaitInitialAnswer));
    }

    #[test]
    fn late_or_repeated_responses_are_unknown() {
        let mut table = CorrelationTable::new();
        table.register(3, PendingAction::AwaitInitialAnswer).unwrap();
        table.resolve(3).unwrap();
        assert_eq!(table.resolve(3), Err(SignalingError::UnknownCorrelationId(3)));
        assert_eq!(table.resolve(99), Err(SignalingError::UnknownCorrelationId(99)));
        assert!(table.is_empty());
    }

    #[test]
    fn abandon_clears_pending_requests() {
        let mut table = CorrelationTable::new();
        table.register(1, PendingAction::AwaitInitialAnswer).unwrap();
        table.register(2, PendingAction::AwaitRenegotiationAck).unwrap();
        assert_eq!(table.abandon_all(), 2);
        assert!(table.is_empty());
    }

    #[test]
    fn random_ids_are_non_zero_and_32_bit() {
        let mut ids = RandomIds::new();
        for _ in 0..1_000 {
            let id = ids.next_id();
            assert!(id >= 1 && id <= u64::from(u32::MAX));
        }
    }

    #[test]
    fn sequential_ids_skip_zero() {
        let mut ids = SequentialIds::starting_at(0);
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
    }
}
