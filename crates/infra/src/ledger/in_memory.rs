use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use chrono::Utc;

use branchstock_core::MovementId;
use branchstock_ledger::{Movement, NewMovement, StockKey};

use super::r#trait::{LedgerError, MovementLedger};

#[derive(Debug, Default)]
struct LedgerState {
    movements: Vec<Movement>,
    by_key: BTreeMap<StockKey, Vec<usize>>,
    ids: HashSet<MovementId>,
}

impl LedgerState {
    fn last_quantity(&self, key: &StockKey) -> i64 {
        self.by_key
            .get(key)
            .and_then(|idx| idx.last())
            .map(|&i| self.movements[i].new_quantity)
            .unwrap_or(0)
    }

    fn high_water(&self) -> u64 {
        self.movements.last().map(|m| m.sequence).unwrap_or(0)
    }
}

/// In-memory append-only movement ledger.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryMovementLedger {
    state: RwLock<LedgerState>,
}

impl InMemoryMovementLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from previously exported movements.
    ///
    /// The chain of every key is re-verified, so a tampered export is rejected.
    pub fn from_movements(mut movements: Vec<Movement>) -> Result<Self, LedgerError> {
        movements.sort_by_key(|m| m.sequence);

        let mut state = LedgerState::default();
        for m in movements {
            let expected = state.last_quantity(&m.key);
            if m.previous_quantity != expected {
                return Err(LedgerError::Continuity {
                    key: m.key,
                    expected,
                    found: m.previous_quantity,
                });
            }
            if !state.ids.insert(m.id) {
                return Err(LedgerError::DuplicateMovement(m.id.to_string()));
            }
            state.by_key.entry(m.key).or_default().push(state.movements.len());
            state.movements.push(m);
        }

        Ok(Self {
            state: RwLock::new(state),
        })
    }
}

impl MovementLedger for InMemoryMovementLedger {
    fn append(&self, batch: Vec<NewMovement>) -> Result<Vec<Movement>, LedgerError> {
        if batch.is_empty() {
            return Ok(vec![]);
        }

        let mut state = self.state.write().map_err(|_| LedgerError::Poisoned)?;

        // Validate the whole batch before touching state (all or nothing).
        let mut running: HashMap<StockKey, i64> = HashMap::new();
        let mut batch_ids = HashSet::new();
        for m in &batch {
            let expected = running
                .get(&m.key)
                .copied()
                .unwrap_or_else(|| state.last_quantity(&m.key));
            if m.previous_quantity != expected {
                return Err(LedgerError::Continuity {
                    key: m.key,
                    expected,
                    found: m.previous_quantity,
                });
            }
            if state.ids.contains(&m.id) || !batch_ids.insert(m.id) {
                return Err(LedgerError::DuplicateMovement(m.id.to_string()));
            }
            running.insert(m.key, m.new_quantity);
        }

        let recorded_at = Utc::now();
        let mut next = state.high_water() + 1;
        let mut committed = Vec::with_capacity(batch.len());
        for m in batch {
            let stored = m.commit(next, recorded_at);
            next += 1;

            let idx = state.movements.len();
            state.by_key.entry(stored.key).or_default().push(idx);
            state.ids.insert(stored.id);
            state.movements.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }

    fn load(&self, key: &StockKey, up_to: u64) -> Result<Vec<Movement>, LedgerError> {
        let state = self.state.read().map_err(|_| LedgerError::Poisoned)?;
        Ok(state
            .by_key
            .get(key)
            .map(|idx| {
                idx.iter()
                    .map(|&i| &state.movements[i])
                    .filter(|m| m.sequence <= up_to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn keys(&self, up_to: u64) -> Result<Vec<StockKey>, LedgerError> {
        let state = self.state.read().map_err(|_| LedgerError::Poisoned)?;
        Ok(state
            .by_key
            .iter()
            .filter(|(_, idx)| {
                idx.first()
                    .is_some_and(|&i| state.movements[i].sequence <= up_to)
            })
            .map(|(key, _)| *key)
            .collect())
    }

    fn all(&self, up_to: u64) -> Result<Vec<Movement>, LedgerError> {
        let state = self.state.read().map_err(|_| LedgerError::Poisoned)?;
        Ok(state
            .movements
            .iter()
            .take_while(|m| m.sequence <= up_to)
            .cloned()
            .collect())
    }

    fn high_water(&self) -> Result<u64, LedgerError> {
        let state = self.state.read().map_err(|_| LedgerError::Poisoned)?;
        Ok(state.high_water())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchstock_core::{ActorId, BranchId, VariantId};
    use branchstock_ledger::{MovementReason, replay};
    use uuid::Uuid;

    fn key() -> StockKey {
        StockKey::variant(VariantId::new(), BranchId::new())
    }

    fn mv(key: StockKey, prev: i64, new: i64) -> NewMovement {
        NewMovement::new(key, prev, new, MovementReason::Adjustment, ActorId::new(), Uuid::now_v7())
    }

    #[test]
    fn append_assigns_monotonic_sequences_across_keys() {
        let ledger = InMemoryMovementLedger::new();
        let (a, b) = (key(), key());

        let first = ledger.append(vec![mv(a, 0, 3), mv(b, 0, 1)]).unwrap();
        let second = ledger.append(vec![mv(a, 3, 5)]).unwrap();

        assert_eq!(first.iter().map(|m| m.sequence).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(second[0].sequence, 3);
        assert_eq!(ledger.high_water().unwrap(), 3);
        assert_eq!(replay(&ledger.load(&a, 3).unwrap()), 5);
    }

    #[test]
    fn broken_chain_rejects_the_whole_batch() {
        let ledger = InMemoryMovementLedger::new();
        let (a, b) = (key(), key());
        ledger.append(vec![mv(a, 0, 2)]).unwrap();

        let err = ledger.append(vec![mv(b, 0, 1), mv(a, 1, 4)]).unwrap_err();
        assert!(matches!(err, LedgerError::Continuity { expected: 2, found: 1, .. }));
        assert!(ledger.load(&b, u64::MAX).unwrap().is_empty());
        assert_eq!(ledger.high_water().unwrap(), 1);
    }

    #[test]
    fn chain_continues_within_a_batch() {
        let ledger = InMemoryMovementLedger::new();
        let a = key();
        ledger.append(vec![mv(a, 0, 2), mv(a, 2, 7)]).unwrap();
        assert_eq!(replay(&ledger.load(&a, u64::MAX).unwrap()), 7);
    }

    #[test]
    fn reads_are_bounded_by_sequence() {
        let ledger = InMemoryMovementLedger::new();
        let a = key();
        let b = key();
        ledger.append(vec![mv(a, 0, 2)]).unwrap();
        ledger.append(vec![mv(b, 0, 4), mv(a, 2, 1)]).unwrap();

        assert_eq!(replay(&ledger.load(&a, 1).unwrap()), 2);
        assert_eq!(ledger.keys(1).unwrap(), vec![a]);
        assert_eq!(ledger.all(2).unwrap().len(), 2);
    }

    #[test]
    fn rebuilding_from_exported_movements_reverifies_chains() {
        let ledger = InMemoryMovementLedger::new();
        let a = key();
        ledger.append(vec![mv(a, 0, 2), mv(a, 2, 5)]).unwrap();
        let exported = ledger.all(u64::MAX).unwrap();

        let rebuilt = InMemoryMovementLedger::from_movements(exported.clone()).unwrap();
        assert_eq!(rebuilt.high_water().unwrap(), 2);

        let mut tampered = exported;
        tampered[1].previous_quantity = 1;
        assert!(InMemoryMovementLedger::from_movements(tampered).is_err());
    }

    #[test]
    fn ledger_errors_surface_as_integrity_defects() {
        let err: branchstock_core::EngineError = LedgerError::Poisoned.into();
        assert!(matches!(err, branchstock_core::EngineError::DataIntegrityDefect(_)));
    }
}
