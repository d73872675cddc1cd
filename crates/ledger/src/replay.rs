//! Replay of movement history.

use branchstock_core::{EngineError, EngineResult};

use crate::movement::Movement;

/// Fold movements into a quantity.
///
/// Movements are ordered by `(recorded_at, sequence)` and their deltas summed from
/// zero. The fold is pure: replaying the same history any number of times yields
/// the same quantity.
pub fn replay(movements: &[Movement]) -> i64 {
    let mut ordered: Vec<&Movement> = movements.iter().collect();
    ordered.sort_by_key(|m| (m.recorded_at, m.sequence));
    ordered.iter().fold(0i64, |qty, m| qty + m.delta)
}

/// Verify that each movement continues the previous one and return the final quantity.
///
/// Movements must all belong to one stock key. A movement whose
/// `previous_quantity` does not match the running total, or whose `delta`
/// disagrees with its quantities, is a `DataIntegrityDefect`.
pub fn verify_chain(movements: &[Movement]) -> EngineResult<i64> {
    let mut ordered: Vec<&Movement> = movements.iter().collect();
    ordered.sort_by_key(|m| m.sequence);

    let mut running = 0i64;
    let mut last_sequence = 0u64;
    for m in ordered {
        if m.sequence == last_sequence && last_sequence != 0 {
            return Err(EngineError::integrity(format!(
                "duplicate ledger sequence {} for {}",
                m.sequence, m.key
            )));
        }
        if m.previous_quantity != running {
            return Err(EngineError::integrity(format!(
                "ledger gap for {} at sequence {}: expected previous {running}, found {}",
                m.key, m.sequence, m.previous_quantity
            )));
        }
        if m.new_quantity - m.previous_quantity != m.delta {
            return Err(EngineError::integrity(format!(
                "movement {} delta {} disagrees with {} -> {}",
                m.id, m.delta, m.previous_quantity, m.new_quantity
            )));
        }
        running = m.new_quantity;
        last_sequence = m.sequence;
    }
    Ok(running)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::{MovementReason, NewMovement, StockKey};
    use branchstock_core::{ActorId, BranchId, VariantId};
    use chrono::{Duration, Utc};
    use proptest::prelude::*;
    use uuid::Uuid;

    fn chain(deltas: &[i64]) -> Vec<Movement> {
        let key = StockKey::variant(VariantId::new(), BranchId::new());
        let actor = ActorId::new();
        let start = Utc::now();
        let mut qty = 0i64;
        deltas
            .iter()
            .enumerate()
            .map(|(idx, delta)| {
                let m = NewMovement::new(key, qty, qty + delta, MovementReason::Adjustment, actor, Uuid::now_v7())
                    .commit(idx as u64 + 1, start + Duration::milliseconds(idx as i64));
                qty += delta;
                m
            })
            .collect()
    }

    #[test]
    fn empty_history_replays_to_zero() {
        assert_eq!(replay(&[]), 0);
        assert_eq!(verify_chain(&[]).unwrap(), 0);
    }

    #[test]
    fn replay_matches_last_new_quantity() {
        let history = chain(&[3, 2, -1]);
        assert_eq!(replay(&history), 4);
        assert_eq!(verify_chain(&history).unwrap(), 4);
    }

    #[test]
    fn timestamp_ties_break_on_sequence() {
        let mut history = chain(&[5, -2]);
        let t = history[0].recorded_at;
        for m in &mut history {
            m.recorded_at = t;
        }
        history.reverse();
        assert_eq!(replay(&history), 3);
        assert_eq!(verify_chain(&history).unwrap(), 3);
    }

    #[test]
    fn gap_in_chain_is_an_integrity_defect() {
        let mut history = chain(&[3, 2]);
        history[1].previous_quantity = 4;
        history[1].delta = history[1].new_quantity - 4;

        assert!(matches!(verify_chain(&history), Err(EngineError::DataIntegrityDefect(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: replay is deterministic and agrees with chain verification.
        #[test]
        fn replay_is_idempotent(deltas in prop::collection::vec(-50i64..50, 0..60)) {
            let history = chain(&deltas);
            let first = replay(&history);
            let second = replay(&history);
            prop_assert_eq!(first, second);
            prop_assert_eq!(first, deltas.iter().sum::<i64>());
            prop_assert_eq!(verify_chain(&history).unwrap(), first);
        }
    }
}
