use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use branchstock_core::{EngineError, EngineResult, ExpectedVersion};
use branchstock_ledger::{Movement, StockKey};

use crate::ledger::{InMemoryMovementLedger, MovementLedger};

use super::change_set::ChangeSet;
use super::export::StoreExport;
use super::state::{RowKey, StoreState};
use super::{CommitReceipt, EntityStore};

/// In-memory, copy-on-write entity store.
///
/// Writers are serialized by `commit_lock`; readers take the current `Arc`
/// under a short read lock and are never blocked by a commit in progress.
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug)]
pub struct InMemoryEntityStore<L = InMemoryMovementLedger> {
    current: RwLock<Arc<StoreState>>,
    commit_lock: Mutex<()>,
    ledger: L,
}

impl InMemoryEntityStore<InMemoryMovementLedger> {
    pub fn new() -> Self {
        Self::with_ledger(InMemoryMovementLedger::new())
    }

    /// Restore a store from an export.
    pub fn import(export: StoreExport) -> EngineResult<Self> {
        let (state, movements) = export.into_state()?;
        let ledger = InMemoryMovementLedger::from_movements(movements)?;
        Ok(Self {
            current: RwLock::new(Arc::new(state)),
            commit_lock: Mutex::new(()),
            ledger,
        })
    }
}

impl Default for InMemoryEntityStore<InMemoryMovementLedger> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: MovementLedger> InMemoryEntityStore<L> {
    /// Start an empty store over an existing (empty) ledger.
    pub fn with_ledger(ledger: L) -> Self {
        Self {
            current: RwLock::new(Arc::new(StoreState::default())),
            commit_lock: Mutex::new(()),
            ledger,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    fn poisoned() -> EngineError {
        EngineError::integrity("store lock poisoned")
    }
}

fn check_version(key: &RowKey, expected: u64, actual: u64) -> EngineResult<()> {
    ExpectedVersion::Exact(expected)
        .check(actual)
        .map_err(|_| EngineError::conflict(format!("{key} moved from v{expected} to v{actual}")))
}

impl<L: MovementLedger> EntityStore for InMemoryEntityStore<L> {
    fn snapshot(&self) -> EngineResult<Arc<StoreState>> {
        let current = self.current.read().map_err(|_| Self::poisoned())?;
        Ok(Arc::clone(&current))
    }

    fn commit(&self, changes: ChangeSet) -> EngineResult<CommitReceipt> {
        let correlation_id = changes.correlation_id();
        let _writer = self.commit_lock.lock().map_err(|_| Self::poisoned())?;
        let base = self.snapshot()?;

        let (writes, reads, movements) = changes.into_parts();

        // 1) Optimistic concurrency over everything the plan relied on.
        for (key, expected) in &reads {
            check_version(key, *expected, base.version(key))?;
        }
        for (key, write) in &writes {
            check_version(key, write.expected, base.version(key))?;
        }

        // 2) Apply to a private copy.
        let mut next = (*base).clone();
        let mut stock_writes = Vec::new();
        for (key, write) in writes {
            if let RowKey::Stock(stock_key) = key {
                stock_writes.push(stock_key);
            }
            next.apply(key, write.row)?;
        }

        // 3) Ledger/state agreement at the commit gate.
        let mut last_movement: BTreeMap<StockKey, i64> = BTreeMap::new();
        for m in &movements {
            last_movement.insert(m.key, m.new_quantity);
        }
        for (key, quantity) in &last_movement {
            if next.level(key) != *quantity {
                return Err(EngineError::integrity(format!(
                    "movement for {key} ends at {quantity} but stored level is {}",
                    next.level(key)
                )));
            }
        }
        for key in &stock_writes {
            if next.level(key) != base.level(key) && !last_movement.contains_key(key) {
                return Err(EngineError::integrity(format!(
                    "stock level for {key} changed without a movement"
                )));
            }
        }

        // 4) Durable history, then 5) publish the new state.
        let committed: Vec<Movement> = self.ledger.append(movements)?;
        if let Some(last) = committed.last() {
            next.ledger_high_water = last.sequence;
        }
        let ledger_high_water = next.ledger_high_water;

        {
            let mut current = self.current.write().map_err(|_| Self::poisoned())?;
            *current = Arc::new(next);
        }

        debug!(
            correlation_id = %correlation_id,
            movements = committed.len(),
            ledger_high_water,
            "store commit applied"
        );

        Ok(CommitReceipt {
            correlation_id,
            movements: committed,
            ledger_high_water,
        })
    }

    fn movements(&self, key: &StockKey, up_to: u64) -> EngineResult<Vec<Movement>> {
        Ok(self.ledger.load(key, up_to)?)
    }

    fn ledger_keys(&self, up_to: u64) -> EngineResult<Vec<StockKey>> {
        Ok(self.ledger.keys(up_to)?)
    }

    fn export(&self) -> EngineResult<StoreExport> {
        // Holding the writer lock keeps rows and ledger from the same commit.
        let _writer = self.commit_lock.lock().map_err(|_| Self::poisoned())?;
        let state = self.snapshot()?;
        let movements = self.ledger.all(state.ledger_high_water())?;
        Ok(StoreExport::from_state(&state, movements))
    }
}
