//! Entity store boundary.
//!
//! The store holds every engine record (branches, catalog, units, stock levels,
//! transfers, lines) as versioned rows, and fronts the movement ledger so a row
//! commit and its movements succeed or fail together.
//!
//! ## Snapshots
//!
//! `snapshot()` returns an immutable, whole committed state. Readers never see a
//! half-applied operation, and a snapshot never changes underneath its holder.
//!
//! ## Commits
//!
//! `commit()` applies a `ChangeSet` atomically:
//! 1. every write's and read's expected version is checked (`ConcurrentConflict`)
//! 2. rows are applied to a private copy (serial uniqueness: `SerialInUse`)
//! 3. each touched stock level must equal its last movement (`DataIntegrityDefect`)
//! 4. movements are appended to the ledger
//! 5. the copy is published as the new current state

pub mod change_set;
pub mod export;
pub mod in_memory;
pub mod state;

use std::sync::Arc;

use uuid::Uuid;

use branchstock_core::EngineResult;
use branchstock_ledger::{Movement, StockKey};

pub use change_set::{ChangeSet, Write};
pub use export::{StockLevel, StoreExport};
pub use in_memory::InMemoryEntityStore;
pub use state::{Row, RowKey, StoreState, Versioned};

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub correlation_id: Uuid,
    /// Movements as appended (sequence numbers assigned).
    pub movements: Vec<Movement>,
    /// Ledger high-water of the published state.
    pub ledger_high_water: u64,
}

/// Transactional, snapshot-isolated record store.
pub trait EntityStore: Send + Sync {
    /// The current committed state.
    fn snapshot(&self) -> EngineResult<Arc<StoreState>>;

    /// Apply a change set atomically (all rows and movements, or nothing).
    fn commit(&self, changes: ChangeSet) -> EngineResult<CommitReceipt>;

    /// Movements of `key` up to and including ledger sequence `up_to`.
    fn movements(&self, key: &StockKey, up_to: u64) -> EngineResult<Vec<Movement>>;

    /// Every stock key with movements up to `up_to`.
    fn ledger_keys(&self, up_to: u64) -> EngineResult<Vec<StockKey>>;

    /// Serialize the current state and its full movement history.
    fn export(&self) -> EngineResult<StoreExport>;
}

impl<S> EntityStore for Arc<S>
where
    S: EntityStore + ?Sized,
{
    fn snapshot(&self) -> EngineResult<Arc<StoreState>> {
        (**self).snapshot()
    }

    fn commit(&self, changes: ChangeSet) -> EngineResult<CommitReceipt> {
        (**self).commit(changes)
    }

    fn movements(&self, key: &StockKey, up_to: u64) -> EngineResult<Vec<Movement>> {
        (**self).movements(key, up_to)
    }

    fn ledger_keys(&self, up_to: u64) -> EngineResult<Vec<StockKey>> {
        (**self).ledger_keys(up_to)
    }

    fn export(&self) -> EngineResult<StoreExport> {
        (**self).export()
    }
}
