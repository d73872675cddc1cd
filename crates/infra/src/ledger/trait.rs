use std::sync::Arc;

use thiserror::Error;

use branchstock_core::EngineError;
use branchstock_ledger::{Movement, NewMovement, StockKey};

/// Movement ledger operation error.
///
/// These are **infrastructure errors**. Every variant means the ledger and the
/// caller disagree about history, so all of them surface as `DataIntegrityDefect`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger continuity broken for {key}: expected previous {expected}, found {found}")]
    Continuity {
        key: StockKey,
        expected: i64,
        found: i64,
    },

    #[error("duplicate movement id: {0}")]
    DuplicateMovement(String),

    #[error("ledger lock poisoned")]
    Poisoned,
}

impl From<LedgerError> for EngineError {
    fn from(value: LedgerError) -> Self {
        EngineError::integrity(value.to_string())
    }
}

/// Append-only store of stock movements.
///
/// ## Append semantics
///
/// `append()`:
/// - checks every movement continues its key's chain (batch-internal order counts)
/// - assigns ledger-wide sequence numbers starting at `high_water() + 1`
/// - stamps `recorded_at`
/// - persists the whole batch or nothing
///
/// ## Read semantics
///
/// Reads take an `up_to` sequence bound so a caller holding an older store
/// snapshot sees exactly the history that snapshot reflects.
pub trait MovementLedger: Send + Sync {
    fn append(&self, batch: Vec<NewMovement>) -> Result<Vec<Movement>, LedgerError>;

    /// Movements of one key with `sequence <= up_to`, in sequence order.
    fn load(&self, key: &StockKey, up_to: u64) -> Result<Vec<Movement>, LedgerError>;

    /// Keys with at least one movement at or below `up_to`.
    fn keys(&self, up_to: u64) -> Result<Vec<StockKey>, LedgerError>;

    /// Every movement at or below `up_to`, in sequence order.
    fn all(&self, up_to: u64) -> Result<Vec<Movement>, LedgerError>;

    /// Highest assigned sequence number (0 when empty).
    fn high_water(&self) -> Result<u64, LedgerError>;
}

impl<L> MovementLedger for Arc<L>
where
    L: MovementLedger + ?Sized,
{
    fn append(&self, batch: Vec<NewMovement>) -> Result<Vec<Movement>, LedgerError> {
        (**self).append(batch)
    }

    fn load(&self, key: &StockKey, up_to: u64) -> Result<Vec<Movement>, LedgerError> {
        (**self).load(key, up_to)
    }

    fn keys(&self, up_to: u64) -> Result<Vec<StockKey>, LedgerError> {
        (**self).keys(up_to)
    }

    fn all(&self, up_to: u64) -> Result<Vec<Movement>, LedgerError> {
        (**self).all(up_to)
    }

    fn high_water(&self) -> Result<u64, LedgerError> {
        (**self).high_water()
    }
}
