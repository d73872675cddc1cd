//! Infrastructure layer: entity store, movement ledger, config, and the stock
//! engine that runs every operation transactionally.

pub mod config;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod store;


pub use config::{EngineConfig, RetryConfig};
pub use engine::{
    DeletionCheck, Goods, Mismatch, NewVariant, ReceiptOutcome, ReceiveStock,
    ReconciliationReport, RetryPolicy, SaleItem, SaleReceipt, StockEngine, TransferRequest,
    UnitChangeOutcome, UnitQuantityChange,
};
pub use ledger::{InMemoryMovementLedger, LedgerError, MovementLedger};
pub use store::{ChangeSet, CommitReceipt, EntityStore, InMemoryEntityStore, StoreExport, StoreState};
