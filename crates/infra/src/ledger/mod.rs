//! Append-only movement ledger boundary.
//!
//! The ledger is write-once: movements are appended in batches, each batch
//! atomically, and never modified. Every movement must continue its stock key's
//! chain (`previous_quantity` equals the key's last `new_quantity`).

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryMovementLedger;
pub use r#trait::{LedgerError, MovementLedger};
