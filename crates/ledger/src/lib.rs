//! Movement ledger domain (append-only quantity history).
//!
//! Pure domain logic only: movement records, the replay fold, and chain
//! verification. Persistence lives in `branchstock-infra::ledger`.

pub mod movement;
pub mod replay;

pub use movement::{Movement, MovementReason, NewMovement, StockEntity, StockKey};
pub use replay::{replay, verify_chain};
