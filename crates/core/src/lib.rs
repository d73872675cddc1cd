//! `branchstock-core`: shared building blocks for the stock consistency engine.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod reference;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{EngineError, EngineResult};
pub use id::{
    ActorId, BranchId, LineId, MovementId, ProductId, PurchaseOrderId, RecordId, SaleId,
    TransferId, UnitId, VariantId,
};
pub use reference::{BlockingReference, EntityRef, ReferenceKind};
pub use value_object::ValueObject;
