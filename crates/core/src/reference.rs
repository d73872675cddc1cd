//! References between engine records.
//!
//! `EntityRef` names any record the engine owns; `BlockingReference` is what the
//! deletion guard hands back so a caller can see exactly which record is in the way.

use serde::{Deserialize, Serialize};

use crate::id::{
    BranchId, LineId, MovementId, ProductId, RecordId, TransferId, UnitId, VariantId,
};

/// Typed reference to an engine record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Branch(BranchId),
    Product(ProductId),
    Variant(VariantId),
    Unit(UnitId),
    Record(RecordId),
    Transfer(TransferId),
    SaleLine(LineId),
    PurchaseOrderLine(LineId),
    Movement(MovementId),
}

impl core::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EntityRef::Branch(id) => write!(f, "branch:{id}"),
            EntityRef::Product(id) => write!(f, "product:{id}"),
            EntityRef::Variant(id) => write!(f, "variant:{id}"),
            EntityRef::Unit(id) => write!(f, "unit:{id}"),
            EntityRef::Record(id) => write!(f, "record:{id}"),
            EntityRef::Transfer(id) => write!(f, "transfer:{id}"),
            EntityRef::SaleLine(id) => write!(f, "sale_line:{id}"),
            EntityRef::PurchaseOrderLine(id) => write!(f, "purchase_order_line:{id}"),
            EntityRef::Movement(id) => write!(f, "movement:{id}"),
        }
    }
}

/// Why a record refers to the entity being deleted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    PendingTransfer,
    InTransitTransfer,
    CompletedTransfer,
    CancelledTransfer,
    OpenPurchaseOrderLine,
    ClosedPurchaseOrderLine,
    OpenSaleLine,
    ClosedSaleLine,
    ActiveChildVariant,
    ActiveVariant,
    HeldStock,
    Movement,
}

impl ReferenceKind {
    /// Non-terminal references block deletion; terminal ones are kept for history.
    pub fn blocks_deletion(self) -> bool {
        matches!(
            self,
            ReferenceKind::PendingTransfer
                | ReferenceKind::InTransitTransfer
                | ReferenceKind::OpenPurchaseOrderLine
                | ReferenceKind::OpenSaleLine
                | ReferenceKind::ActiveChildVariant
                | ReferenceKind::ActiveVariant
                | ReferenceKind::HeldStock
        )
    }
}

/// A record holding a reference to an entity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockingReference {
    pub kind: ReferenceKind,
    pub record: EntityRef,
}

impl BlockingReference {
    pub fn new(kind: ReferenceKind, record: EntityRef) -> Self {
        Self { kind, record }
    }
}

impl core::fmt::Display for BlockingReference {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?} ({})", self.kind, self.record)
    }
}
