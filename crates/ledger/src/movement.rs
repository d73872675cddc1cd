use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use branchstock_core::{ActorId, BranchId, EntityRef, MovementId, ProductId, VariantId};
use branchstock_events::Event;

/// Record whose quantity a movement describes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum StockEntity {
    Variant(VariantId),
    Product(ProductId),
}

impl StockEntity {
    pub fn entity_ref(self) -> EntityRef {
        match self {
            StockEntity::Variant(id) => EntityRef::Variant(id),
            StockEntity::Product(id) => EntityRef::Product(id),
        }
    }
}

/// A stock position: one entity's quantity at one branch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub entity: StockEntity,
    pub branch: BranchId,
}

impl StockKey {
    pub fn variant(variant: VariantId, branch: BranchId) -> Self {
        Self {
            entity: StockEntity::Variant(variant),
            branch,
        }
    }

    pub fn product(product: ProductId, branch: BranchId) -> Self {
        Self {
            entity: StockEntity::Product(product),
            branch,
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.entity.entity_ref(), self.branch)
    }
}

/// Why a quantity changed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementReason {
    Receipt,
    Sale,
    Reservation,
    ReservationRelease,
    Return,
    Restock,
    Adjustment,
    Disposal,
    TransferOut,
    TransferIn,
    TransferCancelled,
    /// Derived change of a parent variant or product total.
    Aggregation,
    /// Explicit recomputation of a parent variant.
    Recompute,
    /// Logical deletion of a variant removed it from its parents' sums.
    Deactivation,
}

/// A movement ready to be appended (sequence and timestamp not yet assigned).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub id: MovementId,
    pub key: StockKey,
    pub previous_quantity: i64,
    pub new_quantity: i64,
    pub reason: MovementReason,
    pub actor: ActorId,
    /// Operation that produced the movement; shared by every movement of one commit.
    pub correlation_id: Uuid,
}

impl NewMovement {
    pub fn new(
        key: StockKey,
        previous_quantity: i64,
        new_quantity: i64,
        reason: MovementReason,
        actor: ActorId,
        correlation_id: Uuid,
    ) -> Self {
        Self {
            id: MovementId::new(),
            key,
            previous_quantity,
            new_quantity,
            reason,
            actor,
            correlation_id,
        }
    }

    pub fn delta(&self) -> i64 {
        self.new_quantity - self.previous_quantity
    }

    /// Stamp the movement with its ledger position.
    pub fn commit(self, sequence: u64, recorded_at: DateTime<Utc>) -> Movement {
        Movement {
            id: self.id,
            sequence,
            key: self.key,
            previous_quantity: self.previous_quantity,
            new_quantity: self.new_quantity,
            delta: self.new_quantity - self.previous_quantity,
            reason: self.reason,
            actor: self.actor,
            correlation_id: self.correlation_id,
            recorded_at,
        }
    }
}

/// An immutable, appended quantity change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    /// Ledger-wide, strictly increasing position.
    pub sequence: u64,
    pub key: StockKey,
    pub previous_quantity: i64,
    pub new_quantity: i64,
    pub delta: i64,
    pub reason: MovementReason,
    pub actor: ActorId,
    pub correlation_id: Uuid,
    pub recorded_at: DateTime<Utc>,
}

impl Event for Movement {
    fn event_type(&self) -> &'static str {
        "stock.movement.recorded"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }
}
