//! Events published after successful commits.
//!
//! Movements and transfer events are defined by their domain crates; this
//! module adds the engine-level facts and the envelope conversion shared by
//! every publication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use branchstock_core::{ActorId, BranchId, EngineError, EngineResult, EntityRef, ProductId};
use branchstock_events::{Event, EventEnvelope};
use branchstock_ledger::{Movement, StockEntity};

/// A product's illegitimate branch owner was cleared by an explicit correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductOwnerCleared {
    pub product_id: ProductId,
    pub previous_owner: BranchId,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

impl Event for ProductOwnerCleared {
    fn event_type(&self) -> &'static str {
        "integrity.product_owner_cleared"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

/// An entity was deleted, logically (`physical == false`) or physically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDeleted {
    pub entity: EntityRef,
    pub physical: bool,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

impl Event for EntityDeleted {
    fn event_type(&self) -> &'static str {
        "entity.deleted"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

/// Wrap a typed event for publication.
pub fn envelope<E>(
    branch_id: BranchId,
    subject_id: Uuid,
    subject_type: &str,
    sequence_number: u64,
    event: &E,
) -> EngineResult<EventEnvelope<JsonValue>>
where
    E: Event + Serialize,
{
    let payload = serde_json::to_value(event)
        .map_err(|e| EngineError::integrity(format!("event payload serialization failed: {e}")))?;

    Ok(EventEnvelope::new(
        Uuid::now_v7(),
        branch_id,
        subject_id,
        subject_type,
        event.event_type(),
        sequence_number,
        event.occurred_at(),
        payload,
    ))
}

/// Envelope for a committed movement; the ledger sequence is the sequence number.
pub fn movement_envelope(movement: &Movement) -> EngineResult<EventEnvelope<JsonValue>> {
    let (subject_id, subject_type) = match movement.key.entity {
        StockEntity::Variant(id) => (*id.as_uuid(), "variant"),
        StockEntity::Product(id) => (*id.as_uuid(), "product"),
    };
    envelope(
        movement.key.branch,
        subject_id,
        subject_type,
        movement.sequence,
        movement,
    )
}

/// Subject id and type for an entity reference.
pub fn subject_of(entity: &EntityRef) -> (Uuid, &'static str) {
    match entity {
        EntityRef::Branch(id) => (*id.as_uuid(), "branch"),
        EntityRef::Product(id) => (*id.as_uuid(), "product"),
        EntityRef::Variant(id) => (*id.as_uuid(), "variant"),
        EntityRef::Unit(id) => (*id.as_uuid(), "unit"),
        EntityRef::Record(id) => (*id.as_uuid(), "record"),
        EntityRef::Transfer(id) => (*id.as_uuid(), "transfer"),
        EntityRef::SaleLine(id) => (*id.as_uuid(), "sale_line"),
        EntityRef::PurchaseOrderLine(id) => (*id.as_uuid(), "purchase_order_line"),
        EntityRef::Movement(id) => (*id.as_uuid(), "movement"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchstock_core::VariantId;
    use branchstock_ledger::{MovementReason, NewMovement, StockKey};

    #[test]
    fn movement_envelope_uses_ledger_sequence_and_branch() {
        let branch = BranchId::new();
        let variant = VariantId::new();
        let movement = NewMovement::new(
            StockKey::variant(variant, branch),
            0,
            2,
            MovementReason::Receipt,
            ActorId::new(),
            Uuid::now_v7(),
        )
        .commit(42, Utc::now());

        let env = movement_envelope(&movement).unwrap();
        assert_eq!(env.branch_id(), branch);
        assert_eq!(env.subject_id(), *variant.as_uuid());
        assert_eq!(env.subject_type(), "variant");
        assert_eq!(env.event_type(), "stock.movement.recorded");
        assert_eq!(env.sequence_number(), 42);
        assert_eq!(env.payload()["delta"], 2);
    }
}
