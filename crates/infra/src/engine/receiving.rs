//! Purchase-order receiving: stock enters a branch.

use std::collections::BTreeSet;

use serde_json::Value as JsonValue;

use branchstock_core::{
    ActorId, BranchId, EngineError, EngineResult, Entity, EntityRef, LineId, PurchaseOrderId,
    UnitId, VariantId,
};
use branchstock_events::{EventBus, EventEnvelope};
use branchstock_inventory::{InventoryUnit, PurchaseOrderLine, VariantKind};
use branchstock_ledger::MovementReason;

use crate::store::{ChangeSet, EntityStore, Row, RowKey, StoreState};

use super::aggregator::StockPlan;
use super::visibility::writable_variant;
use super::{Plan, StockEngine};

/// What arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Goods {
    /// One new unit per entry, optionally serialized.
    Units(Vec<Option<String>>),
    /// Bulk quantity for a quantity-tracked variant.
    Quantity(i64),
}

impl Goods {
    pub fn quantity(&self) -> i64 {
        match self {
            Goods::Units(serials) => serials.len() as i64,
            Goods::Quantity(q) => *q,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveStock {
    pub branch: BranchId,
    pub variant_id: VariantId,
    pub goods: Goods,
    /// Purchase-order line the delivery is booked against, if any.
    pub purchase_line: Option<LineId>,
    pub actor: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptOutcome {
    /// Units created by the receipt (empty for bulk goods).
    pub unit_ids: Vec<UnitId>,
    pub quantity_received: i64,
    /// Level of the variant at the branch after the receipt.
    pub leaf_quantity: i64,
}

fn open_line<'s>(state: &'s StoreState, branch: BranchId, line: LineId) -> EngineResult<&'s PurchaseOrderLine> {
    let found = state
        .purchase_line(line)
        .ok_or(EngineError::NotFound(EntityRef::PurchaseOrderLine(line)))?;
    if found.branch() != branch {
        return Err(EngineError::AccessDenied {
            branch,
            entity: EntityRef::PurchaseOrderLine(line),
        });
    }
    Ok(found)
}

fn new_units(
    state: &StoreState,
    receipt: &ReceiveStock,
    serials: &[Option<String>],
) -> EngineResult<Vec<InventoryUnit>> {
    let mut seen = BTreeSet::new();
    serials
        .iter()
        .map(|serial| {
            let unit = InventoryUnit::new(UnitId::new(), receipt.variant_id, receipt.branch, serial.clone())?;
            if let Some(serial) = unit.serial() {
                if let Some(holder) = state.serial_holder(serial) {
                    return Err(EngineError::SerialInUse {
                        serial: serial.to_string(),
                        unit_id: holder,
                    });
                }
                if !seen.insert(serial.to_string()) {
                    return Err(EngineError::validation(format!(
                        "serial '{serial}' appears twice in one receipt"
                    )));
                }
            }
            Ok(unit)
        })
        .collect()
}

impl<S, B> StockEngine<S, B>
where
    S: EntityStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Book received goods into a branch and run the initial aggregation pass.
    pub fn receive_stock(&self, receipt: ReceiveStock) -> EngineResult<ReceiptOutcome> {
        if receipt.goods.quantity() <= 0 {
            return Err(EngineError::validation("a receipt must contain at least one piece"));
        }

        self.execute("receive_stock", |state| {
            let (_, variant) = writable_variant(state, receipt.branch, receipt.variant_id)?;
            let mut changes = ChangeSet::new();

            let unit_ids = match (&receipt.goods, variant.kind()) {
                (Goods::Units(serials), VariantKind::UnitTracked) => {
                    let units = new_units(state, &receipt, serials)?;
                    let ids = units.iter().map(|u| u.id()).collect();
                    for unit in units {
                        changes.insert(Row::Unit(unit));
                    }
                    ids
                }
                (Goods::Quantity(_), VariantKind::QuantityTracked) => Vec::new(),
                (_, kind) => {
                    return Err(EngineError::validation(format!(
                        "goods do not match variant {} of kind {kind:?}",
                        receipt.variant_id
                    )));
                }
            };
            let quantity = receipt.goods.quantity();

            if let Some(line_id) = receipt.purchase_line {
                let mut line = open_line(state, receipt.branch, line_id)?.clone();
                if line.variant_id() != receipt.variant_id {
                    return Err(EngineError::validation(format!(
                        "purchase-order line {line_id} is for another variant"
                    )));
                }
                line.receive(quantity)?;
                changes.put(state, Row::PurchaseLine(line));
            }

            let mut plan = StockPlan::new(state, receipt.actor);
            let leaf_quantity =
                plan.shift_leaf(receipt.variant_id, receipt.branch, quantity, MovementReason::Receipt)?;
            plan.finish(&mut changes)?;

            Ok(Plan::new(
                changes,
                ReceiptOutcome {
                    unit_ids,
                    quantity_received: quantity,
                    leaf_quantity,
                },
            ))
        })
    }

    /// Open a purchase-order line expecting `ordered` pieces of a leaf variant.
    pub fn open_purchase_line(
        &self,
        branch: BranchId,
        purchase_order_id: PurchaseOrderId,
        variant: VariantId,
        ordered: i64,
    ) -> EngineResult<LineId> {
        let line = PurchaseOrderLine::new(LineId::new(), purchase_order_id, branch, variant, ordered)?;
        let id = line.id();
        self.execute("open_purchase_line", |state| {
            let (_, found) = writable_variant(state, branch, variant)?;
            if found.is_parent() {
                return Err(EngineError::validation(format!(
                    "variant {variant} is a parent and cannot be ordered"
                )));
            }
            let mut changes = ChangeSet::new();
            changes.expect(state, RowKey::Variant(variant));
            changes.insert(Row::PurchaseLine(line.clone()));
            Ok(Plan::new(changes, id))
        })
    }

    pub fn cancel_purchase_line(&self, branch: BranchId, line: LineId) -> EngineResult<()> {
        self.execute("cancel_purchase_line", |state| {
            let mut updated = open_line(state, branch, line)?.clone();
            updated.cancel()?;
            let mut changes = ChangeSet::new();
            changes.put(state, Row::PurchaseLine(updated));
            Ok(Plan::new(changes, ()))
        })
    }
}
