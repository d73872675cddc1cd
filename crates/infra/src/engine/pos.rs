//! Point-of-sale: checkout, held sales and their completion or void.

use std::collections::BTreeSet;

use serde_json::Value as JsonValue;

use branchstock_core::{
    ActorId, BranchId, EngineError, EngineResult, Entity, LineId, SaleId, UnitId, VariantId,
};
use branchstock_events::{EventBus, EventEnvelope};
use branchstock_inventory::{SaleLine, SaleLineStatus, UnitStatus, VariantKind};
use branchstock_ledger::MovementReason;

use crate::store::{ChangeSet, EntityStore, Row, StoreState};

use super::aggregator::{StockPlan, reason_for};
use super::visibility::{owned_unit, writable_variant};
use super::{Plan, StockEngine};

/// One item at the counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaleItem {
    Unit(UnitId),
    Quantity { variant_id: VariantId, quantity: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleReceipt {
    pub sale_id: SaleId,
    pub line_ids: Vec<LineId>,
}

/// Plan every item of a sale into `changes`. Either all items succeed or the
/// whole sale fails.
fn plan_items(
    state: &StoreState,
    branch: BranchId,
    sale_id: SaleId,
    items: &[SaleItem],
    line_status: SaleLineStatus,
    actor: ActorId,
    changes: &mut ChangeSet,
) -> EngineResult<Vec<LineId>> {
    if items.is_empty() {
        return Err(EngineError::validation("a sale needs at least one item"));
    }
    let unit_status = match line_status {
        SaleLineStatus::Open => UnitStatus::Reserved,
        _ => UnitStatus::Sold,
    };
    let quantity_reason = match line_status {
        SaleLineStatus::Open => MovementReason::Reservation,
        _ => MovementReason::Sale,
    };

    let mut seen = BTreeSet::new();
    let mut plan = StockPlan::new(state, actor);
    let mut line_ids = Vec::with_capacity(items.len());

    for item in items {
        let line = match item {
            SaleItem::Unit(unit_id) => {
                if !seen.insert(*unit_id) {
                    return Err(EngineError::validation(format!(
                        "unit {unit_id} appears twice in one sale"
                    )));
                }
                let mut unit = owned_unit(state, branch, *unit_id)?.clone();
                writable_variant(state, branch, unit.variant_id())?;
                let from = unit.status();
                let delta = unit.transition(unit_status)?;
                plan.shift_leaf(unit.variant_id(), branch, delta, reason_for(from, unit_status))?;
                let line = SaleLine::new(
                    LineId::new(),
                    sale_id,
                    branch,
                    unit.variant_id(),
                    Some(*unit_id),
                    1,
                    line_status,
                )?;
                changes.put(state, Row::Unit(unit));
                line
            }
            SaleItem::Quantity {
                variant_id,
                quantity,
            } => {
                let (_, variant) = writable_variant(state, branch, *variant_id)?;
                if variant.kind() != VariantKind::QuantityTracked {
                    return Err(EngineError::validation(format!(
                        "variant {variant_id} is not quantity-tracked; sell its units"
                    )));
                }
                let line = SaleLine::new(
                    LineId::new(),
                    sale_id,
                    branch,
                    *variant_id,
                    None,
                    *quantity,
                    line_status,
                )?;
                plan.shift_leaf(*variant_id, branch, -*quantity, quantity_reason)?;
                line
            }
        };
        line_ids.push(line.id());
        changes.insert(Row::SaleLine(line));
    }

    plan.finish(changes)?;
    Ok(line_ids)
}

/// Open lines of `sale_id` at `branch`.
fn open_lines(state: &StoreState, branch: BranchId, sale_id: SaleId) -> EngineResult<Vec<&SaleLine>> {
    let lines: Vec<&SaleLine> = state
        .sale_lines()
        .filter(|l| l.sale_id() == sale_id && l.branch() == branch && l.is_open())
        .collect();
    if lines.is_empty() {
        return Err(EngineError::validation(format!(
            "sale {sale_id} has no open lines at branch {branch}"
        )));
    }
    Ok(lines)
}

impl<S, B> StockEngine<S, B>
where
    S: EntityStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Sell every item at once. A unit claimed by a transfer fails the whole
    /// sale with `UnitLocked`; no partial sale is ever committed.
    pub fn checkout(&self, branch: BranchId, items: Vec<SaleItem>, actor: ActorId) -> EngineResult<SaleReceipt> {
        let sale_id = SaleId::new();
        self.execute("checkout", |state| {
            state.active_branch(branch)?;
            let mut changes = ChangeSet::new();
            let line_ids = plan_items(
                state,
                branch,
                sale_id,
                &items,
                SaleLineStatus::Completed,
                actor,
                &mut changes,
            )?;
            Ok(Plan::new(changes, SaleReceipt { sale_id, line_ids }))
        })
    }

    /// Hold a sale at the counter: units are reserved, bulk quantity is set
    /// aside, and the lines stay open until completed or voided.
    pub fn hold_sale(&self, branch: BranchId, items: Vec<SaleItem>, actor: ActorId) -> EngineResult<SaleReceipt> {
        let sale_id = SaleId::new();
        self.execute("hold_sale", |state| {
            state.active_branch(branch)?;
            let mut changes = ChangeSet::new();
            let line_ids = plan_items(
                state,
                branch,
                sale_id,
                &items,
                SaleLineStatus::Open,
                actor,
                &mut changes,
            )?;
            Ok(Plan::new(changes, SaleReceipt { sale_id, line_ids }))
        })
    }

    /// Complete a held sale. Reserved units become sold; stock was already
    /// taken out when the sale was held.
    pub fn complete_sale(&self, branch: BranchId, sale_id: SaleId, actor: ActorId) -> EngineResult<()> {
        self.execute("complete_sale", |state| {
            state.active_branch(branch)?;
            let mut changes = ChangeSet::new();
            let mut plan = StockPlan::new(state, actor);
            for line in open_lines(state, branch, sale_id)? {
                let mut line = line.clone();
                line.complete()?;
                if let Some(unit_id) = line.unit_id() {
                    let mut unit = state.require_unit(unit_id)?.clone();
                    let delta = unit.transition(UnitStatus::Sold)?;
                    plan.shift_leaf(unit.variant_id(), branch, delta, MovementReason::Sale)?;
                    changes.put(state, Row::Unit(unit));
                }
                changes.put(state, Row::SaleLine(line));
            }
            plan.finish(&mut changes)?;
            Ok(Plan::new(changes, ()))
        })
    }

    /// Void a held sale and put its stock back.
    pub fn void_sale(&self, branch: BranchId, sale_id: SaleId, actor: ActorId) -> EngineResult<()> {
        self.execute("void_sale", |state| {
            state.active_branch(branch)?;
            let mut changes = ChangeSet::new();
            let mut plan = StockPlan::new(state, actor);
            for line in open_lines(state, branch, sale_id)? {
                let mut line = line.clone();
                line.void()?;
                match line.unit_id() {
                    Some(unit_id) => {
                        let mut unit = state.require_unit(unit_id)?.clone();
                        let delta = unit.transition(UnitStatus::Available)?;
                        plan.shift_leaf(
                            unit.variant_id(),
                            branch,
                            delta,
                            MovementReason::ReservationRelease,
                        )?;
                        changes.put(state, Row::Unit(unit));
                    }
                    None => {
                        plan.shift_leaf(
                            line.variant_id(),
                            branch,
                            line.quantity(),
                            MovementReason::ReservationRelease,
                        )?;
                    }
                }
                changes.put(state, Row::SaleLine(line));
            }
            plan.finish(&mut changes)?;
            Ok(Plan::new(changes, ()))
        })
    }
}
