//! Deletion guard.
//!
//! Before anything is deleted, every record that references it is classified:
//! non-terminal references (open lines, pending transfers, active children,
//! held stock) block the deletion, terminal ones are historical and only
//! decide between logical and physical removal.

use chrono::Utc;
use serde_json::Value as JsonValue;

use branchstock_branches::can_access;
use branchstock_core::{
    ActorId, BlockingReference, BranchId, EngineError, EngineResult, Entity, EntityRef, LineId,
    ProductId, RecordId, ReferenceKind, UnitId, VariantId,
};
use branchstock_events::{EventBus, EventEnvelope};
use branchstock_inventory::{PurchaseLineStatus, SaleLine, UnitStatus, VariantKind};
use branchstock_ledger::{MovementReason, StockEntity};
use branchstock_transfers::{Transfer, TransferStatus};

use crate::events::{EntityDeleted, envelope, subject_of};
use crate::store::{ChangeSet, EntityStore, Row, RowKey, StoreState};

use super::aggregator::StockPlan;
use super::visibility::{owned_unit, writable_variant};
use super::{Plan, StockEngine};

/// Every record referencing an entity, split by whether it blocks deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionCheck {
    pub entity: EntityRef,
    pub blocking: Vec<BlockingReference>,
    pub historical: Vec<BlockingReference>,
}

impl DeletionCheck {
    fn new(entity: EntityRef) -> Self {
        Self {
            entity,
            blocking: Vec::new(),
            historical: Vec::new(),
        }
    }

    pub fn is_deletable(&self) -> bool {
        self.blocking.is_empty()
    }

    /// No record of any kind references the entity.
    pub fn is_unreferenced(&self) -> bool {
        self.blocking.is_empty() && self.historical.is_empty()
    }

    fn add(&mut self, kind: ReferenceKind, record: EntityRef) {
        let reference = BlockingReference::new(kind, record);
        if kind.blocks_deletion() {
            self.blocking.push(reference);
        } else {
            self.historical.push(reference);
        }
    }

    fn add_transfer(&mut self, transfer: &Transfer) {
        let kind = match transfer.status() {
            TransferStatus::Pending => ReferenceKind::PendingTransfer,
            TransferStatus::InTransit => ReferenceKind::InTransitTransfer,
            TransferStatus::Completed => ReferenceKind::CompletedTransfer,
            TransferStatus::Cancelled => ReferenceKind::CancelledTransfer,
        };
        self.add(kind, EntityRef::Transfer(transfer.id_typed()));
    }

    fn add_sale_line(&mut self, line: &SaleLine) {
        let kind = if line.is_open() {
            ReferenceKind::OpenSaleLine
        } else {
            ReferenceKind::ClosedSaleLine
        };
        self.add(kind, EntityRef::SaleLine(line.id()));
    }

    fn add_purchase_line(&mut self, id: LineId, status: PurchaseLineStatus) {
        let kind = match status {
            PurchaseLineStatus::Open => ReferenceKind::OpenPurchaseOrderLine,
            PurchaseLineStatus::Fulfilled | PurchaseLineStatus::Cancelled => {
                ReferenceKind::ClosedPurchaseOrderLine
            }
        };
        self.add(kind, EntityRef::PurchaseOrderLine(id));
    }

    /// `Err(BlockingReferences)` listing every blocking record.
    pub fn ensure_deletable(&self) -> EngineResult<()> {
        if self.is_deletable() {
            Ok(())
        } else {
            Err(EngineError::BlockingReferences {
                entity: self.entity,
                references: self.blocking.clone(),
            })
        }
    }
}

/// Classify the store records referencing `entity`. Ledger movements are not
/// included; they are historical and never change the outcome.
pub(crate) fn references(state: &StoreState, entity: EntityRef) -> EngineResult<DeletionCheck> {
    let mut check = DeletionCheck::new(entity);
    match entity {
        EntityRef::Variant(id) => {
            let variant = state.require_variant(id)?;
            for transfer in state.transfers().filter(|t| t.references_variant(id)) {
                check.add_transfer(transfer);
            }
            for line in state.purchase_lines().filter(|l| l.variant_id() == id) {
                check.add_purchase_line(line.id(), line.status());
            }
            for line in state.sale_lines().filter(|l| l.variant_id() == id) {
                check.add_sale_line(line);
            }
            if variant.is_parent() {
                for child in state.children(id).filter(|c| c.is_active()) {
                    check.add(ReferenceKind::ActiveChildVariant, EntityRef::Variant(child.id()));
                }
            }
        }
        EntityRef::Product(id) => {
            state.require_product(id)?;
            for variant in state.variants().filter(|v| v.product_id() == id && v.is_active()) {
                check.add(ReferenceKind::ActiveVariant, EntityRef::Variant(variant.id()));
            }
        }
        EntityRef::Branch(id) => {
            if state.branch(id).is_none() {
                return Err(EngineError::UnknownBranch(id));
            }
            for transfer in state.transfers().filter(|t| t.involves_branch(id)) {
                check.add_transfer(transfer);
            }
            for line in state.purchase_lines().filter(|l| l.branch() == id) {
                check.add_purchase_line(line.id(), line.status());
            }
            for line in state.sale_lines().filter(|l| l.branch() == id) {
                check.add_sale_line(line);
            }
            for unit in state.units().filter(|u| u.branch() == id && u.status().is_held()) {
                check.add(ReferenceKind::HeldStock, EntityRef::Unit(unit.id()));
            }
            for (key, quantity) in state.levels() {
                let StockEntity::Variant(variant) = key.entity else {
                    continue;
                };
                let bulk = state
                    .variant(variant)
                    .is_some_and(|v| v.kind() == VariantKind::QuantityTracked);
                if key.branch == id && bulk && quantity > 0 {
                    check.add(ReferenceKind::HeldStock, EntityRef::Variant(variant));
                }
            }
        }
        EntityRef::Unit(id) => {
            state.require_unit(id)?;
            for transfer in state.transfers().filter(|t| t.unit_ids().any(|u| u == id)) {
                check.add_transfer(transfer);
            }
            for line in state.sale_lines().filter(|l| l.unit_id() == Some(id)) {
                check.add_sale_line(line);
            }
        }
        EntityRef::Record(id) => {
            if state.record(id).is_none() {
                return Err(EngineError::NotFound(entity));
            }
        }
        EntityRef::Transfer(_)
        | EntityRef::SaleLine(_)
        | EntityRef::PurchaseOrderLine(_)
        | EntityRef::Movement(_) => {
            return Err(EngineError::validation(format!("{entity} is not deletable")));
        }
    }
    Ok(check)
}

fn deleted_envelope(
    state: &StoreState,
    branch: BranchId,
    entity: EntityRef,
    row: RowKey,
    physical: bool,
    actor: ActorId,
) -> EngineResult<EventEnvelope<JsonValue>> {
    let (subject_id, subject_type) = subject_of(&entity);
    let event = EntityDeleted {
        entity,
        physical,
        actor,
        occurred_at: Utc::now(),
    };
    envelope(branch, subject_id, subject_type, state.version(&row) + 1, &event)
}

impl<S, B> StockEngine<S, B>
where
    S: EntityStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Classify everything referencing `entity`, ledger movements included.
    pub fn check_deletable(&self, entity: EntityRef) -> EngineResult<DeletionCheck> {
        let snapshot = self.store().snapshot()?;
        let mut check = references(&snapshot, entity)?;

        let up_to = snapshot.ledger_high_water();
        for key in self.store().ledger_keys(up_to)? {
            let relevant = match entity {
                EntityRef::Variant(id) => key.entity == StockEntity::Variant(id),
                EntityRef::Product(id) => key.entity == StockEntity::Product(id),
                EntityRef::Branch(id) => key.branch == id,
                _ => false,
            };
            if !relevant {
                continue;
            }
            for movement in self.store().movements(&key, up_to)? {
                check.add(ReferenceKind::Movement, EntityRef::Movement(movement.id));
            }
        }
        Ok(check)
    }

    /// Deactivate a variant and drop it out of its parents' and product's sums.
    ///
    /// Stock the variant still holds does not block; it stays on record but no
    /// longer counts.
    pub fn delete_variant(&self, branch: BranchId, variant: VariantId, actor: ActorId) -> EngineResult<()> {
        self.execute("delete_variant", |state| {
            let (_, found) = writable_variant(state, branch, variant)?;
            let entity = EntityRef::Variant(variant);
            references(state, entity)?.ensure_deletable()?;

            let mut deactivated = found.clone();
            deactivated.deactivate();

            let mut changes = ChangeSet::new();
            let mut plan = StockPlan::new(state, actor).derived_reason(MovementReason::Deactivation);
            plan.replace_variant(deactivated.clone());
            plan.finish(&mut changes)?;
            changes.put(state, Row::Variant(deactivated));

            let event = deleted_envelope(state, branch, entity, RowKey::Variant(variant), false, actor)?;
            Ok(Plan::new(changes, ()).with_events(vec![event]))
        })
    }

    /// Deactivate a product once it has no active variants.
    pub fn delete_product(&self, branch: BranchId, product: ProductId, actor: ActorId) -> EngineResult<()> {
        self.execute("delete_product", |state| {
            state.active_branch(branch)?;
            let entity = EntityRef::Product(product);
            references(state, entity)?.ensure_deletable()?;

            let mut deactivated = state.require_product(product)?.clone();
            deactivated.ensure_global()?;
            deactivated.deactivate();

            let mut changes = ChangeSet::new();
            changes.put(state, Row::Product(deactivated));
            let event = deleted_envelope(state, branch, entity, RowKey::Product(product), false, actor)?;
            Ok(Plan::new(changes, ()).with_events(vec![event]))
        })
    }

    /// Deactivate a branch once nothing is open there and it holds no stock.
    pub fn delete_branch(&self, branch: BranchId, actor: ActorId) -> EngineResult<()> {
        self.execute("delete_branch", |state| {
            let mut deactivated = state.active_branch(branch)?.clone();
            let entity = EntityRef::Branch(branch);
            let check = references(state, entity)?;
            check.ensure_deletable()?;

            let mut changes = ChangeSet::new();
            for (key, _) in state.levels().filter(|(k, _)| k.branch == branch) {
                changes.expect(state, RowKey::Stock(*key));
            }
            deactivated.deactivate();
            changes.put(state, Row::Branch(deactivated));

            let event = deleted_envelope(state, branch, entity, RowKey::Branch(branch), false, actor)?;
            Ok(Plan::new(changes, ()).with_events(vec![event]))
        })
    }

    /// Remove a unit. Physical when nothing has ever referenced it; otherwise
    /// the unit is disposed and kept for history. Returns whether the removal
    /// was physical.
    pub fn delete_unit(&self, branch: BranchId, unit_id: UnitId, actor: ActorId) -> EngineResult<bool> {
        self.execute("delete_unit", |state| {
            let unit = owned_unit(state, branch, unit_id)?;
            unit.ensure_unlocked()?;
            let entity = EntityRef::Unit(unit_id);
            let check = references(state, entity)?;
            check.ensure_deletable()?;

            let mut changes = ChangeSet::new();
            let mut plan = StockPlan::new(state, actor);
            let physical = check.is_unreferenced();
            if physical {
                let delta = -unit.status().contribution();
                plan.shift_leaf(unit.variant_id(), branch, delta, MovementReason::Disposal)?;
                changes.remove(state, RowKey::Unit(unit_id));
            } else {
                if unit.status() == UnitStatus::Disposed {
                    return Err(EngineError::validation(format!("unit {unit_id} is already disposed")));
                }
                let mut disposed = unit.clone();
                let delta = disposed.transition(UnitStatus::Disposed)?;
                plan.shift_leaf(unit.variant_id(), branch, delta, MovementReason::Disposal)?;
                changes.put(state, Row::Unit(disposed));
            }
            plan.finish(&mut changes)?;

            let event = deleted_envelope(state, branch, entity, RowKey::Unit(unit_id), physical, actor)?;
            Ok(Plan::new(changes, physical).with_events(vec![event]))
        })
    }

    /// Deactivate a customer, supplier or account record the branch can see.
    pub fn delete_record(&self, branch: BranchId, record: RecordId, actor: ActorId) -> EngineResult<()> {
        self.execute("delete_record", |state| {
            let acting = state.active_branch(branch)?;
            let entity = EntityRef::Record(record);
            let found = state.record(record).ok_or(EngineError::NotFound(entity))?;
            if !can_access(acting, found.class(), found) {
                return Err(EngineError::AccessDenied { branch, entity });
            }
            references(state, entity)?.ensure_deletable()?;

            let mut deactivated = found.clone();
            deactivated.deactivate();

            let mut changes = ChangeSet::new();
            changes.put(state, Row::Record(deactivated));
            let event = deleted_envelope(state, branch, entity, RowKey::Record(record), false, actor)?;
            Ok(Plan::new(changes, ()).with_events(vec![event]))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchstock_branches::{Branch, SharingPolicies};
    use branchstock_core::{SaleId, TransferId};
    use branchstock_inventory::{InventoryUnit, Product, SaleLineStatus, Variant};
    use branchstock_transfers::{RequestTransfer, TransferCommand, TransferLine};

    fn put(state: &mut StoreState, row: Row) {
        state.apply(row.key(), Some(row)).unwrap();
    }

    struct World {
        state: StoreState,
        branch: BranchId,
        parent: VariantId,
        leaf: VariantId,
        unit: UnitId,
    }

    fn world() -> World {
        let branch = Branch::new(BranchId::new(), "Main", SharingPolicies::default()).unwrap();
        let product = Product::new(ProductId::new(), "TAB", "Tablet").unwrap();
        let parent = Variant::new(VariantId::new(), product.id(), "TAB-P", VariantKind::Parent).unwrap();
        let leaf = Variant::new(VariantId::new(), product.id(), "TAB-64", VariantKind::UnitTracked)
            .unwrap()
            .with_parent(parent.id());
        let unit = InventoryUnit::new(UnitId::new(), leaf.id(), branch.id(), Some("SN-1".into())).unwrap();

        let mut w = World {
            state: StoreState::default(),
            branch: branch.id(),
            parent: parent.id(),
            leaf: leaf.id(),
            unit: unit.id(),
        };
        for row in [
            Row::Branch(branch),
            Row::Product(product),
            Row::Variant(parent),
            Row::Variant(leaf),
            Row::Unit(unit),
        ] {
            put(&mut w.state, row);
        }
        w
    }

    fn transfer(w: &World, status_steps: usize) -> Transfer {
        let id = TransferId::new();
        let mut t = Transfer::empty(id);
        t.execute(&TransferCommand::Request(RequestTransfer {
            transfer_id: id,
            source: w.branch,
            destination: BranchId::new(),
            lines: vec![TransferLine::Units {
                variant_id: w.leaf,
                unit_ids: vec![w.unit],
            }],
            requested_by: ActorId::new(),
            occurred_at: Utc::now(),
        }))
        .unwrap();
        if status_steps > 0 {
            t.execute(&TransferCommand::Cancel(branchstock_transfers::CancelTransfer {
                transfer_id: id,
                acting_branch: w.branch,
                actor: ActorId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        }
        t
    }

    #[test]
    fn pending_transfer_blocks_variant_deletion() {
        let mut w = world();
        let t = transfer(&w, 0);
        let transfer_id = t.id_typed();
        put(&mut w.state, Row::Transfer(t));

        let check = references(&w.state, EntityRef::Variant(w.leaf)).unwrap();
        assert!(!check.is_deletable());
        assert_eq!(
            check.ensure_deletable(),
            Err(EngineError::BlockingReferences {
                entity: EntityRef::Variant(w.leaf),
                references: vec![BlockingReference::new(
                    ReferenceKind::PendingTransfer,
                    EntityRef::Transfer(transfer_id)
                )],
            })
        );
    }

    #[test]
    fn cancelled_transfer_is_history_only() {
        let mut w = world();
        let cancelled = transfer(&w, 1);
        put(&mut w.state, Row::Transfer(cancelled));

        let check = references(&w.state, EntityRef::Variant(w.leaf)).unwrap();
        assert!(check.is_deletable());
        assert_eq!(check.historical.len(), 1);
        assert_eq!(check.historical[0].kind, ReferenceKind::CancelledTransfer);
    }

    #[test]
    fn parent_with_active_child_is_blocked() {
        let w = world();
        let check = references(&w.state, EntityRef::Variant(w.parent)).unwrap();
        assert_eq!(
            check.blocking,
            vec![BlockingReference::new(
                ReferenceKind::ActiveChildVariant,
                EntityRef::Variant(w.leaf)
            )]
        );
    }

    #[test]
    fn branch_holding_units_is_blocked() {
        let w = world();
        let check = references(&w.state, EntityRef::Branch(w.branch)).unwrap();
        assert_eq!(check.blocking[0].kind, ReferenceKind::HeldStock);
    }

    #[test]
    fn closed_sale_line_keeps_the_unit_for_history() {
        let mut w = world();
        let line = SaleLine::new(
            LineId::new(),
            SaleId::new(),
            w.branch,
            w.leaf,
            Some(w.unit),
            1,
            SaleLineStatus::Completed,
        )
        .unwrap();
        put(&mut w.state, Row::SaleLine(line));

        let check = references(&w.state, EntityRef::Unit(w.unit)).unwrap();
        assert!(check.is_deletable());
        assert!(!check.is_unreferenced());
    }

    #[test]
    fn transfers_are_not_deletable_entities() {
        let w = world();
        let err = references(&w.state, EntityRef::Transfer(TransferId::new())).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
