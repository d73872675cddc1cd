//! Stock aggregation: leaf changes, derived parent levels and product totals.
//!
//! Every quantity change goes through a [`StockPlan`]. The plan collects leaf
//! changes, then walks each touched leaf's parent chain bottom-up and
//! recomputes every affected parent and product total against the same
//! snapshot. All stock writes and their movements land in one `ChangeSet`.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value as JsonValue;
use tracing::debug;

use branchstock_core::{
    ActorId, BranchId, EngineError, EngineResult, Entity, EntityRef, ProductId, UnitId, VariantId,
};
use branchstock_events::{EventBus, EventEnvelope};
use branchstock_inventory::aggregation;
use branchstock_inventory::{UnitStatus, Variant, VariantKind};
use branchstock_ledger::{MovementReason, NewMovement, StockKey};

use crate::store::{ChangeSet, EntityStore, Row, RowKey, StoreState};

use super::visibility::{owned_unit, writable_variant};
use super::{Plan, StockEngine};

/// Quantity planner for one operation attempt.
pub(crate) struct StockPlan<'s> {
    state: &'s StoreState,
    actor: ActorId,
    derived_reason: MovementReason,
    levels: BTreeMap<StockKey, i64>,
    reasons: BTreeMap<StockKey, MovementReason>,
    variants: BTreeMap<VariantId, Variant>,
    /// Variants whose ancestors and product total must be recomputed.
    touched: BTreeSet<(VariantId, BranchId)>,
    /// Parents recomputed explicitly, descendants included.
    recompute: BTreeSet<(VariantId, BranchId)>,
}

impl<'s> StockPlan<'s> {
    pub fn new(state: &'s StoreState, actor: ActorId) -> Self {
        Self {
            state,
            actor,
            derived_reason: MovementReason::Aggregation,
            levels: BTreeMap::new(),
            reasons: BTreeMap::new(),
            variants: BTreeMap::new(),
            touched: BTreeSet::new(),
            recompute: BTreeSet::new(),
        }
    }

    /// Reason recorded on movements of derived (parent and product) keys.
    pub fn derived_reason(mut self, reason: MovementReason) -> Self {
        self.derived_reason = reason;
        self
    }

    /// The variant as this plan sees it (pending replacements first).
    pub fn variant(&self, id: VariantId) -> EngineResult<&Variant> {
        match self.variants.get(&id) {
            Some(v) => Ok(v),
            None => self.state.require_variant(id),
        }
    }

    /// Planned level of a stock position.
    pub fn level(&self, key: &StockKey) -> i64 {
        self.levels
            .get(key)
            .copied()
            .unwrap_or_else(|| self.state.level(key))
    }

    /// Move a leaf's level at `branch` by `delta`. Returns the new level.
    pub fn shift_leaf(
        &mut self,
        variant: VariantId,
        branch: BranchId,
        delta: i64,
        reason: MovementReason,
    ) -> EngineResult<i64> {
        if self.variant(variant)?.is_parent() {
            return Err(EngineError::validation(format!(
                "variant {variant} is a parent; its quantity is derived from its children"
            )));
        }
        let key = StockKey::variant(variant, branch);
        let next = self.level(&key) + delta;
        if next < 0 {
            return Err(EngineError::validation(format!(
                "stock for {key} would become negative ({next})"
            )));
        }
        self.levels.insert(key, next);
        self.reasons.insert(key, reason);
        self.touched.insert((variant, branch));
        Ok(next)
    }

    /// Replace a variant row (e.g. deactivated) and re-aggregate it everywhere.
    pub fn replace_variant(&mut self, variant: Variant) {
        let id = variant.id();
        self.variants.insert(id, variant);
        let branches: Vec<BranchId> = self.state.branches().map(|b| b.id()).collect();
        for branch in branches {
            self.touched.insert((id, branch));
        }
    }

    /// Recompute `parent` at `branch` from scratch, nested parents first.
    pub fn recompute(&mut self, parent: VariantId, branch: BranchId) -> EngineResult<()> {
        self.variant(parent)?.ensure_parent()?;

        let mut seen = BTreeSet::from([parent]);
        let mut stack = vec![parent];
        while let Some(current) = stack.pop() {
            for child in self.children(current) {
                if !child.is_parent() {
                    continue;
                }
                if !seen.insert(child.id()) {
                    return Err(EngineError::integrity(format!(
                        "variant hierarchy cycle through {}",
                        child.id()
                    )));
                }
                stack.push(child.id());
            }
        }

        self.recompute.extend(seen.into_iter().map(|p| (p, branch)));
        self.touched.insert((parent, branch));
        Ok(())
    }

    fn children(&self, parent: VariantId) -> Vec<&Variant> {
        self.state
            .children(parent)
            .map(|c| self.variants.get(&c.id()).unwrap_or(c))
            .collect()
    }

    fn ancestors(&self, variant: VariantId) -> EngineResult<Vec<VariantId>> {
        aggregation::ancestor_chain(variant, |id| {
            self.variant(id).ok().and_then(|v| v.parent_id())
        })
    }

    /// Derive every affected parent and product level, then write each changed
    /// key with its movement. Unchanged derived keys become read assertions.
    pub fn finish(mut self, changes: &mut ChangeSet) -> EngineResult<BTreeMap<StockKey, i64>> {
        let origins: Vec<(VariantId, BranchId)> =
            self.touched.iter().chain(&self.recompute).copied().collect();

        let mut parents = self.recompute.clone();
        let mut products: BTreeSet<(ProductId, BranchId)> = BTreeSet::new();
        for (variant, branch) in origins {
            products.insert((self.variant(variant)?.product_id(), branch));
            changes.expect(self.state, RowKey::Branch(branch));
            changes.expect(self.state, RowKey::Variant(variant));
            for ancestor in self.ancestors(variant)? {
                parents.insert((ancestor, branch));
            }
        }

        // Deepest first, so each parent sums already-updated children.
        let mut ordered = Vec::with_capacity(parents.len());
        for (parent, branch) in parents {
            ordered.push((self.ancestors(parent)?.len(), parent, branch));
        }
        ordered.sort_by_key(|(depth, parent, branch)| (Reverse(*depth), *parent, *branch));

        for (_, parent, branch) in ordered {
            changes.expect(self.state, RowKey::Variant(parent));
            let quantity = aggregation::parent_quantity(
                self.children(parent)
                    .into_iter()
                    .map(|c| (c, self.level(&StockKey::variant(c.id(), branch)))),
            );
            self.set_derived(StockKey::variant(parent, branch), quantity);
        }

        for (product, branch) in products {
            let total = {
                let variants: Vec<&Variant> = self
                    .state
                    .variants()
                    .filter(|v| v.product_id() == product)
                    .map(|v| self.variants.get(&v.id()).unwrap_or(v))
                    .collect();
                aggregation::product_total(
                    variants
                        .into_iter()
                        .map(|v| (v, self.level(&StockKey::variant(v.id(), branch)))),
                )
            };
            self.set_derived(StockKey::product(product, branch), total);
        }

        let correlation_id = changes.correlation_id();
        for (key, &quantity) in &self.levels {
            let previous = self.state.level(key);
            if quantity == previous {
                changes.expect(self.state, RowKey::Stock(*key));
                continue;
            }
            let reason = self
                .reasons
                .get(key)
                .copied()
                .unwrap_or(self.derived_reason);
            changes.put(self.state, Row::Stock(*key, quantity));
            changes.record(NewMovement::new(
                *key,
                previous,
                quantity,
                reason,
                self.actor,
                correlation_id,
            ));
        }

        debug!(
            correlation_id = %correlation_id,
            keys = self.levels.len(),
            movements = changes.movements().len(),
            "stock plan finished"
        );
        Ok(self.levels)
    }

    fn set_derived(&mut self, key: StockKey, quantity: i64) {
        self.levels.insert(key, quantity);
        self.reasons.entry(key).or_insert(self.derived_reason);
    }
}

/// Movement reason implied by a unit status change.
pub(crate) fn reason_for(from: UnitStatus, to: UnitStatus) -> MovementReason {
    match (from, to) {
        (_, UnitStatus::Reserved) => MovementReason::Reservation,
        (UnitStatus::Reserved, UnitStatus::Available) => MovementReason::ReservationRelease,
        (_, UnitStatus::Sold) => MovementReason::Sale,
        (_, UnitStatus::Returned) => MovementReason::Return,
        (UnitStatus::Returned, UnitStatus::Available) => MovementReason::Restock,
        (_, UnitStatus::Disposed) => MovementReason::Disposal,
        _ => MovementReason::Adjustment,
    }
}

/// A status change on one inventory unit, carrying its ±1 stock delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitQuantityChange {
    pub branch: BranchId,
    pub unit_id: UnitId,
    pub to: UnitStatus,
    pub actor: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitChangeOutcome {
    pub unit_id: UnitId,
    pub from: UnitStatus,
    pub to: UnitStatus,
    pub delta: i64,
    /// Level of the unit's variant at the branch after the change.
    pub leaf_quantity: i64,
}

impl<S, B> StockEngine<S, B>
where
    S: EntityStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Transition one unit and re-aggregate its variant's parents and product.
    ///
    /// A unit claimed by a transfer fails with `UnitLocked`.
    pub fn apply_unit_quantity_change(&self, change: UnitQuantityChange) -> EngineResult<UnitChangeOutcome> {
        self.execute("apply_unit_quantity_change", |state| {
            let mut unit = owned_unit(state, change.branch, change.unit_id)?.clone();
            writable_variant(state, change.branch, unit.variant_id())?;

            let from = unit.status();
            let delta = unit.transition(change.to)?;

            let mut changes = ChangeSet::new();
            let mut plan = StockPlan::new(state, change.actor);
            let leaf_quantity =
                plan.shift_leaf(unit.variant_id(), change.branch, delta, reason_for(from, change.to))?;
            changes.put(state, Row::Unit(unit));
            plan.finish(&mut changes)?;

            Ok(Plan::new(
                changes,
                UnitChangeOutcome {
                    unit_id: change.unit_id,
                    from,
                    to: change.to,
                    delta,
                    leaf_quantity,
                },
            ))
        })
    }

    /// Add `delta` (possibly negative) to a quantity-tracked leaf.
    ///
    /// Unit-tracked leaves derive their level from units and are rejected, as
    /// is any change that would leave negative stock.
    pub fn adjust_leaf_quantity(
        &self,
        branch: BranchId,
        variant: VariantId,
        delta: i64,
        reason: MovementReason,
        actor: ActorId,
    ) -> EngineResult<i64> {
        if delta == 0 {
            return Err(EngineError::validation("quantity adjustment cannot be zero"));
        }
        self.execute("adjust_leaf_quantity", |state| {
            let (_, found) = writable_variant(state, branch, variant)?;
            match found.kind() {
                VariantKind::QuantityTracked => {}
                VariantKind::UnitTracked => {
                    return Err(EngineError::validation(format!(
                        "variant {variant} is unit-tracked; change its units instead"
                    )));
                }
                VariantKind::Parent => {
                    return Err(EngineError::validation(format!(
                        "variant {variant} is a parent; its quantity is derived from its children"
                    )));
                }
            }

            let mut changes = ChangeSet::new();
            let mut plan = StockPlan::new(state, actor);
            let quantity = plan.shift_leaf(variant, branch, delta, reason)?;
            plan.finish(&mut changes)?;
            Ok(Plan::new(changes, quantity))
        })
    }

    /// Recompute a parent's level at `branch` from its active children.
    ///
    /// Nested parents are recomputed first and ancestors after; a leaf fails
    /// with `NotAParent`. Only differences from the stored levels are written.
    pub fn recompute_parent_quantity(
        &self,
        parent: VariantId,
        branch: BranchId,
        actor: ActorId,
    ) -> EngineResult<i64> {
        self.execute("recompute_parent_quantity", |state| {
            writable_variant(state, branch, parent)?;

            let mut changes = ChangeSet::new();
            let mut plan = StockPlan::new(state, actor).derived_reason(MovementReason::Recompute);
            plan.recompute(parent, branch)?;
            let levels = plan.finish(&mut changes)?;

            let quantity = levels
                .get(&StockKey::variant(parent, branch))
                .copied()
                .unwrap_or(0);
            Ok(Plan::new(changes, quantity))
        })
    }

    /// Committed level of a variant at a branch.
    pub fn variant_quantity(&self, variant: VariantId, branch: BranchId) -> EngineResult<i64> {
        let snapshot = self.store().snapshot()?;
        snapshot.require_variant(variant)?;
        Ok(snapshot.level(&StockKey::variant(variant, branch)))
    }

    /// Committed product total at a branch.
    pub fn product_quantity(&self, product: ProductId, branch: BranchId) -> EngineResult<i64> {
        let snapshot = self.store().snapshot()?;
        if snapshot.product(product).is_none() {
            return Err(EngineError::NotFound(EntityRef::Product(product)));
        }
        Ok(snapshot.level(&StockKey::product(product, branch)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchstock_inventory::Product;

    struct Catalog {
        state: StoreState,
        product: ProductId,
        root: VariantId,
        mid: VariantId,
        leaf_a: VariantId,
        leaf_b: VariantId,
        branch: BranchId,
    }

    fn put(state: &mut StoreState, row: Row) {
        state.apply(row.key(), Some(row)).unwrap();
    }

    // root -> mid -> {leaf_a, leaf_b}
    fn catalog() -> Catalog {
        let mut state = StoreState::default();
        let product = Product::new(ProductId::new(), "PHONE", "Phone").unwrap();
        let root = Variant::new(VariantId::new(), product.id(), "ROOT", VariantKind::Parent).unwrap();
        let mid = Variant::new(VariantId::new(), product.id(), "MID", VariantKind::Parent)
            .unwrap()
            .with_parent(root.id());
        let leaf_a = Variant::new(VariantId::new(), product.id(), "A", VariantKind::QuantityTracked)
            .unwrap()
            .with_parent(mid.id());
        let leaf_b = Variant::new(VariantId::new(), product.id(), "B", VariantKind::QuantityTracked)
            .unwrap()
            .with_parent(mid.id());

        let ids = (product.id(), root.id(), mid.id(), leaf_a.id(), leaf_b.id());
        put(&mut state, Row::Product(product));
        for v in [root, mid, leaf_a, leaf_b] {
            put(&mut state, Row::Variant(v));
        }
        Catalog {
            state,
            product: ids.0,
            root: ids.1,
            mid: ids.2,
            leaf_a: ids.3,
            leaf_b: ids.4,
            branch: BranchId::new(),
        }
    }

    #[test]
    fn leaf_change_rolls_up_through_every_ancestor() {
        let c = catalog();
        let mut changes = ChangeSet::new();
        let mut plan = StockPlan::new(&c.state, ActorId::new());
        plan.shift_leaf(c.leaf_a, c.branch, 3, MovementReason::Receipt).unwrap();
        let levels = plan.finish(&mut changes).unwrap();

        assert_eq!(levels[&StockKey::variant(c.mid, c.branch)], 3);
        assert_eq!(levels[&StockKey::variant(c.root, c.branch)], 3);
        assert_eq!(levels[&StockKey::product(c.product, c.branch)], 3);
        assert_eq!(changes.movements().len(), 4);
        assert!(
            changes
                .movements()
                .iter()
                .filter(|m| m.key != StockKey::variant(c.leaf_a, c.branch))
                .all(|m| m.reason == MovementReason::Aggregation)
        );
    }

    #[test]
    fn parents_are_never_counted_in_the_product_total() {
        let mut c = catalog();
        put(&mut c.state, Row::Stock(StockKey::variant(c.leaf_b, c.branch), 2));

        let mut changes = ChangeSet::new();
        let mut plan = StockPlan::new(&c.state, ActorId::new());
        plan.shift_leaf(c.leaf_a, c.branch, 1, MovementReason::Receipt).unwrap();
        let levels = plan.finish(&mut changes).unwrap();

        assert_eq!(levels[&StockKey::variant(c.mid, c.branch)], 3);
        assert_eq!(levels[&StockKey::product(c.product, c.branch)], 3);
    }

    #[test]
    fn deactivated_child_drops_out_of_its_parent() {
        let mut c = catalog();
        put(&mut c.state, Row::Stock(StockKey::variant(c.leaf_a, c.branch), 4));
        put(&mut c.state, Row::Stock(StockKey::variant(c.leaf_b, c.branch), 1));

        let mut gone = c.state.variant(c.leaf_a).unwrap().clone();
        gone.deactivate();
        let mut changes = ChangeSet::new();
        let mut plan = StockPlan::new(&c.state, ActorId::new());
        plan.replace_variant(gone);
        plan.recompute(c.mid, c.branch).unwrap();
        let levels = plan.finish(&mut changes).unwrap();

        assert_eq!(levels[&StockKey::variant(c.mid, c.branch)], 1);
        assert_eq!(levels[&StockKey::product(c.product, c.branch)], 1);
    }

    #[test]
    fn negative_stock_is_rejected() {
        let c = catalog();
        let mut plan = StockPlan::new(&c.state, ActorId::new());
        let err = plan
            .shift_leaf(c.leaf_a, c.branch, -1, MovementReason::Sale)
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn parents_cannot_be_shifted_and_leaves_cannot_be_recomputed() {
        let c = catalog();
        let mut plan = StockPlan::new(&c.state, ActorId::new());
        assert!(plan.shift_leaf(c.mid, c.branch, 1, MovementReason::Receipt).is_err());
        assert_eq!(
            plan.recompute(c.leaf_a, c.branch),
            Err(EngineError::NotAParent(c.leaf_a))
        );
    }

    #[test]
    fn net_zero_change_records_no_movement() {
        let c = catalog();
        let mut changes = ChangeSet::new();
        let mut plan = StockPlan::new(&c.state, ActorId::new());
        plan.shift_leaf(c.leaf_a, c.branch, 2, MovementReason::Receipt).unwrap();
        plan.shift_leaf(c.leaf_a, c.branch, -2, MovementReason::Sale).unwrap();
        plan.finish(&mut changes).unwrap();

        assert!(changes.movements().is_empty());
        assert!(changes.is_empty());
        assert!(changes.reads().count() > 0);
    }

    #[test]
    fn hierarchy_cycles_are_integrity_defects() {
        let mut state = StoreState::default();
        let product = ProductId::new();
        let a = VariantId::new();
        let b = VariantId::new();
        let leaf = VariantId::new();
        for v in [
            Variant::new(a, product, "A", VariantKind::Parent).unwrap().with_parent(b),
            Variant::new(b, product, "B", VariantKind::Parent).unwrap().with_parent(a),
            Variant::new(leaf, product, "L", VariantKind::QuantityTracked)
                .unwrap()
                .with_parent(a),
        ] {
            put(&mut state, Row::Variant(v));
        }

        let mut changes = ChangeSet::new();
        let mut plan = StockPlan::new(&state, ActorId::new());
        plan.shift_leaf(leaf, BranchId::new(), 1, MovementReason::Receipt).unwrap();
        let err = plan.finish(&mut changes).unwrap_err();
        assert!(matches!(err, EngineError::DataIntegrityDefect(_)));
    }

    #[test]
    fn unit_status_changes_map_to_reasons() {
        use UnitStatus::*;
        assert_eq!(reason_for(Available, Sold), MovementReason::Sale);
        assert_eq!(reason_for(Available, Reserved), MovementReason::Reservation);
        assert_eq!(reason_for(Reserved, Available), MovementReason::ReservationRelease);
        assert_eq!(reason_for(Returned, Available), MovementReason::Restock);
        assert_eq!(reason_for(Available, Disposed), MovementReason::Disposal);
    }
}
