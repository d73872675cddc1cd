//! Visibility resolution and write authorization against a store snapshot.

use std::collections::BTreeSet;

use serde_json::Value as JsonValue;
use uuid::Uuid;

use branchstock_branches::{Branch, ResourceClass, can_access, resolve_visible};
use branchstock_core::{BranchId, EngineError, EngineResult, Entity, EntityRef, UnitId, VariantId};
use branchstock_events::{EventBus, EventEnvelope};
use branchstock_inventory::{InventoryUnit, Variant};

use crate::store::{EntityStore, StoreState};

use super::StockEngine;

/// Fail with `DataIntegrityDefect` if any product carries a branch owner.
pub(crate) fn ensure_products_global(state: &StoreState) -> EngineResult<()> {
    state.products().try_for_each(|p| p.ensure_global())
}

/// Ids of `class` records visible to `branch` in `state`.
pub(crate) fn visible_ids(
    state: &StoreState,
    branch: BranchId,
    class: ResourceClass,
) -> EngineResult<BTreeSet<Uuid>> {
    let branch = state.active_branch(branch)?;
    match class {
        ResourceClass::Product => {
            ensure_products_global(state)?;
            resolve_visible(branch, class, state.products())
        }
        _ => resolve_visible(
            branch,
            class,
            state.records().filter(|r| r.class() == class),
        ),
    }
}

/// The acting branch and the variant, provided the branch may write it.
///
/// Variants are governed by the branch's `product` policy. The variant's
/// product must be global.
pub(crate) fn writable_variant<'s>(
    state: &'s StoreState,
    branch: BranchId,
    variant: VariantId,
) -> EngineResult<(&'s Branch, &'s Variant)> {
    let branch = state.active_branch(branch)?;
    let variant = state.require_variant(variant)?;
    variant.ensure_active()?;
    state.require_product(variant.product_id())?.ensure_global()?;

    if !can_access(branch, ResourceClass::Product, variant) {
        return Err(EngineError::AccessDenied {
            branch: branch.id(),
            entity: EntityRef::Variant(variant.id()),
        });
    }
    Ok((branch, variant))
}

/// The unit, provided it is owned by the acting branch.
pub(crate) fn owned_unit(
    state: &StoreState,
    branch: BranchId,
    unit: UnitId,
) -> EngineResult<&InventoryUnit> {
    let found = state.require_unit(unit)?;
    if found.branch() != branch {
        return Err(EngineError::AccessDenied {
            branch,
            entity: EntityRef::Unit(unit),
        });
    }
    Ok(found)
}

impl<S, B> StockEngine<S, B>
where
    S: EntityStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Ids of `class` records visible to `branch` (ordered, duplicate-free).
    ///
    /// Reads one snapshot; a policy change committed concurrently may or may
    /// not be reflected.
    pub fn resolve_visible(&self, branch: BranchId, class: ResourceClass) -> EngineResult<BTreeSet<Uuid>> {
        let snapshot = self.store().snapshot()?;
        visible_ids(&snapshot, branch, class)
    }

    /// Variants visible to `branch` under its product policy.
    pub fn resolve_visible_variants(&self, branch: BranchId) -> EngineResult<BTreeSet<VariantId>> {
        let snapshot = self.store().snapshot()?;
        let acting = snapshot.active_branch(branch)?;
        ensure_products_global(&snapshot)?;
        Ok(snapshot
            .variants()
            .filter(|v| can_access(acting, ResourceClass::Product, *v))
            .map(|v| v.id())
            .collect())
    }

    /// `Ok` when `branch` may write `variant`; `AccessDenied` otherwise.
    pub fn ensure_variant_visible(&self, branch: BranchId, variant: VariantId) -> EngineResult<()> {
        let snapshot = self.store().snapshot()?;
        writable_variant(&snapshot, branch, variant).map(|_| ())
    }
}
