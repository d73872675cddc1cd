//! Pure aggregation rules.
//!
//! - A parent's quantity at a branch is the sum of its **active** children's
//!   quantities at that branch (children may themselves be parents).
//! - A product's total at a branch is the sum of its **active leaf** variants, so
//!   each piece of stock is counted exactly once however deep the hierarchy is.
//! - A unit-tracked leaf's quantity is the number of its available units.

use std::collections::HashSet;

use branchstock_core::{EngineError, EngineResult, Entity, VariantId};

use crate::unit::{InventoryUnit, UnitStatus};
use crate::variant::Variant;

/// On-hand delta of a unit moving from `from` to `to`.
pub fn status_delta(from: UnitStatus, to: UnitStatus) -> i64 {
    to.contribution() - from.contribution()
}

/// Sum of the active children's quantities. Zero children yields zero.
pub fn parent_quantity<'a, I>(children: I) -> i64
where
    I: IntoIterator<Item = (&'a Variant, i64)>,
{
    children
        .into_iter()
        .filter(|(child, _)| child.is_active())
        .map(|(_, qty)| qty)
        .sum()
}

/// Sum of the quantities of active leaf variants.
pub fn product_total<'a, I>(variants: I) -> i64
where
    I: IntoIterator<Item = (&'a Variant, i64)>,
{
    variants
        .into_iter()
        .filter(|(v, _)| v.is_active() && v.is_leaf())
        .map(|(_, qty)| qty)
        .sum()
}

/// Number of units contributing to on-hand quantity.
pub fn available_units<'a, I>(units: I) -> i64
where
    I: IntoIterator<Item = &'a InventoryUnit>,
{
    units.into_iter().map(|u| u.status().contribution()).sum()
}

/// Ancestors of `start`, nearest first.
///
/// Fails with `DataIntegrityDefect` if the parent chain loops.
pub fn ancestor_chain<F>(start: VariantId, parent_of: F) -> EngineResult<Vec<VariantId>>
where
    F: Fn(VariantId) -> Option<VariantId>,
{
    let mut seen = HashSet::from([start]);
    let mut chain = Vec::new();
    let mut current = start;
    while let Some(parent) = parent_of(current) {
        if !seen.insert(parent) {
            return Err(EngineError::integrity(format!(
                "variant hierarchy cycle through {parent}"
            )));
        }
        chain.push(parent);
        current = parent;
    }
    Ok(chain)
}

/// Children of `parent` among `variants`.
pub fn children_of<'a, I>(parent: VariantId, variants: I) -> impl Iterator<Item = &'a Variant>
where
    I: IntoIterator<Item = &'a Variant>,
{
    variants
        .into_iter()
        .filter(move |v| v.parent_id() == Some(parent) && v.id() != parent)
}
