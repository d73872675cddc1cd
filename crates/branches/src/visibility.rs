//! Visibility resolution under per-branch sharing policies.
//!
//! Rules for a branch `b` and a record `r` of class `c`:
//! - `r` is global (no owner): visible.
//! - `r` is owned by `b`: visible.
//! - otherwise, by `b`'s policy for `c`: `isolated` hides it, `shared` shows it,
//!   `mixed` shows it only when `r` carries the record-level shared flag.
//!
//! Record-level sharing has no effect under `isolated`.

use std::collections::BTreeSet;

use uuid::Uuid;

use branchstock_core::{BranchId, EngineResult, Entity};

use crate::branch::{Branch, ResourceClass, SharingPolicy};

/// A record with branch ownership attributes.
pub trait Scoped {
    /// Identifier reported in resolution results.
    fn scope_id(&self) -> Uuid;

    /// Owning branch; `None` means global.
    fn owner(&self) -> Option<BranchId>;

    /// Record-level shared flag (consulted under `mixed`).
    fn is_shared(&self) -> bool;

    /// Logically deleted records are never visible.
    fn is_active(&self) -> bool {
        true
    }
}

/// Whether `branch` may read/write `record` of `class`.
pub fn can_access<T: Scoped + ?Sized>(branch: &Branch, class: ResourceClass, record: &T) -> bool {
    if !record.is_active() {
        return false;
    }
    match record.owner() {
        None => true,
        Some(owner) if owner == branch.id() => true,
        Some(_) => match branch.policy(class) {
            SharingPolicy::Isolated => false,
            SharingPolicy::Shared => true,
            SharingPolicy::Mixed => record.is_shared(),
        },
    }
}

/// Resolve the set of record ids of `class` visible to `branch`.
///
/// Fails with `UnknownBranch` when the branch is inactive. The result is ordered
/// and duplicate-free, so it is deterministic for a given snapshot.
pub fn resolve_visible<'a, T, I>(
    branch: &Branch,
    class: ResourceClass,
    records: I,
) -> EngineResult<BTreeSet<Uuid>>
where
    T: Scoped + 'a,
    I: IntoIterator<Item = &'a T>,
{
    branch.ensure_active()?;
    Ok(records
        .into_iter()
        .filter(|r| can_access(branch, class, *r))
        .map(Scoped::scope_id)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::SharingPolicies;
    use crate::record::SharedRecord;
    use branchstock_core::{EngineError, RecordId};
    use proptest::prelude::*;

    fn branch(policy: SharingPolicy) -> Branch {
        Branch::new(BranchId::new(), "Branch", SharingPolicies::uniform(policy)).unwrap()
    }

    fn customer(owner: Option<BranchId>, shared: bool) -> SharedRecord {
        let mut r = SharedRecord::new(RecordId::new(), ResourceClass::Customer, "Customer", owner).unwrap();
        r.set_shared(shared);
        r
    }

    fn uuid_of(r: &SharedRecord) -> Uuid {
        r.scope_id()
    }

    #[test]
    fn isolated_branch_never_sees_foreign_records_even_if_flagged_shared() {
        let a = branch(SharingPolicy::Isolated);
        let other = BranchId::new();
        let own = customer(Some(a.id()), false);
        let foreign_shared = customer(Some(other), true);
        let foreign_private = customer(Some(other), false);

        let visible = resolve_visible(
            &a,
            ResourceClass::Customer,
            [&own, &foreign_shared, &foreign_private],
        )
        .unwrap();

        assert_eq!(visible, BTreeSet::from([uuid_of(&own)]));
    }

    #[test]
    fn mixed_branch_sees_own_and_flagged_records() {
        let a = branch(SharingPolicy::Mixed);
        let other = BranchId::new();
        let own = customer(Some(a.id()), false);
        let foreign_shared = customer(Some(other), true);
        let foreign_private = customer(Some(other), false);

        let visible = resolve_visible(
            &a,
            ResourceClass::Customer,
            [&own, &foreign_shared, &foreign_private],
        )
        .unwrap();

        assert_eq!(visible, BTreeSet::from([uuid_of(&own), uuid_of(&foreign_shared)]));
    }

    #[test]
    fn shared_branch_sees_everything_of_the_class() {
        let a = branch(SharingPolicy::Shared);
        let other = BranchId::new();
        let records = [customer(Some(other), false), customer(Some(a.id()), false)];

        let visible = resolve_visible(&a, ResourceClass::Customer, records.iter()).unwrap();
        assert_eq!(visible.len(), 2);
    }

    #[test]
    fn global_records_are_visible_under_every_policy() {
        let global = customer(None, false);
        for policy in [SharingPolicy::Isolated, SharingPolicy::Shared, SharingPolicy::Mixed] {
            let b = branch(policy);
            let visible = resolve_visible(&b, ResourceClass::Customer, [&global]).unwrap();
            assert!(visible.contains(&uuid_of(&global)));
        }
    }

    #[test]
    fn inactive_records_are_hidden() {
        let a = branch(SharingPolicy::Shared);
        let mut gone = customer(Some(a.id()), false);
        gone.deactivate();
        assert!(!can_access(&a, ResourceClass::Customer, &gone));
    }

    #[test]
    fn inactive_branch_fails_instead_of_returning_empty() {
        let mut a = branch(SharingPolicy::Shared);
        a.deactivate();
        let err = resolve_visible::<SharedRecord, _>(&a, ResourceClass::Customer, []).unwrap_err();
        assert_eq!(err, EngineError::UnknownBranch(a.id()));
    }

    proptest! {
        /// Property: under `isolated`, every visible record is global or owned by the branch,
        /// regardless of record-level flags.
        #[test]
        fn isolated_resolution_only_returns_own_or_global(
            layout in prop::collection::vec((0u8..3, any::<bool>()), 0..40)
        ) {
            let a = branch(SharingPolicy::Isolated);
            let other = BranchId::new();
            let records: Vec<SharedRecord> = layout
                .iter()
                .map(|(owner, shared)| {
                    let owner = match owner {
                        0 => None,
                        1 => Some(a.id()),
                        _ => Some(other),
                    };
                    customer(owner, *shared)
                })
                .collect();

            let visible = resolve_visible(&a, ResourceClass::Customer, records.iter()).unwrap();
            for r in &records {
                let expected = r.owner().is_none() || r.owner() == Some(a.id());
                prop_assert_eq!(visible.contains(&r.scope_id()), expected);
            }
        }
    }
}
