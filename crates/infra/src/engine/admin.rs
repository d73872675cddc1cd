//! Branch administration and catalog setup.

use serde_json::Value as JsonValue;

use branchstock_branches::{
    Branch, ResourceClass, Scoped, SharedRecord, SharingPolicies, SharingPolicy,
};
use branchstock_core::{
    BranchId, EngineError, EngineResult, Entity, EntityRef, ProductId, RecordId, VariantId,
};
use branchstock_events::{EventBus, EventEnvelope};
use branchstock_inventory::{Product, Variant, VariantKind};

use crate::store::{ChangeSet, EntityStore, Row};

use super::{Plan, StockEngine};

/// Catalog entry for a new variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVariant {
    pub product_id: ProductId,
    pub parent_id: Option<VariantId>,
    pub sku: String,
    pub kind: VariantKind,
    /// Branch that owns the variant; `None` makes it global.
    pub owner: Option<BranchId>,
    /// Visible to `mixed` branches other than the owner.
    pub shared: bool,
}

impl<S, B> StockEngine<S, B>
where
    S: EntityStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn create_branch(&self, name: &str, policies: SharingPolicies) -> EngineResult<BranchId> {
        let branch = Branch::new(BranchId::new(), name, policies)?;
        let id = branch.id();
        self.execute("create_branch", |_| {
            let mut changes = ChangeSet::new();
            changes.insert(Row::Branch(branch.clone()));
            Ok(Plan::new(changes, id))
        })
    }

    /// Change one resource class's policy. Takes effect for resolutions that
    /// start after the commit.
    pub fn set_sharing_policy(
        &self,
        branch: BranchId,
        class: ResourceClass,
        policy: SharingPolicy,
    ) -> EngineResult<()> {
        self.execute("set_sharing_policy", |state| {
            let mut updated = state.active_branch(branch)?.clone();
            updated.set_policy(class, policy);
            let mut changes = ChangeSet::new();
            changes.put(state, Row::Branch(updated));
            Ok(Plan::new(changes, ()))
        })
    }

    /// Create a global catalog product. SKUs are unique across products; the
    /// store rejects a duplicate at commit time as well.
    pub fn create_product(&self, sku: &str, name: &str) -> EngineResult<ProductId> {
        let product = Product::new(ProductId::new(), sku.trim(), name)?;
        let id = product.id();
        self.execute("create_product", |state| {
            if state.products().any(|p| p.sku() == product.sku()) {
                return Err(EngineError::validation(format!(
                    "product sku '{}' already exists",
                    product.sku()
                )));
            }
            let mut changes = ChangeSet::new();
            changes.insert(Row::Product(product.clone()));
            Ok(Plan::new(changes, id))
        })
    }

    /// Add a variant under an active product, optionally below a parent variant
    /// of the same product.
    ///
    /// The product row and the parent row are rewritten, not only read, so a
    /// concurrent `delete_product` or `delete_variant` of the parent conflicts
    /// with this commit instead of deciding on a snapshot without the new child.
    pub fn create_variant(&self, new: NewVariant) -> EngineResult<VariantId> {
        let mut variant = Variant::new(VariantId::new(), new.product_id, new.sku.trim(), new.kind)?;
        if let Some(parent) = new.parent_id {
            variant = variant.with_parent(parent);
        }
        if let Some(owner) = new.owner {
            variant = variant.owned_by(owner);
        }
        variant.set_shared(new.shared);
        let id = variant.id();

        self.execute("create_variant", |state| {
            let product = state.require_product(new.product_id)?;
            product.ensure_global()?;
            if !product.is_active() {
                return Err(EngineError::validation(format!(
                    "product {} is inactive",
                    new.product_id
                )));
            }
            if state.variants().any(|v| v.sku() == variant.sku()) {
                return Err(EngineError::validation(format!(
                    "variant sku '{}' already exists",
                    variant.sku()
                )));
            }
            if let Some(owner) = new.owner {
                state.active_branch(owner)?;
            }

            let mut changes = ChangeSet::new();
            changes.put(state, Row::Product(product.clone()));
            if let Some(parent_id) = new.parent_id {
                let parent = state.require_variant(parent_id)?;
                parent.ensure_parent()?;
                parent.ensure_active()?;
                if parent.product_id() != new.product_id {
                    return Err(EngineError::validation(format!(
                        "parent variant {parent_id} belongs to another product"
                    )));
                }
                changes.put(state, Row::Variant(parent.clone()));
            }

            changes.insert(Row::Variant(variant.clone()));
            Ok(Plan::new(changes, id))
        })
    }

    /// Change a variant's shared flag. Only the owning branch may do so.
    pub fn set_variant_sharing(&self, branch: BranchId, variant: VariantId, shared: bool) -> EngineResult<()> {
        self.execute("set_variant_sharing", |state| {
            state.active_branch(branch)?;
            let found = state.require_variant(variant)?;
            ensure_owner(branch, found, EntityRef::Variant(variant))?;
            let mut updated = found.clone();
            updated.set_shared(shared);
            let mut changes = ChangeSet::new();
            changes.put(state, Row::Variant(updated));
            Ok(Plan::new(changes, ()))
        })
    }

    /// Register a customer, supplier or account record.
    pub fn register_record(
        &self,
        class: ResourceClass,
        name: &str,
        owner: Option<BranchId>,
    ) -> EngineResult<RecordId> {
        let record = SharedRecord::new(RecordId::new(), class, name, owner)?;
        let id = record.id();
        self.execute("register_record", |state| {
            if let Some(owner) = owner {
                state.active_branch(owner)?;
            }
            let mut changes = ChangeSet::new();
            changes.insert(Row::Record(record.clone()));
            Ok(Plan::new(changes, id))
        })
    }

    /// Change a record's shared flag. Only the owning branch may do so.
    pub fn set_record_sharing(&self, branch: BranchId, record: RecordId, shared: bool) -> EngineResult<()> {
        self.execute("set_record_sharing", |state| {
            state.active_branch(branch)?;
            let entity = EntityRef::Record(record);
            let found = state.record(record).ok_or(EngineError::NotFound(entity))?;
            ensure_owner(branch, found, entity)?;
            let mut updated = found.clone();
            updated.set_shared(shared);
            let mut changes = ChangeSet::new();
            changes.put(state, Row::Record(updated));
            Ok(Plan::new(changes, ()))
        })
    }
}

/// Sharing flags belong to the owner; global entries have none to change.
fn ensure_owner(branch: BranchId, scoped: &impl Scoped, entity: EntityRef) -> EngineResult<()> {
    if scoped.owner() == Some(branch) {
        Ok(())
    } else {
        Err(EngineError::AccessDenied { branch, entity })
    }
}
