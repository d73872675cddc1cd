use serde::{Deserialize, Serialize};

use branchstock_branches::Scoped;
use branchstock_core::{BranchId, EngineError, EngineResult, Entity, ProductId, VariantId};

/// How a variant's quantity is obtained.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    /// Quantity is derived from active child variants; never authoritative.
    Parent,
    /// Leaf whose quantity is the number of available inventory units.
    UnitTracked,
    /// Leaf whose quantity is adjusted directly.
    QuantityTracked,
}

/// A sellable configuration of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    id: VariantId,
    product_id: ProductId,
    parent_id: Option<VariantId>,
    sku: String,
    kind: VariantKind,
    active: bool,
    branch_owner: Option<BranchId>,
    shared: bool,
}

impl Variant {
    pub fn new(
        id: VariantId,
        product_id: ProductId,
        sku: impl Into<String>,
        kind: VariantKind,
    ) -> EngineResult<Self> {
        let sku = sku.into();
        if sku.trim().is_empty() {
            return Err(EngineError::validation("sku cannot be empty"));
        }
        Ok(Self {
            id,
            product_id,
            parent_id: None,
            sku,
            kind,
            active: true,
            branch_owner: None,
            shared: false,
        })
    }

    pub fn with_parent(mut self, parent_id: VariantId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn owned_by(mut self, branch: BranchId) -> Self {
        self.branch_owner = Some(branch);
        self
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn parent_id(&self) -> Option<VariantId> {
        self.parent_id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn kind(&self) -> VariantKind {
        self.kind
    }

    pub fn is_parent(&self) -> bool {
        self.kind == VariantKind::Parent
    }

    pub fn is_leaf(&self) -> bool {
        !self.is_parent()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn branch_owner(&self) -> Option<BranchId> {
        self.branch_owner
    }

    pub fn set_shared(&mut self, shared: bool) {
        self.shared = shared;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn ensure_active(&self) -> EngineResult<()> {
        if self.active {
            Ok(())
        } else {
            Err(EngineError::validation(format!("variant {} is inactive", self.id)))
        }
    }

    /// Fails with `NotAParent` unless this is a parent variant.
    pub fn ensure_parent(&self) -> EngineResult<()> {
        if self.is_parent() {
            Ok(())
        } else {
            Err(EngineError::NotAParent(self.id))
        }
    }
}

impl Entity for Variant {
    type Id = VariantId;

    fn id(&self) -> VariantId {
        self.id
    }
}

impl Scoped for Variant {
    fn scope_id(&self) -> uuid::Uuid {
        *self.id.as_uuid()
    }

    fn owner(&self) -> Option<BranchId> {
        self.branch_owner
    }

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_parent_rejects_leaves() {
        let id = VariantId::new();
        let leaf = Variant::new(id, ProductId::new(), "LEAF", VariantKind::QuantityTracked).unwrap();
        assert_eq!(leaf.ensure_parent(), Err(EngineError::NotAParent(id)));
    }

    #[test]
    fn builders_set_parent_and_owner() {
        let parent = VariantId::new();
        let branch = BranchId::new();
        let v = Variant::new(VariantId::new(), ProductId::new(), "C1", VariantKind::UnitTracked)
            .unwrap()
            .with_parent(parent)
            .owned_by(branch);

        assert_eq!(v.parent_id(), Some(parent));
        assert_eq!(v.branch_owner(), Some(branch));
        assert!(v.is_leaf());
    }
}
