use serde::{Deserialize, Serialize};

use branchstock_branches::Scoped;
use branchstock_core::{BranchId, EngineError, EngineResult, Entity, ProductId};

/// A catalog entry. Products are always global.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    sku: String,
    name: String,
    active: bool,
    /// Only ever populated by legacy or imported data; a populated owner is a defect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    branch_owner: Option<BranchId>,
}

impl Product {
    pub fn new(id: ProductId, sku: impl Into<String>, name: impl Into<String>) -> EngineResult<Self> {
        let sku = sku.into();
        let name = name.into();
        if sku.trim().is_empty() {
            return Err(EngineError::validation("sku cannot be empty"));
        }
        if name.trim().is_empty() {
            return Err(EngineError::validation("name cannot be empty"));
        }
        Ok(Self {
            id,
            sku,
            name,
            active: true,
            branch_owner: None,
        })
    }

    /// Rebuild a product as it was found in legacy data, owner included.
    pub fn with_legacy_owner(mut self, owner: BranchId) -> Self {
        self.branch_owner = Some(owner);
        self
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn branch_owner(&self) -> Option<BranchId> {
        self.branch_owner
    }

    /// Fails with `DataIntegrityDefect` if the product carries a branch owner.
    pub fn ensure_global(&self) -> EngineResult<()> {
        match self.branch_owner {
            None => Ok(()),
            Some(owner) => Err(EngineError::integrity(format!(
                "product {} carries branch owner {owner}",
                self.id
            ))),
        }
    }

    /// Drop a stray owner, returning what was removed.
    pub fn clear_branch_owner(&mut self) -> Option<BranchId> {
        self.branch_owner.take()
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> ProductId {
        self.id
    }
}

impl Scoped for Product {
    fn scope_id(&self) -> uuid::Uuid {
        *self.id.as_uuid()
    }

    // Ownership never applies to products.
    fn owner(&self) -> Option<BranchId> {
        None
    }

    fn is_shared(&self) -> bool {
        true
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_products_are_global() {
        let p = Product::new(ProductId::new(), "SKU-1", "Phone").unwrap();
        assert_eq!(p.branch_owner(), None);
        assert!(p.ensure_global().is_ok());
    }

    #[test]
    fn legacy_owner_is_reported_as_integrity_defect() {
        let mut p = Product::new(ProductId::new(), "SKU-1", "Phone")
            .unwrap()
            .with_legacy_owner(BranchId::new());

        assert!(matches!(p.ensure_global(), Err(EngineError::DataIntegrityDefect(_))));
        assert!(p.clear_branch_owner().is_some());
        assert!(p.ensure_global().is_ok());
    }

    #[test]
    fn rejects_blank_sku() {
        assert!(Product::new(ProductId::new(), "", "Phone").is_err());
    }
}
