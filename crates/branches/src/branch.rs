use serde::{Deserialize, Serialize};

use branchstock_core::{BranchId, EngineError, EngineResult, Entity, ValueObject};

/// Class of shareable resource a sharing policy applies to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    Product,
    Customer,
    Supplier,
    Account,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 4] = [
        ResourceClass::Product,
        ResourceClass::Customer,
        ResourceClass::Supplier,
        ResourceClass::Account,
    ];
}

/// Cross-branch visibility rule for one resource class.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharingPolicy {
    /// Only the branch's own records (plus global ones).
    #[default]
    Isolated,
    /// Every branch's records of the class.
    Shared,
    /// Own records plus records other branches flagged as shared.
    Mixed,
}

impl ValueObject for SharingPolicy {}

/// One sharing policy per resource class.
///
/// All four fields are mandatory, so a branch can never have an undefined policy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SharingPolicies {
    pub products: SharingPolicy,
    pub customers: SharingPolicy,
    pub suppliers: SharingPolicy,
    pub accounts: SharingPolicy,
}

impl ValueObject for SharingPolicies {}

impl SharingPolicies {
    /// The same policy for every class.
    pub fn uniform(policy: SharingPolicy) -> Self {
        Self {
            products: policy,
            customers: policy,
            suppliers: policy,
            accounts: policy,
        }
    }

    pub fn get(&self, class: ResourceClass) -> SharingPolicy {
        match class {
            ResourceClass::Product => self.products,
            ResourceClass::Customer => self.customers,
            ResourceClass::Supplier => self.suppliers,
            ResourceClass::Account => self.accounts,
        }
    }

    /// Returns a copy with `class` set to `policy`.
    pub fn with(mut self, class: ResourceClass, policy: SharingPolicy) -> Self {
        match class {
            ResourceClass::Product => self.products = policy,
            ResourceClass::Customer => self.customers = policy,
            ResourceClass::Supplier => self.suppliers = policy,
            ResourceClass::Account => self.accounts = policy,
        }
        self
    }
}

/// A store location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    id: BranchId,
    name: String,
    active: bool,
    policies: SharingPolicies,
}

impl Branch {
    pub fn new(id: BranchId, name: impl Into<String>, policies: SharingPolicies) -> EngineResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(EngineError::validation("branch name cannot be empty"));
        }
        Ok(Self {
            id,
            name,
            active: true,
            policies,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn policies(&self) -> SharingPolicies {
        self.policies
    }

    pub fn policy(&self, class: ResourceClass) -> SharingPolicy {
        self.policies.get(class)
    }

    pub fn set_policy(&mut self, class: ResourceClass, policy: SharingPolicy) {
        self.policies = self.policies.with(class, policy);
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Fails with `UnknownBranch` unless the branch is active.
    pub fn ensure_active(&self) -> EngineResult<()> {
        if self.active {
            Ok(())
        } else {
            Err(EngineError::UnknownBranch(self.id))
        }
    }
}

impl Entity for Branch {
    type Id = BranchId;

    fn id(&self) -> BranchId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_branch_rejects_blank_name() {
        let err = Branch::new(BranchId::new(), "  ", SharingPolicies::default()).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn default_policies_are_isolated_for_every_class() {
        let policies = SharingPolicies::default();
        for class in ResourceClass::ALL {
            assert_eq!(policies.get(class), SharingPolicy::Isolated);
        }
    }

    #[test]
    fn set_policy_only_touches_one_class() {
        let mut branch = Branch::new(BranchId::new(), "Main", SharingPolicies::default()).unwrap();
        branch.set_policy(ResourceClass::Supplier, SharingPolicy::Mixed);

        assert_eq!(branch.policy(ResourceClass::Supplier), SharingPolicy::Mixed);
        assert_eq!(branch.policy(ResourceClass::Customer), SharingPolicy::Isolated);
    }

    #[test]
    fn inactive_branch_is_unknown() {
        let id = BranchId::new();
        let mut branch = Branch::new(id, "Outlet", SharingPolicies::default()).unwrap();
        branch.deactivate();
        assert_eq!(branch.ensure_active(), Err(EngineError::UnknownBranch(id)));
    }
}
