use serde::{Deserialize, Serialize};

use branchstock_core::{BranchId, EngineError, EngineResult, Entity, RecordId};

use crate::branch::ResourceClass;
use crate::visibility::Scoped;

/// A customer, supplier or payment account that may be shared between branches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedRecord {
    id: RecordId,
    class: ResourceClass,
    name: String,
    owner: Option<BranchId>,
    shared: bool,
    active: bool,
}

impl SharedRecord {
    pub fn new(
        id: RecordId,
        class: ResourceClass,
        name: impl Into<String>,
        owner: Option<BranchId>,
    ) -> EngineResult<Self> {
        if class == ResourceClass::Product {
            return Err(EngineError::validation(
                "products are catalog entries, not shared records",
            ));
        }
        let name = name.into();
        if name.trim().is_empty() {
            return Err(EngineError::validation("record name cannot be empty"));
        }
        Ok(Self {
            id,
            class,
            name,
            owner,
            shared: false,
            active: true,
        })
    }

    pub fn class(&self) -> ResourceClass {
        self.class
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_shared(&mut self, shared: bool) {
        self.shared = shared;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }
}

impl Entity for SharedRecord {
    type Id = RecordId;

    fn id(&self) -> RecordId {
        self.id
    }
}

impl Scoped for SharedRecord {
    fn scope_id(&self) -> uuid::Uuid {
        *self.id.as_uuid()
    }

    fn owner(&self) -> Option<BranchId> {
        self.owner
    }

    fn is_shared(&self) -> bool {
        self.shared
    }

    fn is_active(&self) -> bool {
        self.active
    }
}
