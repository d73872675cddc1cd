//! Engine error model.

use thiserror::Error;

use crate::id::{BranchId, TransferId, UnitId, VariantId};
use crate::reference::{BlockingReference, EntityRef};

/// Result type used across the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine-level error.
///
/// Every variant except `ConcurrentConflict` is surfaced to the caller unchanged.
/// Variants carry the record ids an operator needs to act on (lock holder,
/// blocking records), never just a message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The branch does not exist or is inactive.
    #[error("unknown or inactive branch {0}")]
    UnknownBranch(BranchId),

    /// Recomputation was requested on a variant that is not a parent.
    #[error("variant {0} is not a parent variant")]
    NotAParent(VariantId),

    /// The unit is claimed by a non-terminal transfer.
    #[error("unit {unit_id} is locked by transfer {transfer_id}")]
    UnitLocked {
        unit_id: UnitId,
        transfer_id: TransferId,
    },

    /// A state machine refused the requested transition.
    #[error("invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: EntityRef,
        from: String,
        to: String,
    },

    /// Deletion is blocked by non-terminal records.
    #[error("{entity} is referenced by {} non-terminal record(s)", references.len())]
    BlockingReferences {
        entity: EntityRef,
        references: Vec<BlockingReference>,
    },

    /// A concurrent writer changed a record this operation depends on. Retryable.
    #[error("concurrent conflict: {0}")]
    ConcurrentConflict(String),

    /// Stored data violates an engine invariant.
    #[error("data integrity defect: {0}")]
    DataIntegrityDefect(String),

    /// The acting branch may not read or write the entity.
    #[error("branch {branch} may not access {entity}")]
    AccessDenied { branch: BranchId, entity: EntityRef },

    #[error("{0} not found")]
    NotFound(EntityRef),

    /// The serial is already carried by another non-disposed unit.
    #[error("serial '{serial}' already in use by unit {unit_id}")]
    SerialInUse { serial: String, unit_id: UnitId },

    #[error("validation failed: {0}")]
    Validation(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::ConcurrentConflict(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::DataIntegrityDefect(msg.into())
    }

    pub fn not_found(entity: EntityRef) -> Self {
        Self::NotFound(entity)
    }

    pub fn invalid_transition(
        entity: EntityRef,
        from: impl core::fmt::Debug,
        to: impl core::fmt::Debug,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            from: format!("{from:?}").to_lowercase(),
            to: format!("{to:?}").to_lowercase(),
        }
    }

    /// Whether the engine may transparently retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentConflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ReferenceKind;

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(EngineError::conflict("stale").is_retryable());
        assert!(!EngineError::NotAParent(VariantId::new()).is_retryable());
        assert!(!EngineError::integrity("owner on product").is_retryable());
    }

    #[test]
    fn blocking_references_message_counts_records() {
        let err = EngineError::BlockingReferences {
            entity: EntityRef::Variant(VariantId::new()),
            references: vec![BlockingReference::new(
                ReferenceKind::PendingTransfer,
                EntityRef::Transfer(TransferId::new()),
            )],
        };
        assert!(err.to_string().contains("1 non-terminal record"));
    }
}
