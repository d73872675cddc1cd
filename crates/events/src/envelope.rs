use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use branchstock_core::BranchId;

/// Envelope for a published event, carrying branch context and subject metadata.
///
/// Notes:
/// - `branch_id` is the branch context the change happened under.
/// - `subject_id` / `subject_type` name the record the event is about
///   (e.g. a transfer id and `"transfer"`).
/// - `sequence_number` is the ledger sequence for movement events and the
///   record version for state-change events; monotonically increasing per subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    branch_id: BranchId,

    subject_id: Uuid,
    subject_type: String,

    event_type: String,
    sequence_number: u64,
    occurred_at: DateTime<Utc>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: Uuid,
        branch_id: BranchId,
        subject_id: Uuid,
        subject_type: impl Into<String>,
        event_type: impl Into<String>,
        sequence_number: u64,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            branch_id,
            subject_id,
            subject_type: subject_type.into(),
            event_type: event_type.into(),
            sequence_number,
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn branch_id(&self) -> BranchId {
        self.branch_id
    }

    pub fn subject_id(&self) -> Uuid {
        self.subject_id
    }

    pub fn subject_type(&self) -> &str {
        &self.subject_type
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
