//! Stock engine: the application-level orchestration of every write.
//!
//! ## Execution flow
//!
//! ```text
//! Operation
//!   ↓
//! 1. Take a store snapshot (immutable, whole committed state)
//!   ↓
//! 2. Plan: visibility checks, domain decisions, derived quantities,
//!    movements (pure, against the snapshot) → ChangeSet
//!   ↓
//! 3. Commit the ChangeSet atomically (optimistic version checks)
//!   ↓   └─ ConcurrentConflict → back to 1 (bounded, exponential backoff)
//! 4. Publish movements and domain events (best-effort, after commit)
//! ```
//!
//! Planning never mutates shared state, so a retried attempt simply re-plans
//! from a fresh snapshot.

pub mod admin;
pub mod aggregator;
pub mod deletion;
pub mod pos;
pub mod receiving;
pub mod reconcile;
pub mod retry;
pub mod transfers;
pub mod visibility;

use serde_json::Value as JsonValue;
use tracing::{info, warn};

use branchstock_core::EngineResult;
use branchstock_events::{EventBus, EventEnvelope};

use crate::config::EngineConfig;
use crate::events::movement_envelope;
use crate::store::{ChangeSet, CommitReceipt, EntityStore, StoreState};

pub use admin::NewVariant;
pub use aggregator::{UnitChangeOutcome, UnitQuantityChange};
pub use deletion::DeletionCheck;
pub use pos::{SaleItem, SaleReceipt};
pub use receiving::{Goods, ReceiptOutcome, ReceiveStock};
pub use reconcile::{Mismatch, ReconciliationReport};
pub use retry::RetryPolicy;
pub use transfers::TransferRequest;

/// Result of planning one attempt of an operation.
pub(crate) struct Plan<T> {
    pub changes: ChangeSet,
    pub output: T,
    /// Domain events to publish once the change set is committed.
    pub events: Vec<EventEnvelope<JsonValue>>,
}

impl<T> Plan<T> {
    pub fn new(changes: ChangeSet, output: T) -> Self {
        Self {
            changes,
            output,
            events: Vec::new(),
        }
    }

    pub fn with_events(mut self, events: Vec<EventEnvelope<JsonValue>>) -> Self {
        self.events = events;
        self
    }
}

/// Branch-aware inventory and stock consistency engine.
///
/// ## Generic parameters
///
/// - `S`: entity store (snapshots, atomic commits, movement ledger)
/// - `B`: event bus receiving committed changes
#[derive(Debug)]
pub struct StockEngine<S, B> {
    store: S,
    bus: B,
    retry: RetryPolicy,
}

impl<S, B> StockEngine<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self::with_config(store, bus, &EngineConfig::default())
    }

    pub fn with_config(store: S, bus: B, config: &EngineConfig) -> Self {
        Self {
            store,
            bus,
            retry: RetryPolicy::from(&config.retry),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> StockEngine<S, B>
where
    S: EntityStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Snapshot-plan-commit-publish, retried on `ConcurrentConflict`.
    pub(crate) fn execute<T>(
        &self,
        operation: &'static str,
        plan: impl Fn(&StoreState) -> EngineResult<Plan<T>>,
    ) -> EngineResult<T> {
        self.retry.run(operation, || {
            let snapshot = self.store.snapshot()?;
            let planned = plan(snapshot.as_ref())?;
            if planned.changes.is_empty() {
                return Ok(planned.output);
            }

            let receipt = self.store.commit(planned.changes)?;
            info!(
                operation,
                correlation_id = %receipt.correlation_id,
                movements = receipt.movements.len(),
                ledger_high_water = receipt.ledger_high_water,
                "operation committed"
            );

            self.publish(&receipt, planned.events);
            Ok(planned.output)
        })
    }

    /// Publish a committed operation. Failures are logged, never returned:
    /// the commit already happened and is the source of truth.
    fn publish(&self, receipt: &CommitReceipt, events: Vec<EventEnvelope<JsonValue>>) {
        let movements = receipt.movements.iter().filter_map(|m| match movement_envelope(m) {
            Ok(env) => Some(env),
            Err(err) => {
                warn!(movement_id = %m.id, error = %err, "movement envelope could not be built");
                None
            }
        });

        for envelope in movements.chain(events) {
            let event_type = envelope.event_type().to_string();
            if let Err(err) = self.bus.publish(envelope) {
                warn!(
                    correlation_id = %receipt.correlation_id,
                    event_type = %event_type,
                    error = ?err,
                    "event publication failed after commit"
                );
            }
        }
    }
}
