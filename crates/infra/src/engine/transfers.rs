//! Branch-to-branch transfers.
//!
//! The transfer aggregate decides every state change; this module applies the
//! stock side. Requesting claims units (and debits bulk quantity) at the
//! source; receiving releases them to the destination; cancelling releases
//! them back to the source. Dispatch touches no stock.

use chrono::Utc;
use serde_json::Value as JsonValue;

use branchstock_core::{
    ActorId, AggregateRoot, BranchId, EngineError, EngineResult, TransferId,
};
use branchstock_events::{EventBus, EventEnvelope};
use branchstock_inventory::VariantKind;
use branchstock_ledger::MovementReason;
use branchstock_transfers::{
    CancelTransfer, DispatchTransfer, ReceiveTransfer, RequestTransfer, Transfer, TransferCommand,
    TransferEvent, TransferLine,
};

use crate::events::envelope;
use crate::store::{ChangeSet, EntityStore, Row, StoreState};

use super::aggregator::StockPlan;
use super::visibility::{owned_unit, writable_variant};
use super::{Plan, StockEngine};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub source: BranchId,
    pub destination: BranchId,
    pub lines: Vec<TransferLine>,
    pub actor: ActorId,
}

fn transfer_envelopes(
    branch: BranchId,
    transfer: &Transfer,
    events: &[TransferEvent],
) -> EngineResult<Vec<EventEnvelope<JsonValue>>> {
    events
        .iter()
        .map(|event| {
            envelope(
                branch,
                *transfer.id_typed().as_uuid(),
                "transfer",
                transfer.version(),
                event,
            )
        })
        .collect()
}

/// Return every claimed unit and bulk quantity of `transfer` to `branch`.
fn release_lines(
    state: &StoreState,
    transfer: &Transfer,
    branch: BranchId,
    reason: MovementReason,
    plan: &mut StockPlan<'_>,
    changes: &mut ChangeSet,
) -> EngineResult<()> {
    let id = transfer.id_typed();
    for line in transfer.lines() {
        match line {
            TransferLine::Units { variant_id, unit_ids } => {
                for unit_id in unit_ids {
                    let mut unit = state.require_unit(*unit_id)?.clone();
                    let delta = unit.release_claim(id, branch)?;
                    plan.shift_leaf(*variant_id, branch, delta, reason)?;
                    changes.put(state, Row::Unit(unit));
                }
            }
            TransferLine::Quantity { variant_id, quantity } => {
                plan.shift_leaf(*variant_id, branch, *quantity, reason)?;
            }
        }
    }
    Ok(())
}

impl<S, B> StockEngine<S, B>
where
    S: EntityStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Open a transfer and claim its stock at the source.
    ///
    /// A unit already claimed fails with `UnitLocked` naming the holder.
    pub fn request_transfer(&self, request: TransferRequest) -> EngineResult<TransferId> {
        let transfer_id = TransferId::new();
        self.execute("request_transfer", |state| {
            state.active_branch(request.source)?;
            state.active_branch(request.destination)?;

            let mut transfer = Transfer::empty(transfer_id);
            let events = transfer.execute(&TransferCommand::Request(RequestTransfer {
                transfer_id,
                source: request.source,
                destination: request.destination,
                lines: request.lines.clone(),
                requested_by: request.actor,
                occurred_at: Utc::now(),
            }))?;

            let mut changes = ChangeSet::new();
            let mut plan = StockPlan::new(state, request.actor);
            for line in &request.lines {
                let variant_id = line.variant_id();
                let (_, variant) = writable_variant(state, request.source, variant_id)?;
                writable_variant(state, request.destination, variant_id)?;

                match line {
                    TransferLine::Units { unit_ids, .. } => {
                        if variant.kind() != VariantKind::UnitTracked {
                            return Err(EngineError::validation(format!(
                                "variant {variant_id} is not unit-tracked"
                            )));
                        }
                        for unit_id in unit_ids {
                            let mut unit = owned_unit(state, request.source, *unit_id)?.clone();
                            if unit.variant_id() != variant_id {
                                return Err(EngineError::validation(format!(
                                    "unit {unit_id} is not a {variant_id} unit"
                                )));
                            }
                            let delta = unit.claim(transfer_id)?;
                            plan.shift_leaf(variant_id, request.source, delta, MovementReason::TransferOut)?;
                            changes.put(state, Row::Unit(unit));
                        }
                    }
                    TransferLine::Quantity { quantity, .. } => {
                        if variant.kind() != VariantKind::QuantityTracked {
                            return Err(EngineError::validation(format!(
                                "variant {variant_id} is not quantity-tracked"
                            )));
                        }
                        plan.shift_leaf(variant_id, request.source, -*quantity, MovementReason::TransferOut)?;
                    }
                }
            }
            plan.finish(&mut changes)?;

            let published = transfer_envelopes(request.source, &transfer, &events)?;
            changes.insert(Row::Transfer(transfer));
            Ok(Plan::new(changes, transfer_id).with_events(published))
        })
    }

    /// `pending → in_transit`; source branch only.
    pub fn dispatch_transfer(&self, transfer_id: TransferId, acting_branch: BranchId, actor: ActorId) -> EngineResult<()> {
        self.execute("dispatch_transfer", |state| {
            state.active_branch(acting_branch)?;
            let mut transfer = state.require_transfer(transfer_id)?.clone();
            let events = transfer.execute(&TransferCommand::Dispatch(DispatchTransfer {
                transfer_id,
                acting_branch,
                actor,
                occurred_at: Utc::now(),
            }))?;

            let published = transfer_envelopes(acting_branch, &transfer, &events)?;
            let mut changes = ChangeSet::new();
            changes.put(state, Row::Transfer(transfer));
            Ok(Plan::new(changes, ()).with_events(published))
        })
    }

    /// `in_transit → completed`; destination branch only. Claimed units are
    /// re-owned to the destination and become available there.
    pub fn receive_transfer(&self, transfer_id: TransferId, acting_branch: BranchId, actor: ActorId) -> EngineResult<()> {
        self.execute("receive_transfer", |state| {
            state.active_branch(acting_branch)?;
            let mut transfer = state.require_transfer(transfer_id)?.clone();
            let events = transfer.execute(&TransferCommand::Receive(ReceiveTransfer {
                transfer_id,
                acting_branch,
                actor,
                occurred_at: Utc::now(),
            }))?;

            let mut changes = ChangeSet::new();
            let mut plan = StockPlan::new(state, actor);
            release_lines(state, &transfer, acting_branch, MovementReason::TransferIn, &mut plan, &mut changes)?;
            plan.finish(&mut changes)?;

            let published = transfer_envelopes(acting_branch, &transfer, &events)?;
            changes.put(state, Row::Transfer(transfer));
            Ok(Plan::new(changes, ()).with_events(published))
        })
    }

    /// `pending | in_transit → cancelled`; either party. Stock returns to the
    /// source.
    pub fn cancel_transfer(&self, transfer_id: TransferId, acting_branch: BranchId, actor: ActorId) -> EngineResult<()> {
        self.execute("cancel_transfer", |state| {
            let mut transfer = state.require_transfer(transfer_id)?.clone();
            let events = transfer.execute(&TransferCommand::Cancel(CancelTransfer {
                transfer_id,
                acting_branch,
                actor,
                occurred_at: Utc::now(),
            }))?;
            let source = transfer
                .source()
                .ok_or_else(|| EngineError::integrity(format!("transfer {transfer_id} has no source")))?;

            let mut changes = ChangeSet::new();
            let mut plan = StockPlan::new(state, actor);
            release_lines(state, &transfer, source, MovementReason::TransferCancelled, &mut plan, &mut changes)?;
            plan.finish(&mut changes)?;

            let published = transfer_envelopes(acting_branch, &transfer, &events)?;
            changes.put(state, Row::Transfer(transfer));
            Ok(Plan::new(changes, ()).with_events(published))
        })
    }

    pub fn transfer(&self, transfer_id: TransferId) -> EngineResult<Transfer> {
        Ok(self.store().snapshot()?.require_transfer(transfer_id)?.clone())
    }
}
