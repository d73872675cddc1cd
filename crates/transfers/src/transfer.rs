use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use branchstock_core::{
    ActorId, Aggregate, AggregateRoot, BranchId, EngineError, EngineResult, EntityRef,
    TransferId, UnitId, VariantId,
};
use branchstock_events::Event;

/// Transfer status lifecycle.
///
/// `Pending` and `InTransit` hold claims; `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    InTransit,
    Completed,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Cancelled)
    }
}

/// What moves between branches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferLine {
    /// Specific units of one unit-tracked variant.
    Units {
        variant_id: VariantId,
        unit_ids: Vec<UnitId>,
    },
    /// A quantity of a quantity-tracked variant.
    Quantity { variant_id: VariantId, quantity: i64 },
}

impl TransferLine {
    pub fn variant_id(&self) -> VariantId {
        match self {
            TransferLine::Units { variant_id, .. } | TransferLine::Quantity { variant_id, .. } => {
                *variant_id
            }
        }
    }

    /// Pieces moved by this line.
    pub fn quantity(&self) -> i64 {
        match self {
            TransferLine::Units { unit_ids, .. } => unit_ids.len() as i64,
            TransferLine::Quantity { quantity, .. } => *quantity,
        }
    }
}

/// Aggregate root: Transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    id: TransferId,
    source: Option<BranchId>,
    destination: Option<BranchId>,
    lines: Vec<TransferLine>,
    status: TransferStatus,
    requested_by: Option<ActorId>,
    requested_at: Option<DateTime<Utc>>,
    dispatched_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Transfer {
    /// Create an empty, not-yet-requested aggregate instance for rehydration.
    pub fn empty(id: TransferId) -> Self {
        Self {
            id,
            source: None,
            destination: None,
            lines: Vec::new(),
            status: TransferStatus::Pending,
            requested_by: None,
            requested_at: None,
            dispatched_at: None,
            closed_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TransferId {
        self.id
    }

    /// Source branch. Only meaningful once the transfer has been requested.
    pub fn source(&self) -> Option<BranchId> {
        self.source
    }

    pub fn destination(&self) -> Option<BranchId> {
        self.destination
    }

    pub fn lines(&self) -> &[TransferLine] {
        &self.lines
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn requested_by(&self) -> Option<ActorId> {
        self.requested_by
    }

    pub fn requested_at(&self) -> Option<DateTime<Utc>> {
        self.requested_at
    }

    pub fn dispatched_at(&self) -> Option<DateTime<Utc>> {
        self.dispatched_at
    }

    /// When the transfer reached a terminal state.
    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_terminal(&self) -> bool {
        self.created && self.status.is_terminal()
    }

    /// Every unit claimed by this transfer, across lines.
    pub fn unit_ids(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.lines
            .iter()
            .flat_map(|line| match line {
                TransferLine::Units { unit_ids, .. } => unit_ids.as_slice(),
                TransferLine::Quantity { .. } => &[][..],
            })
            .copied()
    }

    /// Whether any line moves the given variant.
    pub fn references_variant(&self, variant: VariantId) -> bool {
        self.lines.iter().any(|l| l.variant_id() == variant)
    }

    pub fn involves_branch(&self, branch: BranchId) -> bool {
        self.source == Some(branch) || self.destination == Some(branch)
    }

    /// Handle a command and apply the resulting events in place.
    pub fn execute(&mut self, command: &TransferCommand) -> EngineResult<Vec<TransferEvent>> {
        let events = self.handle(command)?;
        for event in &events {
            self.apply(event);
        }
        Ok(events)
    }
}

impl AggregateRoot for Transfer {
    type Id = TransferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RequestTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTransfer {
    pub transfer_id: TransferId,
    pub source: BranchId,
    pub destination: BranchId,
    pub lines: Vec<TransferLine>,
    pub requested_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DispatchTransfer (source branch only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchTransfer {
    pub transfer_id: TransferId,
    pub acting_branch: BranchId,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveTransfer (destination branch only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveTransfer {
    pub transfer_id: TransferId,
    pub acting_branch: BranchId,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelTransfer (either party).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTransfer {
    pub transfer_id: TransferId,
    pub acting_branch: BranchId,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferCommand {
    Request(RequestTransfer),
    Dispatch(DispatchTransfer),
    Receive(ReceiveTransfer),
    Cancel(CancelTransfer),
}

/// Event: TransferRequested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequested {
    pub transfer_id: TransferId,
    pub source: BranchId,
    pub destination: BranchId,
    pub lines: Vec<TransferLine>,
    pub requested_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferDispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDispatched {
    pub transfer_id: TransferId,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceived {
    pub transfer_id: TransferId,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCancelled {
    pub transfer_id: TransferId,
    pub cancelled_by: BranchId,
    pub actor: ActorId,
    /// Status the transfer was cancelled from.
    pub from_status: TransferStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferEvent {
    TransferRequested(TransferRequested),
    TransferDispatched(TransferDispatched),
    TransferReceived(TransferReceived),
    TransferCancelled(TransferCancelled),
}

impl TransferEvent {
    pub fn transfer_id(&self) -> TransferId {
        match self {
            TransferEvent::TransferRequested(e) => e.transfer_id,
            TransferEvent::TransferDispatched(e) => e.transfer_id,
            TransferEvent::TransferReceived(e) => e.transfer_id,
            TransferEvent::TransferCancelled(e) => e.transfer_id,
        }
    }
}

impl Event for TransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::TransferRequested(_) => "transfer.requested",
            TransferEvent::TransferDispatched(_) => "transfer.dispatched",
            TransferEvent::TransferReceived(_) => "transfer.received",
            TransferEvent::TransferCancelled(_) => "transfer.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransferEvent::TransferRequested(e) => e.occurred_at,
            TransferEvent::TransferDispatched(e) => e.occurred_at,
            TransferEvent::TransferReceived(e) => e.occurred_at,
            TransferEvent::TransferCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Transfer {
    type Command = TransferCommand;
    type Event = TransferEvent;
    type Error = EngineError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransferEvent::TransferRequested(e) => {
                self.id = e.transfer_id;
                self.source = Some(e.source);
                self.destination = Some(e.destination);
                self.lines = e.lines.clone();
                self.status = TransferStatus::Pending;
                self.requested_by = Some(e.requested_by);
                self.requested_at = Some(e.occurred_at);
                self.created = true;
            }
            TransferEvent::TransferDispatched(e) => {
                self.status = TransferStatus::InTransit;
                self.dispatched_at = Some(e.occurred_at);
            }
            TransferEvent::TransferReceived(e) => {
                self.status = TransferStatus::Completed;
                self.closed_at = Some(e.occurred_at);
            }
            TransferEvent::TransferCancelled(e) => {
                self.status = TransferStatus::Cancelled;
                self.closed_at = Some(e.occurred_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TransferCommand::Request(cmd) => self.handle_request(cmd),
            TransferCommand::Dispatch(cmd) => self.handle_dispatch(cmd),
            TransferCommand::Receive(cmd) => self.handle_receive(cmd),
            TransferCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Transfer {
    fn entity(&self) -> EntityRef {
        EntityRef::Transfer(self.id)
    }

    fn ensure_created(&self, transfer_id: TransferId) -> EngineResult<()> {
        if !self.created {
            return Err(EngineError::not_found(EntityRef::Transfer(transfer_id)));
        }
        if self.id != transfer_id {
            return Err(EngineError::validation("transfer_id mismatch"));
        }
        Ok(())
    }

    fn ensure_party(&self, acting: BranchId, party: Option<BranchId>) -> EngineResult<()> {
        if party != Some(acting) {
            return Err(EngineError::AccessDenied {
                branch: acting,
                entity: self.entity(),
            });
        }
        Ok(())
    }

    fn ensure_status(&self, expected: TransferStatus, to: TransferStatus) -> EngineResult<()> {
        if self.status != expected {
            return Err(EngineError::invalid_transition(self.entity(), self.status, to));
        }
        Ok(())
    }

    fn handle_request(&self, cmd: &RequestTransfer) -> EngineResult<Vec<TransferEvent>> {
        if self.created {
            return Err(EngineError::conflict(format!(
                "transfer {} already exists",
                cmd.transfer_id
            )));
        }
        if cmd.source == cmd.destination {
            return Err(EngineError::validation(
                "source and destination branches must differ",
            ));
        }
        if cmd.lines.is_empty() {
            return Err(EngineError::validation("transfer must have at least one line"));
        }

        let mut seen_units = BTreeSet::new();
        for line in &cmd.lines {
            match line {
                TransferLine::Units { unit_ids, .. } => {
                    if unit_ids.is_empty() {
                        return Err(EngineError::validation("unit line must name at least one unit"));
                    }
                    for unit in unit_ids {
                        if !seen_units.insert(*unit) {
                            return Err(EngineError::validation(format!(
                                "unit {unit} listed more than once"
                            )));
                        }
                    }
                }
                TransferLine::Quantity { quantity, .. } => {
                    if *quantity <= 0 {
                        return Err(EngineError::validation("quantity must be positive"));
                    }
                }
            }
        }

        Ok(vec![TransferEvent::TransferRequested(TransferRequested {
            transfer_id: cmd.transfer_id,
            source: cmd.source,
            destination: cmd.destination,
            lines: cmd.lines.clone(),
            requested_by: cmd.requested_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_dispatch(&self, cmd: &DispatchTransfer) -> EngineResult<Vec<TransferEvent>> {
        self.ensure_created(cmd.transfer_id)?;
        self.ensure_party(cmd.acting_branch, self.source)?;
        self.ensure_status(TransferStatus::Pending, TransferStatus::InTransit)?;

        Ok(vec![TransferEvent::TransferDispatched(TransferDispatched {
            transfer_id: cmd.transfer_id,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReceiveTransfer) -> EngineResult<Vec<TransferEvent>> {
        self.ensure_created(cmd.transfer_id)?;
        self.ensure_party(cmd.acting_branch, self.destination)?;
        self.ensure_status(TransferStatus::InTransit, TransferStatus::Completed)?;

        Ok(vec![TransferEvent::TransferReceived(TransferReceived {
            transfer_id: cmd.transfer_id,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelTransfer) -> EngineResult<Vec<TransferEvent>> {
        self.ensure_created(cmd.transfer_id)?;
        if !self.involves_branch(cmd.acting_branch) {
            return Err(EngineError::AccessDenied {
                branch: cmd.acting_branch,
                entity: self.entity(),
            });
        }
        if self.status.is_terminal() {
            return Err(EngineError::invalid_transition(
                self.entity(),
                self.status,
                TransferStatus::Cancelled,
            ));
        }

        Ok(vec![TransferEvent::TransferCancelled(TransferCancelled {
            transfer_id: cmd.transfer_id,
            cancelled_by: cmd.acting_branch,
            actor: cmd.actor,
            from_status: self.status,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct Fixture {
        id: TransferId,
        source: BranchId,
        destination: BranchId,
        actor: ActorId,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                id: TransferId::new(),
                source: BranchId::new(),
                destination: BranchId::new(),
                actor: ActorId::new(),
            }
        }

        fn request(&self) -> TransferCommand {
            TransferCommand::Request(RequestTransfer {
                transfer_id: self.id,
                source: self.source,
                destination: self.destination,
                lines: vec![TransferLine::Units {
                    variant_id: VariantId::new(),
                    unit_ids: vec![UnitId::new(), UnitId::new()],
                }],
                requested_by: self.actor,
                occurred_at: Utc::now(),
            })
        }

        fn dispatch(&self, branch: BranchId) -> TransferCommand {
            TransferCommand::Dispatch(DispatchTransfer {
                transfer_id: self.id,
                acting_branch: branch,
                actor: self.actor,
                occurred_at: Utc::now(),
            })
        }

        fn receive(&self, branch: BranchId) -> TransferCommand {
            TransferCommand::Receive(ReceiveTransfer {
                transfer_id: self.id,
                acting_branch: branch,
                actor: self.actor,
                occurred_at: Utc::now(),
            })
        }

        fn cancel(&self, branch: BranchId) -> TransferCommand {
            TransferCommand::Cancel(CancelTransfer {
                transfer_id: self.id,
                acting_branch: branch,
                actor: self.actor,
                occurred_at: Utc::now(),
            })
        }

        fn pending(&self) -> Transfer {
            let mut transfer = Transfer::empty(self.id);
            transfer.execute(&self.request()).unwrap();
            transfer
        }
    }

    #[test]
    fn request_emits_transfer_requested_and_starts_pending() {
        let fx = Fixture::new();
        let transfer = Transfer::empty(fx.id);

        let events = transfer.handle(&fx.request()).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            TransferEvent::TransferRequested(e) => {
                assert_eq!(e.source, fx.source);
                assert_eq!(e.destination, fx.destination);
            }
            _ => panic!("Expected TransferRequested event"),
        }

        let transfer = fx.pending();
        assert_eq!(transfer.status(), TransferStatus::Pending);
        assert_eq!(transfer.unit_ids().count(), 2);
        assert_eq!(transfer.version(), 1);
    }

    #[test]
    fn same_source_and_destination_is_rejected() {
        let fx = Fixture::new();
        let cmd = TransferCommand::Request(RequestTransfer {
            transfer_id: fx.id,
            source: fx.source,
            destination: fx.source,
            lines: vec![TransferLine::Quantity {
                variant_id: VariantId::new(),
                quantity: 1,
            }],
            requested_by: fx.actor,
            occurred_at: Utc::now(),
        });

        let err = Transfer::empty(fx.id).handle(&cmd).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn duplicate_units_across_lines_are_rejected() {
        let fx = Fixture::new();
        let unit = UnitId::new();
        let variant = VariantId::new();
        let cmd = TransferCommand::Request(RequestTransfer {
            transfer_id: fx.id,
            source: fx.source,
            destination: fx.destination,
            lines: vec![
                TransferLine::Units { variant_id: variant, unit_ids: vec![unit] },
                TransferLine::Units { variant_id: variant, unit_ids: vec![unit] },
            ],
            requested_by: fx.actor,
            occurred_at: Utc::now(),
        });

        let err = Transfer::empty(fx.id).handle(&cmd).unwrap_err();
        assert!(matches!(err, EngineError::Validation(msg) if msg.contains("more than once")));
    }

    #[test]
    fn full_lifecycle_pending_in_transit_completed() {
        let fx = Fixture::new();
        let mut transfer = fx.pending();

        transfer.execute(&fx.dispatch(fx.source)).unwrap();
        assert_eq!(transfer.status(), TransferStatus::InTransit);
        assert!(transfer.dispatched_at().is_some());

        transfer.execute(&fx.receive(fx.destination)).unwrap();
        assert_eq!(transfer.status(), TransferStatus::Completed);
        assert!(transfer.is_terminal());
        assert_eq!(transfer.version(), 3);
    }

    #[test]
    fn only_source_may_dispatch() {
        let fx = Fixture::new();
        let transfer = fx.pending();

        let err = transfer.handle(&fx.dispatch(fx.destination)).unwrap_err();
        assert_eq!(
            err,
            EngineError::AccessDenied {
                branch: fx.destination,
                entity: EntityRef::Transfer(fx.id),
            }
        );
    }

    #[test]
    fn only_destination_may_receive() {
        let fx = Fixture::new();
        let mut transfer = fx.pending();
        transfer.execute(&fx.dispatch(fx.source)).unwrap();

        let err = transfer.handle(&fx.receive(fx.source)).unwrap_err();
        assert!(matches!(err, EngineError::AccessDenied { .. }));
    }

    #[test]
    fn receive_requires_in_transit() {
        let fx = Fixture::new();
        let transfer = fx.pending();

        let err = transfer.handle(&fx.receive(fx.destination)).unwrap_err();
        match err {
            EngineError::InvalidTransition { from, to, .. } => {
                assert_eq!(from, "pending");
                assert_eq!(to, "completed");
            }
            other => panic!("Expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn either_party_may_cancel_pending_or_in_transit() {
        let fx = Fixture::new();

        let mut pending = fx.pending();
        pending.execute(&fx.cancel(fx.destination)).unwrap();
        assert_eq!(pending.status(), TransferStatus::Cancelled);

        let mut in_transit = fx.pending();
        in_transit.execute(&fx.dispatch(fx.source)).unwrap();
        let events = in_transit.execute(&fx.cancel(fx.source)).unwrap();
        match &events[0] {
            TransferEvent::TransferCancelled(e) => {
                assert_eq!(e.from_status, TransferStatus::InTransit)
            }
            _ => panic!("Expected TransferCancelled event"),
        }
    }

    #[test]
    fn outsider_cannot_cancel() {
        let fx = Fixture::new();
        let transfer = fx.pending();
        let err = transfer.handle(&fx.cancel(BranchId::new())).unwrap_err();
        assert!(matches!(err, EngineError::AccessDenied { .. }));
    }

    #[test]
    fn terminal_transfers_are_immutable() {
        let fx = Fixture::new();
        let mut completed = fx.pending();
        completed.execute(&fx.dispatch(fx.source)).unwrap();
        completed.execute(&fx.receive(fx.destination)).unwrap();

        for cmd in [fx.cancel(fx.source), fx.dispatch(fx.source), fx.receive(fx.destination)] {
            let before = completed.clone();
            let err = completed.execute(&cmd).unwrap_err();
            assert!(matches!(err, EngineError::InvalidTransition { .. }), "{err:?}");
            assert_eq!(completed, before);
        }
    }

    #[test]
    fn commands_on_unrequested_transfer_are_not_found() {
        let fx = Fixture::new();
        let err = Transfer::empty(fx.id).handle(&fx.dispatch(fx.source)).unwrap_err();
        assert_eq!(err, EngineError::NotFound(EntityRef::Transfer(fx.id)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: once terminal, no command sequence changes a transfer.
        #[test]
        fn terminal_state_is_absorbing(ops in prop::collection::vec(0u8..6, 1..20)) {
            let fx = Fixture::new();
            let mut transfer = fx.pending();
            let mut frozen: Option<Transfer> = None;

            for op in ops {
                let cmd = match op {
                    0 => fx.dispatch(fx.source),
                    1 => fx.receive(fx.destination),
                    2 => fx.cancel(fx.source),
                    3 => fx.cancel(fx.destination),
                    4 => fx.dispatch(fx.destination),
                    _ => fx.receive(fx.source),
                };
                let _ = transfer.execute(&cmd);
                if let Some(f) = &frozen {
                    prop_assert_eq!(f, &transfer);
                } else if transfer.is_terminal() {
                    frozen = Some(transfer.clone());
                }
            }
        }
    }
}
