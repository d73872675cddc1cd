use serde::{Deserialize, Serialize};

use branchstock_core::{
    BranchId, EngineError, EngineResult, Entity, EntityRef, TransferId, UnitId, VariantId,
};

/// Lifecycle status of an inventory unit.
///
/// Only `Available` counts toward on-hand quantity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Available,
    Reserved,
    Sold,
    Returned,
    Transferring,
    Disposed,
}

impl UnitStatus {
    pub fn counts_on_hand(self) -> bool {
        self == UnitStatus::Available
    }

    /// On-hand quantity contribution of a unit in this status.
    pub fn contribution(self) -> i64 {
        if self.counts_on_hand() { 1 } else { 0 }
    }

    /// Whether the unit still physically belongs to the branch's stock.
    pub fn is_held(self) -> bool {
        matches!(
            self,
            UnitStatus::Available | UnitStatus::Reserved | UnitStatus::Returned | UnitStatus::Transferring
        )
    }

    /// Transitions reachable through ordinary status changes.
    ///
    /// `Transferring` is entered and left only through a transfer's claim.
    pub fn can_transition_to(self, to: UnitStatus) -> bool {
        use UnitStatus::*;
        matches!(
            (self, to),
            (Available, Reserved)
                | (Available, Sold)
                | (Available, Disposed)
                | (Reserved, Available)
                | (Reserved, Sold)
                | (Reserved, Disposed)
                | (Sold, Returned)
                | (Returned, Available)
                | (Returned, Disposed)
        )
    }
}

/// The finest-grained stock record, optionally serialized (e.g. IMEI).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryUnit {
    id: UnitId,
    variant_id: VariantId,
    branch: BranchId,
    serial: Option<String>,
    status: UnitStatus,
    claimed_by: Option<TransferId>,
}

impl InventoryUnit {
    /// A freshly received, available unit.
    pub fn new(
        id: UnitId,
        variant_id: VariantId,
        branch: BranchId,
        serial: Option<String>,
    ) -> EngineResult<Self> {
        let serial = match serial {
            Some(s) if s.trim().is_empty() => {
                return Err(EngineError::validation("serial cannot be blank"));
            }
            Some(s) => Some(s.trim().to_string()),
            None => None,
        };
        Ok(Self {
            id,
            variant_id,
            branch,
            serial,
            status: UnitStatus::Available,
            claimed_by: None,
        })
    }

    pub fn variant_id(&self) -> VariantId {
        self.variant_id
    }

    pub fn branch(&self) -> BranchId {
        self.branch
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    pub fn status(&self) -> UnitStatus {
        self.status
    }

    pub fn claimed_by(&self) -> Option<TransferId> {
        self.claimed_by
    }

    /// Serial numbers are reserved by every unit that is not disposed.
    pub fn holds_serial(&self) -> bool {
        self.serial.is_some() && self.status != UnitStatus::Disposed
    }

    /// Fails with `UnitLocked` while a transfer holds a claim on this unit.
    pub fn ensure_unlocked(&self) -> EngineResult<()> {
        match self.claimed_by {
            Some(transfer_id) => Err(EngineError::UnitLocked {
                unit_id: self.id,
                transfer_id,
            }),
            None => Ok(()),
        }
    }

    /// Move to `to` through an ordinary status change; returns the on-hand delta.
    pub fn transition(&mut self, to: UnitStatus) -> EngineResult<i64> {
        self.ensure_unlocked()?;
        if !self.status.can_transition_to(to) {
            return Err(EngineError::invalid_transition(EntityRef::Unit(self.id), self.status, to));
        }
        let delta = to.contribution() - self.status.contribution();
        self.status = to;
        Ok(delta)
    }

    /// Take the exclusive claim for `transfer`; returns the on-hand delta at the source.
    pub fn claim(&mut self, transfer: TransferId) -> EngineResult<i64> {
        self.ensure_unlocked()?;
        if self.status != UnitStatus::Available {
            return Err(EngineError::invalid_transition(
                EntityRef::Unit(self.id),
                self.status,
                UnitStatus::Transferring,
            ));
        }
        self.status = UnitStatus::Transferring;
        self.claimed_by = Some(transfer);
        Ok(-1)
    }

    /// Release the claim, returning the unit to stock at `branch`.
    ///
    /// `branch` is the source for a cancellation and the destination for a receipt.
    /// Returns the on-hand delta at `branch`.
    pub fn release_claim(&mut self, transfer: TransferId, branch: BranchId) -> EngineResult<i64> {
        if self.claimed_by != Some(transfer) {
            return Err(EngineError::integrity(format!(
                "unit {} is not claimed by transfer {transfer}",
                self.id
            )));
        }
        self.status = UnitStatus::Available;
        self.claimed_by = None;
        self.branch = branch;
        Ok(1)
    }
}

impl Entity for InventoryUnit {
    type Id = UnitId;

    fn id(&self) -> UnitId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> InventoryUnit {
        InventoryUnit::new(UnitId::new(), VariantId::new(), BranchId::new(), Some("IMEI-1".into())).unwrap()
    }

    #[test]
    fn selling_an_available_unit_removes_it_from_stock() {
        let mut u = unit();
        assert_eq!(u.transition(UnitStatus::Sold).unwrap(), -1);
        assert_eq!(u.status(), UnitStatus::Sold);
    }

    #[test]
    fn return_then_restock_adds_it_back() {
        let mut u = unit();
        u.transition(UnitStatus::Sold).unwrap();
        assert_eq!(u.transition(UnitStatus::Returned).unwrap(), 0);
        assert_eq!(u.transition(UnitStatus::Available).unwrap(), 1);
    }

    #[test]
    fn claimed_unit_cannot_be_sold() {
        let mut u = unit();
        let transfer = TransferId::new();
        u.claim(transfer).unwrap();

        let err = u.transition(UnitStatus::Sold).unwrap_err();
        assert_eq!(
            err,
            EngineError::UnitLocked {
                unit_id: u.id(),
                transfer_id: transfer
            }
        );
    }

    #[test]
    fn second_claim_reports_lock_holder() {
        let mut u = unit();
        let first = TransferId::new();
        u.claim(first).unwrap();

        match u.claim(TransferId::new()) {
            Err(EngineError::UnitLocked { transfer_id, .. }) => assert_eq!(transfer_id, first),
            other => panic!("expected UnitLocked, got {other:?}"),
        }
    }

    #[test]
    fn release_moves_unit_to_destination() {
        let mut u = unit();
        let transfer = TransferId::new();
        let destination = BranchId::new();
        u.claim(transfer).unwrap();

        assert_eq!(u.release_claim(transfer, destination).unwrap(), 1);
        assert_eq!(u.branch(), destination);
        assert_eq!(u.status(), UnitStatus::Available);
        assert_eq!(u.claimed_by(), None);
    }

    #[test]
    fn transferring_is_not_reachable_by_status_change() {
        let mut u = unit();
        assert!(matches!(
            u.transition(UnitStatus::Transferring),
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn disposed_units_release_their_serial() {
        let mut u = unit();
        assert!(u.holds_serial());
        u.transition(UnitStatus::Disposed).unwrap();
        assert!(!u.holds_serial());
    }

    #[test]
    fn blank_serial_is_rejected() {
        let err = InventoryUnit::new(UnitId::new(), VariantId::new(), BranchId::new(), Some(" ".into()));
        assert!(err.is_err());
    }
}
