//! Purchase-order and sale lines: the external records that hold references to
//! variants and units, and whose open/closed status the deletion guard consults.

use serde::{Deserialize, Serialize};

use branchstock_core::{
    BranchId, EngineError, EngineResult, Entity, EntityRef, LineId, PurchaseOrderId, SaleId,
    UnitId, VariantId,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseLineStatus {
    Open,
    Fulfilled,
    Cancelled,
}

/// One line of a purchase order, received in one or more deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLine {
    id: LineId,
    purchase_order_id: PurchaseOrderId,
    branch: BranchId,
    variant_id: VariantId,
    ordered: i64,
    received: i64,
    status: PurchaseLineStatus,
}

impl PurchaseOrderLine {
    pub fn new(
        id: LineId,
        purchase_order_id: PurchaseOrderId,
        branch: BranchId,
        variant_id: VariantId,
        ordered: i64,
    ) -> EngineResult<Self> {
        if ordered <= 0 {
            return Err(EngineError::validation("ordered quantity must be positive"));
        }
        Ok(Self {
            id,
            purchase_order_id,
            branch,
            variant_id,
            ordered,
            received: 0,
            status: PurchaseLineStatus::Open,
        })
    }

    pub fn purchase_order_id(&self) -> PurchaseOrderId {
        self.purchase_order_id
    }

    pub fn branch(&self) -> BranchId {
        self.branch
    }

    pub fn variant_id(&self) -> VariantId {
        self.variant_id
    }

    pub fn ordered(&self) -> i64 {
        self.ordered
    }

    pub fn received(&self) -> i64 {
        self.received
    }

    pub fn status(&self) -> PurchaseLineStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == PurchaseLineStatus::Open
    }

    /// Record a delivery of `quantity`; the line fulfils once fully received.
    pub fn receive(&mut self, quantity: i64) -> EngineResult<()> {
        if !self.is_open() {
            return Err(EngineError::invalid_transition(
                EntityRef::PurchaseOrderLine(self.id),
                self.status,
                PurchaseLineStatus::Fulfilled,
            ));
        }
        if quantity <= 0 {
            return Err(EngineError::validation("received quantity must be positive"));
        }
        if self.received + quantity > self.ordered {
            return Err(EngineError::validation(format!(
                "over-receipt on line {}: ordered {}, already received {}, delivering {quantity}",
                self.id, self.ordered, self.received
            )));
        }
        self.received += quantity;
        if self.received == self.ordered {
            self.status = PurchaseLineStatus::Fulfilled;
        }
        Ok(())
    }

    pub fn cancel(&mut self) -> EngineResult<()> {
        if !self.is_open() {
            return Err(EngineError::invalid_transition(
                EntityRef::PurchaseOrderLine(self.id),
                self.status,
                PurchaseLineStatus::Cancelled,
            ));
        }
        self.status = PurchaseLineStatus::Cancelled;
        Ok(())
    }
}

impl Entity for PurchaseOrderLine {
    type Id = LineId;

    fn id(&self) -> LineId {
        self.id
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleLineStatus {
    /// Held at the counter; units are reserved.
    Open,
    Completed,
    Voided,
}

/// One line of a point-of-sale sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    id: LineId,
    sale_id: SaleId,
    branch: BranchId,
    variant_id: VariantId,
    unit_id: Option<UnitId>,
    quantity: i64,
    status: SaleLineStatus,
}

impl SaleLine {
    pub fn new(
        id: LineId,
        sale_id: SaleId,
        branch: BranchId,
        variant_id: VariantId,
        unit_id: Option<UnitId>,
        quantity: i64,
        status: SaleLineStatus,
    ) -> EngineResult<Self> {
        if quantity <= 0 {
            return Err(EngineError::validation("sale quantity must be positive"));
        }
        if unit_id.is_some() && quantity != 1 {
            return Err(EngineError::validation("a unit line always sells exactly one unit"));
        }
        Ok(Self {
            id,
            sale_id,
            branch,
            variant_id,
            unit_id,
            quantity,
            status,
        })
    }

    pub fn sale_id(&self) -> SaleId {
        self.sale_id
    }

    pub fn branch(&self) -> BranchId {
        self.branch
    }

    pub fn variant_id(&self) -> VariantId {
        self.variant_id
    }

    pub fn unit_id(&self) -> Option<UnitId> {
        self.unit_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn status(&self) -> SaleLineStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == SaleLineStatus::Open
    }

    fn close(&mut self, to: SaleLineStatus) -> EngineResult<()> {
        if !self.is_open() {
            return Err(EngineError::invalid_transition(EntityRef::SaleLine(self.id), self.status, to));
        }
        self.status = to;
        Ok(())
    }

    pub fn complete(&mut self) -> EngineResult<()> {
        self.close(SaleLineStatus::Completed)
    }

    pub fn void(&mut self) -> EngineResult<()> {
        self.close(SaleLineStatus::Voided)
    }
}

impl Entity for SaleLine {
    type Id = LineId;

    fn id(&self) -> LineId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn po_line(ordered: i64) -> PurchaseOrderLine {
        PurchaseOrderLine::new(LineId::new(), PurchaseOrderId::new(), BranchId::new(), VariantId::new(), ordered)
            .unwrap()
    }

    #[test]
    fn partial_receipts_keep_line_open_until_complete() {
        let mut line = po_line(5);
        line.receive(2).unwrap();
        assert!(line.is_open());
        line.receive(3).unwrap();
        assert_eq!(line.status(), PurchaseLineStatus::Fulfilled);
    }

    #[test]
    fn over_receipt_is_rejected() {
        let mut line = po_line(2);
        assert!(matches!(line.receive(3), Err(EngineError::Validation(_))));
        assert_eq!(line.received(), 0);
    }

    #[test]
    fn fulfilled_line_cannot_be_cancelled() {
        let mut line = po_line(1);
        line.receive(1).unwrap();
        assert!(matches!(line.cancel(), Err(EngineError::InvalidTransition { .. })));
    }

    #[test]
    fn held_sale_line_can_be_completed_once() {
        let mut line = SaleLine::new(
            LineId::new(),
            SaleId::new(),
            BranchId::new(),
            VariantId::new(),
            Some(UnitId::new()),
            1,
            SaleLineStatus::Open,
        )
        .unwrap();

        line.complete().unwrap();
        assert!(line.void().is_err());
    }

    #[test]
    fn unit_lines_must_have_quantity_one() {
        let err = SaleLine::new(
            LineId::new(),
            SaleId::new(),
            BranchId::new(),
            VariantId::new(),
            Some(UnitId::new()),
            2,
            SaleLineStatus::Completed,
        );
        assert!(err.is_err());
    }
}
