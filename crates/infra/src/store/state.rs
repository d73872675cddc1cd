use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use branchstock_branches::{Branch, SharedRecord};
use branchstock_core::{
    BranchId, EngineError, EngineResult, Entity, EntityRef, LineId, ProductId, RecordId,
    TransferId, UnitId, VariantId,
};
use branchstock_inventory::aggregation;
use branchstock_inventory::{InventoryUnit, Product, PurchaseOrderLine, SaleLine, Variant};
use branchstock_ledger::StockKey;
use branchstock_transfers::Transfer;

/// A stored record with its optimistic-concurrency version.
///
/// Version `0` is never stored: it means "absent". The first committed write
/// stores version `1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Address of one row in the store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowKey {
    Branch(BranchId),
    Product(ProductId),
    Variant(VariantId),
    Unit(UnitId),
    Stock(StockKey),
    Transfer(TransferId),
    Record(RecordId),
    PurchaseLine(LineId),
    SaleLine(LineId),
}

impl core::fmt::Display for RowKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RowKey::Branch(id) => write!(f, "branch:{id}"),
            RowKey::Product(id) => write!(f, "product:{id}"),
            RowKey::Variant(id) => write!(f, "variant:{id}"),
            RowKey::Unit(id) => write!(f, "unit:{id}"),
            RowKey::Stock(key) => write!(f, "stock:{key}"),
            RowKey::Transfer(id) => write!(f, "transfer:{id}"),
            RowKey::Record(id) => write!(f, "record:{id}"),
            RowKey::PurchaseLine(id) => write!(f, "purchase_order_line:{id}"),
            RowKey::SaleLine(id) => write!(f, "sale_line:{id}"),
        }
    }
}

/// New content for one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    Branch(Branch),
    Product(Product),
    Variant(Variant),
    Unit(InventoryUnit),
    Stock(StockKey, i64),
    Transfer(Transfer),
    Record(SharedRecord),
    PurchaseLine(PurchaseOrderLine),
    SaleLine(SaleLine),
}

impl Row {
    pub fn key(&self) -> RowKey {
        match self {
            Row::Branch(b) => RowKey::Branch(b.id()),
            Row::Product(p) => RowKey::Product(p.id()),
            Row::Variant(v) => RowKey::Variant(v.id()),
            Row::Unit(u) => RowKey::Unit(u.id()),
            Row::Stock(key, _) => RowKey::Stock(*key),
            Row::Transfer(t) => RowKey::Transfer(t.id_typed()),
            Row::Record(r) => RowKey::Record(r.id()),
            Row::PurchaseLine(l) => RowKey::PurchaseLine(l.id()),
            Row::SaleLine(l) => RowKey::SaleLine(l.id()),
        }
    }
}

/// One committed, immutable state of the store.
///
/// Snapshots are shared behind `Arc` and never mutated after publication; a
/// commit builds the next state from a copy. `ledger_high_water` is the last
/// ledger sequence whose movements this state reflects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreState {
    pub(crate) branches: BTreeMap<BranchId, Versioned<Branch>>,
    pub(crate) products: BTreeMap<ProductId, Versioned<Product>>,
    pub(crate) variants: BTreeMap<VariantId, Versioned<Variant>>,
    pub(crate) units: BTreeMap<UnitId, Versioned<InventoryUnit>>,
    pub(crate) stock: BTreeMap<StockKey, Versioned<i64>>,
    pub(crate) transfers: BTreeMap<TransferId, Versioned<Transfer>>,
    pub(crate) records: BTreeMap<RecordId, Versioned<SharedRecord>>,
    pub(crate) purchase_lines: BTreeMap<LineId, Versioned<PurchaseOrderLine>>,
    pub(crate) sale_lines: BTreeMap<LineId, Versioned<SaleLine>>,
    pub(crate) serials: BTreeMap<String, UnitId>,
    pub(crate) product_skus: BTreeMap<String, ProductId>,
    pub(crate) variant_skus: BTreeMap<String, VariantId>,
    pub(crate) ledger_high_water: u64,
}

impl StoreState {
    pub fn ledger_high_water(&self) -> u64 {
        self.ledger_high_water
    }

    pub fn version(&self, key: &RowKey) -> u64 {
        let version = match key {
            RowKey::Branch(id) => self.branches.get(id).map(|r| r.version),
            RowKey::Product(id) => self.products.get(id).map(|r| r.version),
            RowKey::Variant(id) => self.variants.get(id).map(|r| r.version),
            RowKey::Unit(id) => self.units.get(id).map(|r| r.version),
            RowKey::Stock(key) => self.stock.get(key).map(|r| r.version),
            RowKey::Transfer(id) => self.transfers.get(id).map(|r| r.version),
            RowKey::Record(id) => self.records.get(id).map(|r| r.version),
            RowKey::PurchaseLine(id) => self.purchase_lines.get(id).map(|r| r.version),
            RowKey::SaleLine(id) => self.sale_lines.get(id).map(|r| r.version),
        };
        version.unwrap_or(0)
    }

    pub fn branch(&self, id: BranchId) -> Option<&Branch> {
        self.branches.get(&id).map(|r| &r.value)
    }

    pub fn branches(&self) -> impl Iterator<Item = &Branch> {
        self.branches.values().map(|r| &r.value)
    }

    /// The branch, provided it exists and is active.
    pub fn active_branch(&self, id: BranchId) -> EngineResult<&Branch> {
        match self.branch(id) {
            Some(branch) if branch.is_active() => Ok(branch),
            _ => Err(EngineError::UnknownBranch(id)),
        }
    }

    pub fn product(&self, id: ProductId) -> Option<&Product> {
        self.products.get(&id).map(|r| &r.value)
    }

    pub fn products(&self) -> impl Iterator<Item = &Product> {
        self.products.values().map(|r| &r.value)
    }

    pub fn require_product(&self, id: ProductId) -> EngineResult<&Product> {
        self.product(id)
            .ok_or(EngineError::NotFound(EntityRef::Product(id)))
    }

    pub fn variant(&self, id: VariantId) -> Option<&Variant> {
        self.variants.get(&id).map(|r| &r.value)
    }

    pub fn variants(&self) -> impl Iterator<Item = &Variant> {
        self.variants.values().map(|r| &r.value)
    }

    pub fn require_variant(&self, id: VariantId) -> EngineResult<&Variant> {
        self.variant(id)
            .ok_or(EngineError::NotFound(EntityRef::Variant(id)))
    }

    /// Direct children of `parent`, active or not.
    pub fn children(&self, parent: VariantId) -> impl Iterator<Item = &Variant> {
        aggregation::children_of(parent, self.variants())
    }

    pub fn unit(&self, id: UnitId) -> Option<&InventoryUnit> {
        self.units.get(&id).map(|r| &r.value)
    }

    pub fn units(&self) -> impl Iterator<Item = &InventoryUnit> {
        self.units.values().map(|r| &r.value)
    }

    pub fn require_unit(&self, id: UnitId) -> EngineResult<&InventoryUnit> {
        self.unit(id).ok_or(EngineError::NotFound(EntityRef::Unit(id)))
    }

    /// Unit currently reserving `serial`, if any.
    pub fn serial_holder(&self, serial: &str) -> Option<UnitId> {
        self.serials.get(serial.trim()).copied()
    }

    /// Stored quantity of a stock position (absent means zero).
    pub fn level(&self, key: &StockKey) -> i64 {
        self.stock.get(key).map(|r| r.value).unwrap_or(0)
    }

    pub fn levels(&self) -> impl Iterator<Item = (&StockKey, i64)> {
        self.stock.iter().map(|(k, r)| (k, r.value))
    }

    pub fn transfer(&self, id: TransferId) -> Option<&Transfer> {
        self.transfers.get(&id).map(|r| &r.value)
    }

    pub fn transfers(&self) -> impl Iterator<Item = &Transfer> {
        self.transfers.values().map(|r| &r.value)
    }

    pub fn require_transfer(&self, id: TransferId) -> EngineResult<&Transfer> {
        self.transfer(id)
            .ok_or(EngineError::NotFound(EntityRef::Transfer(id)))
    }

    pub fn record(&self, id: RecordId) -> Option<&SharedRecord> {
        self.records.get(&id).map(|r| &r.value)
    }

    pub fn records(&self) -> impl Iterator<Item = &SharedRecord> {
        self.records.values().map(|r| &r.value)
    }

    pub fn purchase_line(&self, id: LineId) -> Option<&PurchaseOrderLine> {
        self.purchase_lines.get(&id).map(|r| &r.value)
    }

    pub fn purchase_lines(&self) -> impl Iterator<Item = &PurchaseOrderLine> {
        self.purchase_lines.values().map(|r| &r.value)
    }

    pub fn sale_line(&self, id: LineId) -> Option<&SaleLine> {
        self.sale_lines.get(&id).map(|r| &r.value)
    }

    pub fn sale_lines(&self) -> impl Iterator<Item = &SaleLine> {
        self.sale_lines.values().map(|r| &r.value)
    }

    /// Write (or remove, for `None`) one row, bumping its version.
    ///
    /// Maintains the serial and sku indexes; a serial already held by another
    /// unit is `SerialInUse`, a sku already used by another product or variant
    /// is a validation error. Callers apply writes to a private copy, so a
    /// failure here leaves the published state untouched.
    pub(crate) fn apply(&mut self, key: RowKey, row: Option<Row>) -> EngineResult<()> {
        let version = self.version(&key) + 1;

        match key {
            RowKey::Unit(id) => self.release_serial(id),
            RowKey::Product(id) => {
                if let Some(old) = self.products.get(&id) {
                    release_sku(&mut self.product_skus, old.value.sku(), id);
                }
            }
            RowKey::Variant(id) => {
                if let Some(old) = self.variants.get(&id) {
                    release_sku(&mut self.variant_skus, old.value.sku(), id);
                }
            }
            _ => {}
        }

        match row {
            None => {
                match key {
                    RowKey::Branch(id) => {
                        self.branches.remove(&id);
                    }
                    RowKey::Product(id) => {
                        self.products.remove(&id);
                    }
                    RowKey::Variant(id) => {
                        self.variants.remove(&id);
                    }
                    RowKey::Unit(id) => {
                        self.units.remove(&id);
                    }
                    RowKey::Stock(k) => {
                        self.stock.remove(&k);
                    }
                    RowKey::Transfer(id) => {
                        self.transfers.remove(&id);
                    }
                    RowKey::Record(id) => {
                        self.records.remove(&id);
                    }
                    RowKey::PurchaseLine(id) => {
                        self.purchase_lines.remove(&id);
                    }
                    RowKey::SaleLine(id) => {
                        self.sale_lines.remove(&id);
                    }
                }
                Ok(())
            }
            Some(row) => {
                if row.key() != key {
                    return Err(EngineError::integrity(format!(
                        "row for {} written under {key}",
                        row.key()
                    )));
                }
                match row {
                    Row::Branch(v) => {
                        self.branches.insert(v.id(), Versioned { version, value: v });
                    }
                    Row::Product(v) => {
                        claim_sku(&mut self.product_skus, "product", v.sku(), v.id())?;
                        self.products.insert(v.id(), Versioned { version, value: v });
                    }
                    Row::Variant(v) => {
                        claim_sku(&mut self.variant_skus, "variant", v.sku(), v.id())?;
                        self.variants.insert(v.id(), Versioned { version, value: v });
                    }
                    Row::Unit(v) => {
                        self.claim_serial(&v)?;
                        self.units.insert(v.id(), Versioned { version, value: v });
                    }
                    Row::Stock(k, qty) => {
                        self.stock.insert(k, Versioned { version, value: qty });
                    }
                    Row::Transfer(v) => {
                        self.transfers.insert(v.id_typed(), Versioned { version, value: v });
                    }
                    Row::Record(v) => {
                        self.records.insert(v.id(), Versioned { version, value: v });
                    }
                    Row::PurchaseLine(v) => {
                        self.purchase_lines.insert(v.id(), Versioned { version, value: v });
                    }
                    Row::SaleLine(v) => {
                        self.sale_lines.insert(v.id(), Versioned { version, value: v });
                    }
                }
                Ok(())
            }
        }
    }

    fn release_serial(&mut self, unit_id: UnitId) {
        let serial = self
            .units
            .get(&unit_id)
            .and_then(|r| r.value.serial().map(str::to_string));
        if let Some(serial) = serial {
            if self.serials.get(&serial) == Some(&unit_id) {
                self.serials.remove(&serial);
            }
        }
    }

    /// Rebuild the sku indexes from the stored products and variants.
    pub(crate) fn index_skus(&mut self) -> EngineResult<()> {
        self.product_skus.clear();
        self.variant_skus.clear();
        for (id, row) in &self.products {
            claim_sku(&mut self.product_skus, "product", row.value.sku(), *id)?;
        }
        for (id, row) in &self.variants {
            claim_sku(&mut self.variant_skus, "variant", row.value.sku(), *id)?;
        }
        Ok(())
    }

    pub(crate) fn claim_serial(&mut self, unit: &InventoryUnit) -> EngineResult<()> {
        if !unit.holds_serial() {
            return Ok(());
        }
        let Some(serial) = unit.serial() else {
            return Ok(());
        };
        match self.serials.get(serial) {
            Some(holder) if *holder != unit.id() => Err(EngineError::SerialInUse {
                serial: serial.to_string(),
                unit_id: *holder,
            }),
            _ => {
                self.serials.insert(serial.to_string(), unit.id());
                Ok(())
            }
        }
    }
}

fn claim_sku<I>(index: &mut BTreeMap<String, I>, kind: &str, sku: &str, id: I) -> EngineResult<()>
where
    I: Copy + PartialEq,
{
    match index.get(sku) {
        Some(holder) if *holder != id => Err(EngineError::validation(format!(
            "{kind} sku '{sku}' already exists"
        ))),
        _ => {
            index.insert(sku.to_string(), id);
            Ok(())
        }
    }
}

fn release_sku<I: PartialEq>(index: &mut BTreeMap<String, I>, sku: &str, id: I) {
    if index.get(sku) == Some(&id) {
        index.remove(sku);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchstock_branches::SharingPolicies;
    use branchstock_inventory::UnitStatus;

    fn unit(serial: &str) -> InventoryUnit {
        InventoryUnit::new(UnitId::new(), VariantId::new(), BranchId::new(), Some(serial.into())).unwrap()
    }

    #[test]
    fn versions_start_at_one_and_bump_per_write() {
        let mut state = StoreState::default();
        let branch = Branch::new(BranchId::new(), "Main", SharingPolicies::default()).unwrap();
        let key = RowKey::Branch(branch.id());

        assert_eq!(state.version(&key), 0);
        state.apply(key, Some(Row::Branch(branch.clone()))).unwrap();
        assert_eq!(state.version(&key), 1);
        state.apply(key, Some(Row::Branch(branch))).unwrap();
        assert_eq!(state.version(&key), 2);
    }

    #[test]
    fn duplicate_serial_is_rejected() {
        let mut state = StoreState::default();
        let first = unit("IMEI-1");
        let second = unit(" IMEI-1 ");

        state.apply(RowKey::Unit(first.id()), Some(Row::Unit(first.clone()))).unwrap();
        let err = state
            .apply(RowKey::Unit(second.id()), Some(Row::Unit(second)))
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::SerialInUse {
                serial: "IMEI-1".into(),
                unit_id: first.id()
            }
        );
    }

    #[test]
    fn disposed_unit_frees_its_serial() {
        let mut state = StoreState::default();
        let mut first = unit("SN-9");
        state.apply(RowKey::Unit(first.id()), Some(Row::Unit(first.clone()))).unwrap();

        first.transition(UnitStatus::Disposed).unwrap();
        state.apply(RowKey::Unit(first.id()), Some(Row::Unit(first))).unwrap();
        assert_eq!(state.serial_holder("SN-9"), None);

        let second = unit("SN-9");
        state.apply(RowKey::Unit(second.id()), Some(Row::Unit(second.clone()))).unwrap();
        assert_eq!(state.serial_holder("SN-9"), Some(second.id()));
    }

    #[test]
    fn sku_collision_is_rejected_at_apply_time() {
        let mut state = StoreState::default();
        let first = Product::new(ProductId::new(), "TAB", "Tablet").unwrap();
        let second = Product::new(ProductId::new(), "TAB", "Tablet, other import").unwrap();

        state.apply(RowKey::Product(first.id()), Some(Row::Product(first.clone()))).unwrap();
        state.apply(RowKey::Product(first.id()), Some(Row::Product(first.clone()))).unwrap();
        let err = state
            .apply(RowKey::Product(second.id()), Some(Row::Product(second.clone())))
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        state.apply(RowKey::Product(first.id()), None).unwrap();
        state.apply(RowKey::Product(second.id()), Some(Row::Product(second))).unwrap();
    }

    #[test]
    fn mismatched_row_key_is_an_integrity_defect() {
        let mut state = StoreState::default();
        let err = state
            .apply(RowKey::Unit(UnitId::new()), Some(Row::Unit(unit("X"))))
            .unwrap_err();
        assert!(matches!(err, EngineError::DataIntegrityDefect(_)));
    }
}
