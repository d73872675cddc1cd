//! Persisted layout of the store.
//!
//! An export is the full set of versioned rows plus the complete movement
//! ledger, serialized with serde. Importing re-verifies what the live store
//! enforces on commit: serial uniqueness and ledger chain continuity.

use serde::{Deserialize, Serialize};

use branchstock_branches::{Branch, SharedRecord};
use branchstock_core::{EngineError, EngineResult, Entity};
use branchstock_inventory::{InventoryUnit, Product, PurchaseOrderLine, SaleLine, Variant};
use branchstock_ledger::{Movement, StockKey};
use branchstock_transfers::Transfer;

use super::state::{StoreState, Versioned};

pub const EXPORT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub key: StockKey,
    pub quantity: i64,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreExport {
    pub format_version: u32,
    pub ledger_high_water: u64,
    pub branches: Vec<Versioned<Branch>>,
    pub products: Vec<Versioned<Product>>,
    pub variants: Vec<Versioned<Variant>>,
    pub units: Vec<Versioned<InventoryUnit>>,
    pub stock: Vec<StockLevel>,
    pub transfers: Vec<Versioned<Transfer>>,
    pub records: Vec<Versioned<SharedRecord>>,
    pub purchase_lines: Vec<Versioned<PurchaseOrderLine>>,
    pub sale_lines: Vec<Versioned<SaleLine>>,
    pub movements: Vec<Movement>,
}

impl StoreExport {
    pub fn from_state(state: &StoreState, movements: Vec<Movement>) -> Self {
        Self {
            format_version: EXPORT_FORMAT_VERSION,
            ledger_high_water: state.ledger_high_water,
            branches: state.branches.values().cloned().collect(),
            products: state.products.values().cloned().collect(),
            variants: state.variants.values().cloned().collect(),
            units: state.units.values().cloned().collect(),
            stock: state
                .stock
                .iter()
                .map(|(key, r)| StockLevel {
                    key: *key,
                    quantity: r.value,
                    version: r.version,
                })
                .collect(),
            transfers: state.transfers.values().cloned().collect(),
            records: state.records.values().cloned().collect(),
            purchase_lines: state.purchase_lines.values().cloned().collect(),
            sale_lines: state.sale_lines.values().cloned().collect(),
            movements,
        }
    }

    /// Rebuild a store state, returning it with the movements to load into a ledger.
    pub fn into_state(self) -> EngineResult<(StoreState, Vec<Movement>)> {
        if self.format_version != EXPORT_FORMAT_VERSION {
            return Err(EngineError::validation(format!(
                "unsupported export format version {}",
                self.format_version
            )));
        }
        let last_sequence = self.movements.iter().map(|m| m.sequence).max().unwrap_or(0);
        if last_sequence != self.ledger_high_water {
            return Err(EngineError::integrity(format!(
                "export high-water {} disagrees with last movement sequence {last_sequence}",
                self.ledger_high_water
            )));
        }

        let mut state = StoreState {
            ledger_high_water: self.ledger_high_water,
            ..StoreState::default()
        };
        state.branches = self.branches.into_iter().map(|r| (r.value.id(), r)).collect();
        state.products = self.products.into_iter().map(|r| (r.value.id(), r)).collect();
        state.variants = self.variants.into_iter().map(|r| (r.value.id(), r)).collect();
        state.stock = self
            .stock
            .into_iter()
            .map(|l| {
                (
                    l.key,
                    Versioned {
                        version: l.version,
                        value: l.quantity,
                    },
                )
            })
            .collect();
        state.transfers = self
            .transfers
            .into_iter()
            .map(|r| (r.value.id_typed(), r))
            .collect();
        state.records = self.records.into_iter().map(|r| (r.value.id(), r)).collect();
        state.purchase_lines = self
            .purchase_lines
            .into_iter()
            .map(|r| (r.value.id(), r))
            .collect();
        state.sale_lines = self.sale_lines.into_iter().map(|r| (r.value.id(), r)).collect();

        for unit in self.units {
            state.claim_serial(&unit.value)?;
            state.units.insert(unit.value.id(), unit);
        }
        state.index_skus()?;

        Ok((state, self.movements))
    }

    pub fn to_json(&self) -> EngineResult<String> {
        serde_json::to_string(self)
            .map_err(|e| EngineError::integrity(format!("export serialization failed: {e}")))
    }

    pub fn from_json(json: &str) -> EngineResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| EngineError::validation(format!("invalid store export: {e}")))
    }
}
