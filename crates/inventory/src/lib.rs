//! Inventory domain: catalog products, variant hierarchy, inventory units, and
//! the pure aggregation rules that derive parent and product quantities.
//!
//! No IO, no storage; the infra crate applies these rules transactionally.

pub mod aggregation;
pub mod lines;
pub mod product;
pub mod unit;
pub mod variant;

pub use lines::{PurchaseLineStatus, PurchaseOrderLine, SaleLine, SaleLineStatus};
pub use product::Product;
pub use unit::{InventoryUnit, UnitStatus};
pub use variant::{Variant, VariantKind};
