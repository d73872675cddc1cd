//! Reconciliation: verify stored levels against the ledger and the aggregation
//! rules on one snapshot. Reports only; the one explicit correction is
//! [`StockEngine::normalize_product_ownership`].

use std::collections::BTreeSet;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use branchstock_core::{ActorId, BranchId, EngineResult, Entity, ProductId, VariantId};
use branchstock_events::{EventBus, EventEnvelope};
use branchstock_inventory::{VariantKind, aggregation};
use branchstock_ledger::{StockKey, replay, verify_chain};

use crate::events::{ProductOwnerCleared, envelope};
use crate::store::{ChangeSet, EntityStore, Row, RowKey, StoreState};

use super::{Plan, StockEngine};

/// One disagreement found by [`StockEngine::reconcile`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mismatch {
    LedgerDisagrees {
        key: StockKey,
        stored: i64,
        replayed: i64,
    },
    /// The key's movements do not form a continuous chain.
    LedgerGap { key: StockKey, detail: String },
    ParentSumDisagrees {
        parent: VariantId,
        branch: BranchId,
        stored: i64,
        expected: i64,
    },
    UnitCountDisagrees {
        variant: VariantId,
        branch: BranchId,
        stored: i64,
        available: i64,
    },
    ProductTotalDisagrees {
        product: ProductId,
        branch: BranchId,
        stored: i64,
        expected: i64,
    },
    ProductOwnerDefect { product: ProductId, owner: BranchId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    /// Ledger position the checked snapshot reflects.
    pub ledger_high_water: u64,
    pub keys_checked: usize,
    pub mismatches: Vec<Mismatch>,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Aggregation-rule checks that need only the snapshot.
fn derived_mismatches(state: &StoreState, branches: &BTreeSet<BranchId>) -> Vec<Mismatch> {
    let mut found = Vec::new();

    for product in state.products() {
        if let Some(owner) = product.branch_owner() {
            found.push(Mismatch::ProductOwnerDefect {
                product: product.id(),
                owner,
            });
        }
    }

    for &branch in branches {
        let level = |variant: VariantId| state.level(&StockKey::variant(variant, branch));

        for parent in state.variants().filter(|v| v.is_parent() && v.is_active()) {
            let expected = aggregation::parent_quantity(state.children(parent.id()).map(|c| (c, level(c.id()))));
            let stored = level(parent.id());
            if stored != expected {
                found.push(Mismatch::ParentSumDisagrees {
                    parent: parent.id(),
                    branch,
                    stored,
                    expected,
                });
            }
        }

        for variant in state.variants().filter(|v| v.kind() == VariantKind::UnitTracked) {
            let available = aggregation::available_units(
                state
                    .units()
                    .filter(|u| u.variant_id() == variant.id() && u.branch() == branch),
            );
            let stored = level(variant.id());
            if stored != available {
                found.push(Mismatch::UnitCountDisagrees {
                    variant: variant.id(),
                    branch,
                    stored,
                    available,
                });
            }
        }

        for product in state.products() {
            let expected = aggregation::product_total(
                state
                    .variants()
                    .filter(|v| v.product_id() == product.id())
                    .map(|v| (v, level(v.id()))),
            );
            let stored = state.level(&StockKey::product(product.id(), branch));
            if stored != expected {
                found.push(Mismatch::ProductTotalDisagrees {
                    product: product.id(),
                    branch,
                    stored,
                    expected,
                });
            }
        }
    }
    found
}

impl<S, B> StockEngine<S, B>
where
    S: EntityStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Replay of one stock position up to the current snapshot.
    pub fn replay_stock(&self, key: StockKey) -> EngineResult<i64> {
        let snapshot = self.store().snapshot()?;
        let movements = self.store().movements(&key, snapshot.ledger_high_water())?;
        Ok(replay(&movements))
    }

    /// Check every stock position and aggregation rule on one snapshot.
    pub fn reconcile(&self) -> EngineResult<ReconciliationReport> {
        let snapshot = self.store().snapshot()?;
        let up_to = snapshot.ledger_high_water();

        let mut keys: BTreeSet<StockKey> = self.store().ledger_keys(up_to)?.into_iter().collect();
        keys.extend(snapshot.levels().map(|(k, _)| *k));

        let mut mismatches = Vec::new();
        for key in &keys {
            let movements = self.store().movements(key, up_to)?;
            if let Err(err) = verify_chain(&movements) {
                mismatches.push(Mismatch::LedgerGap {
                    key: *key,
                    detail: err.to_string(),
                });
            }
            let stored = snapshot.level(key);
            let replayed = replay(&movements);
            if stored != replayed {
                mismatches.push(Mismatch::LedgerDisagrees {
                    key: *key,
                    stored,
                    replayed,
                });
            }
        }

        let mut branches: BTreeSet<BranchId> = snapshot.branches().map(|b| b.id()).collect();
        branches.extend(keys.iter().map(|k| k.branch));
        mismatches.extend(derived_mismatches(&snapshot, &branches));

        let report = ReconciliationReport {
            ledger_high_water: up_to,
            keys_checked: keys.len(),
            mismatches,
        };
        if report.is_consistent() {
            info!(ledger_high_water = up_to, keys = report.keys_checked, "reconciliation clean");
        } else {
            warn!(
                ledger_high_water = up_to,
                mismatches = report.mismatches.len(),
                "reconciliation found mismatches"
            );
        }
        Ok(report)
    }

    /// Clear branch owners found on products. Each cleared product publishes
    /// `integrity.product_owner_cleared`.
    pub fn normalize_product_ownership(&self, actor: ActorId) -> EngineResult<Vec<ProductId>> {
        let cleared = self.execute("normalize_product_ownership", |state| {
            let mut changes = ChangeSet::new();
            let mut events = Vec::new();
            let mut cleared = Vec::new();

            for product in state.products() {
                let mut fixed = product.clone();
                let Some(previous_owner) = fixed.clear_branch_owner() else {
                    continue;
                };
                let event = ProductOwnerCleared {
                    product_id: product.id(),
                    previous_owner,
                    actor,
                    occurred_at: Utc::now(),
                };
                let sequence = state.version(&RowKey::Product(product.id())) + 1;
                events.push(envelope(
                    previous_owner,
                    *product.id().as_uuid(),
                    "product",
                    sequence,
                    &event,
                )?);
                cleared.push((product.id(), previous_owner));
                changes.put(state, Row::Product(fixed));
            }
            Ok(Plan::new(changes, cleared).with_events(events))
        })?;

        for (product, owner) in &cleared {
            warn!(product_id = %product, previous_owner = %owner, "cleared branch owner from product");
        }
        Ok(cleared.into_iter().map(|(product, _)| product).collect())
    }
}
