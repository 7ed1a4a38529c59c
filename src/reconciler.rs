//! Parts usage reconciliation.
//!
//! Takes the parts a technician selected for a work order, applies each one
//! to the ledger independently, and keeps the work order's `parts_cost` in
//! step with the usage records it ends up with.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{LedgerError, StockConflict, ValidationError};
use crate::executor::StoreError;
use crate::ledger::{consume_in, refresh_parts_cost_in};
use crate::model::{InventoryPart, PartsUsageRecord, Quantity};
use crate::notify::Notifier;
use crate::store::{Store, StoreTx};

/// One requested consumption, already normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartRequest {
    pub part_id: Uuid,
    pub quantity: Quantity,
}

/// Parts picked in the UI, keyed by part. Picking a part again replaces
/// the earlier quantity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartsSelection {
    lines: BTreeMap<Uuid, Quantity>,
}

impl PartsSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select `part_id` with a user-typed quantity (`"1,5"` or `"1.5"`).
    ///
    /// # Errors
    ///
    /// The text is rejected before anything is stored; the selection is
    /// unchanged on error.
    pub fn select(&mut self, part_id: Uuid, quantity_text: &str) -> Result<Quantity, ValidationError> {
        let quantity = Quantity::parse(quantity_text)?;
        self.lines.insert(part_id, quantity);
        Ok(quantity)
    }

    pub fn deselect(&mut self, part_id: Uuid) -> bool {
        self.lines.remove(&part_id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn requests(&self) -> Vec<PartRequest> {
        self.lines
            .iter()
            .map(|(&part_id, &quantity)| PartRequest { part_id, quantity })
            .collect()
    }
}

/// Outcome of applying a batch of part requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartsReport {
    pub consumed: Vec<PartsUsageRecord>,
    pub conflicts: Vec<StockConflict>,
    /// Requested parts that no longer exist.
    pub missing: Vec<Uuid>,
    /// Parts at or below their minimum after this batch.
    #[serde(skip)]
    pub low_stock: Vec<InventoryPart>,
}

impl PartsReport {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty() && self.missing.is_empty()
    }
}

/// Apply `requests` to `work_order_id` inside the caller's unit of work.
///
/// Each part is decided on its own against the stock at this moment; a
/// conflict on one part does not stop the others. With `skip_recorded`,
/// parts that already have a usage record on the work order are left
/// alone and usage ids are derived from (work order, part), which makes a
/// resumed or duplicated commit apply each part at most once.
///
/// # Errors
///
/// Only storage failures abort the batch.
pub fn apply_in(
    tx: &mut dyn StoreTx,
    work_order_id: Uuid,
    requests: &[PartRequest],
    used_by: Uuid,
    at: DateTime<Utc>,
    skip_recorded: bool,
) -> Result<PartsReport, StoreError> {
    let mut report = PartsReport::default();
    if requests.is_empty() {
        return Ok(report);
    }

    let recorded: BTreeSet<Uuid> = if skip_recorded {
        tx.usage_for_work_order(work_order_id)?
            .iter()
            .map(|u| u.part_id)
            .collect()
    } else {
        BTreeSet::new()
    };

    for request in requests {
        if recorded.contains(&request.part_id) {
            log::debug!(
                "part {} already recorded on work order {work_order_id}",
                request.part_id
            );
            continue;
        }
        let usage_id = if skip_recorded {
            Uuid::new_v5(&work_order_id, request.part_id.as_bytes())
        } else {
            Uuid::new_v4()
        };
        match consume_in(
            tx,
            usage_id,
            request.part_id,
            request.quantity,
            work_order_id,
            used_by,
            at,
        ) {
            Ok(consumption) => {
                if consumption.part.is_low_stock() {
                    report.low_stock.push(consumption.part);
                }
                report.consumed.push(consumption.usage);
            }
            Err(LedgerError::Conflict(conflict)) => report.conflicts.push(conflict),
            Err(LedgerError::PartNotFound(id)) => {
                log::warn!("requested part {id} does not exist");
                report.missing.push(id);
            }
            Err(LedgerError::Store(e)) => return Err(e),
        }
    }

    if skip_recorded {
        // Usage applied by an earlier, interrupted attempt belongs in this report too.
        let requested: BTreeSet<Uuid> = requests.iter().map(|r| r.part_id).collect();
        report.consumed = tx
            .usage_for_work_order(work_order_id)?
            .into_iter()
            .filter(|u| requested.contains(&u.part_id))
            .collect();
    }
    if skip_recorded || !report.consumed.is_empty() {
        refresh_parts_cost_in(tx, work_order_id, at)?;
    }
    Ok(report)
}

/// Adds parts to existing work orders.
pub struct PartsUsageReconciler<S> {
    store: Arc<S>,
    notifier: Notifier,
}

impl<S: Store> PartsUsageReconciler<S> {
    pub fn new(store: Arc<S>, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    /// Consume the selection against `work_order_id` as one unit of work.
    pub fn commit(
        &self,
        work_order_id: Uuid,
        selection: &PartsSelection,
        used_by: Uuid,
        at: DateTime<Utc>,
    ) -> Result<PartsReport, StoreError> {
        let requests = selection.requests();
        let report = self.store.run(|tx| {
            if tx.find_work_order(work_order_id)?.is_none() {
                return Err(StoreError::NotFound {
                    entity: "work order",
                    id: work_order_id,
                });
            }
            apply_in(tx, work_order_id, &requests, used_by, at, false)
        })?;
        for part in &report.low_stock {
            self.notifier.low_stock(part);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Priority, WorkOrder, WorkOrderStatus, WorkOrderType, WorkTarget};
    use crate::store::{FailPoint, MemoryStore};
    use rust_decimal::Decimal;

    fn work_order() -> WorkOrder {
        let now = Utc::now();
        WorkOrder {
            id: Uuid::new_v4(),
            title: "Repair chiller".into(),
            description: None,
            work_type: WorkOrderType::Corrective,
            status: WorkOrderStatus::InProgress,
            priority: Priority::High,
            target: WorkTarget::Equipment(Uuid::new_v4()),
            assigned_to: None,
            created_by: Uuid::new_v4(),
            schedule_id: None,
            completion_id: None,
            due_date: None,
            completed_date: None,
            estimated_hours: None,
            actual_hours: None,
            labor_cost: Decimal::new(4000, 2),
            parts_cost: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    fn part(name: &str, stock: i64, price_cents: i64) -> InventoryPart {
        InventoryPart::new(name, Decimal::new(stock, 0), Decimal::new(price_cents, 2), Utc::now())
    }

    #[test]
    fn test_selection_normalizes_and_replaces() {
        let mut selection = PartsSelection::new();
        let id = Uuid::new_v4();
        selection.select(id, "1,5").unwrap();
        selection.select(id, "2.25").unwrap();
        assert_eq!(selection.requests().len(), 1);
        assert_eq!(selection.requests()[0].quantity.value().to_string(), "2.25");
        assert!(selection.select(id, "0").is_err());
        assert_eq!(selection.requests()[0].quantity.value().to_string(), "2.25");
    }

    #[test]
    fn test_conflict_on_one_part_does_not_block_others() {
        let store = Arc::new(MemoryStore::transactional());
        let wo = work_order();
        let plenty = part("Refrigerant R134a", 10, 500);
        let scarce = part("Compressor valve", 1, 12000);
        store
            .run(|tx| {
                tx.insert_work_order(&wo)?;
                tx.insert_part(&plenty)?;
                tx.insert_part(&scarce)
            })
            .unwrap();

        let mut selection = PartsSelection::new();
        selection.select(plenty.id, "4").unwrap();
        selection.select(scarce.id, "2").unwrap();
        let reconciler = PartsUsageReconciler::new(Arc::clone(&store), Notifier::disabled());
        let report = reconciler
            .commit(wo.id, &selection, Uuid::new_v4(), Utc::now())
            .unwrap();

        assert_eq!(report.consumed.len(), 1);
        assert_eq!(report.consumed[0].part_id, plenty.id);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].part_name, "Compressor valve");
        assert_eq!(report.conflicts[0].available.to_string(), "1.00");

        let after = store.run(|tx| tx.find_work_order(wo.id)).unwrap().unwrap();
        assert_eq!(after.parts_cost.to_string(), "20.00");
        assert_eq!(after.actual_cost().to_string(), "60.00");
    }

    #[test]
    fn test_skip_recorded_applies_each_part_once() {
        let store = MemoryStore::transactional();
        let wo = work_order();
        let p = part("O-ring", 10, 100);
        store
            .run(|tx| {
                tx.insert_work_order(&wo)?;
                tx.insert_part(&p)
            })
            .unwrap();
        let requests = [PartRequest {
            part_id: p.id,
            quantity: Quantity::parse("3").unwrap(),
        }];

        for _ in 0..2 {
            store
                .run(|tx| apply_in(tx, wo.id, &requests, Uuid::new_v4(), Utc::now(), true))
                .unwrap();
        }
        let stock = store.run(|tx| tx.find_part(p.id)).unwrap().unwrap().quantity_in_stock;
        assert_eq!(stock.to_string(), "7.00");
    }

    #[test]
    fn test_skip_recorded_reports_and_costs_earlier_usage() {
        let store = MemoryStore::non_transactional();
        let wo = work_order();
        let p = part("Drive belt", 10, 500);
        store
            .run(|tx| {
                tx.insert_work_order(&wo)?;
                tx.insert_part(&p)
            })
            .unwrap();
        let requests = [PartRequest {
            part_id: p.id,
            quantity: Quantity::parse("4").unwrap(),
        }];

        // Usage and stock land, the cost roll-up does not.
        store.fail_next(FailPoint::UpdateWorkOrder);
        assert!(store
            .run(|tx| apply_in(tx, wo.id, &requests, Uuid::new_v4(), Utc::now(), true))
            .is_err());
        let stale = store.run(|tx| tx.find_work_order(wo.id)).unwrap().unwrap();
        assert_eq!(stale.parts_cost, Decimal::ZERO);

        let report = store
            .run(|tx| apply_in(tx, wo.id, &requests, Uuid::new_v4(), Utc::now(), true))
            .unwrap();
        assert_eq!(report.consumed.len(), 1);
        assert_eq!(report.consumed[0].total_cost.to_string(), "20.00");

        let after = store.run(|tx| tx.find_work_order(wo.id)).unwrap().unwrap();
        assert_eq!(after.parts_cost.to_string(), "20.00");
        let stock = store.run(|tx| tx.find_part(p.id)).unwrap().unwrap().quantity_in_stock;
        assert_eq!(stock.to_string(), "6.00");
    }

    #[test]
    fn test_unknown_work_order_is_rejected() {
        let store = Arc::new(MemoryStore::transactional());
        let reconciler = PartsUsageReconciler::new(store, Notifier::disabled());
        let mut selection = PartsSelection::new();
        selection.select(Uuid::new_v4(), "1").unwrap();
        let err = reconciler.commit(Uuid::new_v4(), &selection, Uuid::new_v4(), Utc::now());
        assert!(matches!(err, Err(StoreError::NotFound { .. })));
    }
}
