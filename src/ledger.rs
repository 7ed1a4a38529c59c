//! Inventory ledger: the only code that moves part stock.
//!
//! Consumption is a conditional decrement at the storage layer followed by
//! a usage record carrying the price at the moment of use. Restoration is a
//! plain addition. The `*_in` functions work inside a caller's unit of work;
//! [`InventoryLedger`] wraps them in units of their own.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{LedgerError, StockConflict};
use crate::executor::StoreError;
use crate::model::quantity::canonical;
use crate::model::{InventoryPart, PartsUsageRecord, Quantity};
use crate::store::{StockUpdate, Store, StoreTx};

/// A consumption that went through: the usage record and the part after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumption {
    pub usage: PartsUsageRecord,
    pub part: InventoryPart,
}

/// Take `quantity` of `part_id` out of stock for `work_order_id`, recording
/// the usage under `usage_id`.
///
/// A usage id that already exists makes the insert fail, and the stock is
/// put back.
///
/// # Errors
///
/// `Conflict` if the stock at this moment is below `quantity` (nothing is
/// written), `PartNotFound` for an unknown part.
pub fn consume_in(
    tx: &mut dyn StoreTx,
    usage_id: Uuid,
    part_id: Uuid,
    quantity: Quantity,
    work_order_id: Uuid,
    used_by: Uuid,
    used_at: DateTime<Utc>,
) -> Result<Consumption, LedgerError> {
    let part = match tx.try_decrement_stock(part_id, quantity.value())? {
        StockUpdate::Applied(part) => part,
        StockUpdate::Insufficient { name, available } => {
            #[cfg(feature = "metrics")]
            crate::metrics::METRICS.record_stock_conflict();
            log::info!("stock conflict on {name}: requested {quantity}, available {available}");
            return Err(StockConflict {
                part_id,
                part_name: name,
                requested: quantity.value(),
                available,
            }
            .into());
        }
        StockUpdate::Missing => return Err(LedgerError::PartNotFound(part_id)),
    };

    let mut usage = PartsUsageRecord::snapshot(&part, work_order_id, quantity, used_by, used_at);
    usage.id = usage_id;
    if let Err(e) = tx.insert_usage(&usage) {
        // Put the stock back so a store without transactions is not left short.
        if let Err(undo) = tx.increment_stock(part_id, quantity.value()) {
            log::error!(
                "could not return {quantity} of part {part_id} after failed usage insert: {undo}"
            );
        }
        return Err(e.into());
    }
    log::debug!(
        "consumed {} of {} for work order {}",
        quantity,
        part.name,
        work_order_id
    );
    Ok(Consumption { usage, part })
}

/// Return a usage record's quantity to stock. No upper bound applies.
pub fn restore_in(
    tx: &mut dyn StoreTx,
    usage: &PartsUsageRecord,
) -> Result<InventoryPart, LedgerError> {
    tx.increment_stock(usage.part_id, usage.quantity_used.value())?
        .ok_or(LedgerError::PartNotFound(usage.part_id))
}

/// Recompute a work order's `parts_cost` from its usage records.
pub fn refresh_parts_cost_in(
    tx: &mut dyn StoreTx,
    work_order_id: Uuid,
    at: DateTime<Utc>,
) -> Result<Decimal, StoreError> {
    let total = canonical(
        tx.usage_for_work_order(work_order_id)?
            .iter()
            .map(|u| u.total_cost)
            .sum(),
    );
    if let Some(mut work_order) = tx.find_work_order(work_order_id)? {
        if work_order.parts_cost != total {
            work_order.parts_cost = total;
            work_order.updated_at = at;
            tx.update_work_order(&work_order)?;
        }
    }
    Ok(total)
}

/// Stock operations as standalone units of work.
pub struct InventoryLedger<S> {
    store: Arc<S>,
}

impl<S: Store> InventoryLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn add_part(&self, part: &InventoryPart) -> Result<(), StoreError> {
        self.store.run(|tx| tx.insert_part(part))
    }

    pub fn part(&self, part_id: Uuid) -> Result<Option<InventoryPart>, StoreError> {
        self.store.run(|tx| tx.find_part(part_id))
    }

    /// Book incoming stock.
    pub fn receive_stock(&self, part_id: Uuid, quantity: Quantity) -> Result<InventoryPart, LedgerError> {
        self.store.run(|tx| {
            tx.increment_stock(part_id, quantity.value())?
                .ok_or(LedgerError::PartNotFound(part_id))
        })
    }

    /// Change the list price. Existing usage records keep their snapshot.
    pub fn set_unit_price(&self, part_id: Uuid, unit_price: Decimal) -> Result<(), LedgerError> {
        let found = self.store.run(|tx| tx.set_unit_price(part_id, unit_price))?;
        if found {
            Ok(())
        } else {
            Err(LedgerError::PartNotFound(part_id))
        }
    }

    pub fn consume(
        &self,
        part_id: Uuid,
        quantity: Quantity,
        work_order_id: Uuid,
        used_by: Uuid,
        used_at: DateTime<Utc>,
    ) -> Result<Consumption, LedgerError> {
        self.store
            .run(|tx| consume_in(tx, Uuid::new_v4(), part_id, quantity, work_order_id, used_by, used_at))
    }

    pub fn low_stock_parts(&self) -> Result<Vec<InventoryPart>, StoreError> {
        let parts = self.store.run(|tx| tx.list_parts())?;
        Ok(parts.into_iter().filter(InventoryPart::is_low_stock).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FailPoint, MemoryStore};

    fn setup(stock: i64) -> (Arc<MemoryStore>, InventoryLedger<MemoryStore>, InventoryPart) {
        let store = Arc::new(MemoryStore::transactional());
        let ledger = InventoryLedger::new(Arc::clone(&store));
        let part = InventoryPart::new("Air filter F7", Decimal::new(stock, 0), Decimal::new(500, 2), Utc::now());
        ledger.add_part(&part).unwrap();
        (store, ledger, part)
    }

    #[test]
    fn test_consume_decrements_exactly_and_snapshots_cost() {
        let (store, ledger, part) = setup(10);
        let wo = Uuid::new_v4();
        let c = ledger
            .consume(part.id, Quantity::parse("4").unwrap(), wo, Uuid::new_v4(), Utc::now())
            .unwrap();

        assert_eq!(c.part.quantity_in_stock.to_string(), "6.00");
        assert_eq!(c.usage.total_cost.to_string(), "20.00");
        let usage = store.run(|tx| tx.usage_for_work_order(wo)).unwrap();
        assert_eq!(usage, vec![c.usage]);
    }

    #[test]
    fn test_consume_over_stock_conflicts_and_writes_nothing() {
        let (store, ledger, part) = setup(10);
        let wo = Uuid::new_v4();
        let err = ledger
            .consume(part.id, Quantity::parse("11").unwrap(), wo, Uuid::new_v4(), Utc::now())
            .unwrap_err();

        match err {
            LedgerError::Conflict(conflict) => {
                assert_eq!(conflict.part_name, "Air filter F7");
                assert_eq!(conflict.available.to_string(), "10.00");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(ledger.part(part.id).unwrap().unwrap().quantity_in_stock.to_string(), "10.00");
        assert!(store.run(|tx| tx.usage_for_work_order(wo)).unwrap().is_empty());
    }

    #[test]
    fn test_failed_usage_insert_returns_stock_without_transactions() {
        let store = Arc::new(MemoryStore::non_transactional());
        let ledger = InventoryLedger::new(Arc::clone(&store));
        let part = InventoryPart::new("Gasket", Decimal::new(5, 0), Decimal::ONE, Utc::now());
        ledger.add_part(&part).unwrap();
        store.fail_next(FailPoint::InsertUsage);

        let err = ledger.consume(part.id, Quantity::parse("2").unwrap(), Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        assert!(matches!(err, Err(LedgerError::Store(StoreError::Injected(_)))));
        assert_eq!(ledger.part(part.id).unwrap().unwrap().quantity_in_stock.to_string(), "5.00");
    }

    #[test]
    fn test_price_change_does_not_touch_recorded_usage() {
        let (store, ledger, part) = setup(10);
        let wo = Uuid::new_v4();
        ledger
            .consume(part.id, Quantity::parse("2").unwrap(), wo, Uuid::new_v4(), Utc::now())
            .unwrap();
        ledger.set_unit_price(part.id, Decimal::new(800, 2)).unwrap();

        let usage = store.run(|tx| tx.usage_for_work_order(wo)).unwrap();
        assert_eq!(usage[0].unit_cost.to_string(), "5.00");
        assert_eq!(usage[0].total_cost.to_string(), "10.00");
    }

    #[test]
    fn test_receive_stock_and_low_stock_listing() {
        let (_store, ledger, part) = setup(1);
        let flagged = InventoryPart::new("Relay", Decimal::ONE, Decimal::ONE, Utc::now())
            .with_min_quantity(Decimal::new(3, 0));
        ledger.add_part(&flagged).unwrap();

        let low: Vec<Uuid> = ledger.low_stock_parts().unwrap().iter().map(|p| p.id).collect();
        assert!(low.contains(&flagged.id));

        let after = ledger.receive_stock(flagged.id, Quantity::parse("5").unwrap()).unwrap();
        assert_eq!(after.quantity_in_stock.to_string(), "6.00");
        assert!(!ledger.low_stock_parts().unwrap().iter().any(|p| p.id == flagged.id));
        assert!(ledger.part(part.id).unwrap().is_some());
    }
}
