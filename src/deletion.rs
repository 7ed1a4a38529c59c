//! Work-order deletion with stock restoration.
//!
//! Deleting a work order returns every part it consumed to inventory. The
//! restorations, the removal of the usage records, and the removal of the
//! order itself are one unit of work: either the stock is back and the
//! order is gone, or nothing changed.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{LedgerError, ReconciliationError};
use crate::executor::StoreError;
use crate::ledger::restore_in;
use crate::model::{InventoryPart, PartsUsageRecord};
use crate::notify::Notifier;
use crate::store::{Store, StoreTx};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// What a successful deletion put back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub work_order_id: Uuid,
    pub restored: Vec<PartsUsageRecord>,
}

pub struct DeletionReconciler<S> {
    store: Arc<S>,
    notifier: Notifier,
}

impl<S: Store> DeletionReconciler<S> {
    pub fn new(store: Arc<S>, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    /// Delete `work_order_id`, restoring the stock of each usage record.
    ///
    /// # Errors
    ///
    /// `TransactionsUnavailable` on a store that cannot make the steps
    /// atomic; nothing is touched in that case. Any failure after that
    /// leaves stock, usage records and the work order as they were.
    pub fn delete(&self, work_order_id: Uuid) -> Result<DeletionReport, ReconciliationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::delete_work_order_span(work_order_id).entered();

        if !self.store.capabilities().multi_record_transactions {
            log::warn!("refusing to delete work order {work_order_id}: store is not transactional");
            return Err(ReconciliationError::TransactionsUnavailable);
        }

        let (report, restored_parts) = self
            .store
            .run(|tx| delete_in(tx, work_order_id))
            .inspect_err(|e| log::warn!("deletion of work order {work_order_id} rolled back: {e}"))?;

        #[cfg(feature = "metrics")]
        METRICS.record_stock_restorations(report.restored.len());
        for part in &restored_parts {
            // Restoration may lift a part out of low stock; only alert if it is still low.
            self.notifier.low_stock(part);
        }
        log::info!(
            "deleted work order {work_order_id}, restored {} usage record(s)",
            report.restored.len()
        );
        Ok(report)
    }
}

fn delete_in(
    tx: &mut dyn StoreTx,
    work_order_id: Uuid,
) -> Result<(DeletionReport, Vec<InventoryPart>), ReconciliationError> {
    if tx.find_work_order(work_order_id)?.is_none() {
        return Err(ReconciliationError::WorkOrderNotFound(work_order_id));
    }

    let usage = tx.usage_for_work_order(work_order_id)?;
    let mut parts = Vec::with_capacity(usage.len());
    for record in &usage {
        match restore_in(tx, record) {
            Ok(part) => parts.push(part),
            Err(LedgerError::PartNotFound(part_id)) => {
                return Err(ReconciliationError::PartMissing {
                    usage_id: record.id,
                    part_id,
                })
            }
            Err(e) => return Err(e.into()),
        }
        if !tx.delete_usage(record.id)? {
            return Err(StoreError::NotFound {
                entity: "parts usage record",
                id: record.id,
            }
            .into());
        }
        log::debug!(
            "returned {} of part {} from work order {work_order_id}",
            record.quantity_used,
            record.part_id
        );
    }

    if !tx.delete_work_order(work_order_id)? {
        return Err(ReconciliationError::WorkOrderNotFound(work_order_id));
    }
    Ok((
        DeletionReport {
            work_order_id,
            restored: usage,
        },
        parts,
    ))
}
