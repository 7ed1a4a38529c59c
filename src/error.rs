//! Domain error types.
//!
//! | Error                    | Raised when                                        |
//! |--------------------------|----------------------------------------------------|
//! | [`ValidationError`]      | wizard input is missing or malformed               |
//! | [`StockConflict`]        | a consumption exceeds the part's current stock     |
//! | [`LifecycleCommitError`] | the completion unit of work fails                  |
//! | [`ReconciliationError`]  | work-order deletion cannot restore stock           |
//! | [`NotificationError`]    | an outbound message cannot be queued or delivered  |
//!
//! Storage-level failures are [`StoreError`](crate::executor::StoreError).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::executor::StoreError;
use crate::model::WorkOrderStatus;

/// Local input problems. These block a wizard transition and never reach
/// the lifecycle coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("a value is required")]
    Missing,
    #[error("'{0}' is not a valid number")]
    NotNumeric(String),
    #[error("quantity must be at least 0.01")]
    NonPositive,
    #[error("value must not be negative")]
    Negative,
    #[error("{remaining} checklist item(s) are not checked")]
    ChecklistIncomplete { remaining: usize },
    #[error("unknown checklist item '{0}'")]
    UnknownChecklistItem(String),
    #[error("there is no step before the overview")]
    AtFirstStep,
    #[error("the summary is the last step; finalize instead")]
    AtLastStep,
    #[error("only available on the summary step")]
    NotOnSummary,
    #[error("the completion has already been submitted")]
    AlreadySubmitted,
    #[error("the completion wizard was cancelled")]
    Cancelled,
    #[error("title must not be empty")]
    EmptyTitle,
    #[error("a work order targets exactly one equipment item or one location")]
    AmbiguousTarget,
}

/// Requested quantity exceeds the stock on hand at commit time.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("not enough stock for {part_name}: requested {requested}, available {available}")]
pub struct StockConflict {
    pub part_id: Uuid,
    pub part_name: String,
    pub requested: Decimal,
    pub available: Decimal,
}

/// Failure of an inventory ledger operation.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Conflict(#[from] StockConflict),
    #[error("inventory part {0} not found")]
    PartNotFound(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The completion unit of work (record, schedule advance, work order, link)
/// did not commit. Retrying with the same idempotency key is safe.
#[derive(Debug, Error)]
pub enum LifecycleCommitError {
    #[error("maintenance schedule {0} no longer exists")]
    ScheduleNotFound(Uuid),
    #[error("maintenance schedule {0} is not active")]
    ScheduleInactive(Uuid),
    #[error("idempotency key {key} was used for schedule {recorded_for}, not {requested_for}")]
    KeyReused {
        key: Uuid,
        recorded_for: Uuid,
        requested_for: Uuid,
    },
    #[error("completion commit failed: {0}")]
    Store(#[from] StoreError),
}

/// Work-order deletion could not reconcile stock; nothing was deleted.
#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error("work order {0} not found")]
    WorkOrderNotFound(Uuid),
    #[error("part {part_id} referenced by usage record {usage_id} no longer exists")]
    PartMissing { usage_id: Uuid, part_id: Uuid },
    #[error("store cannot delete work orders atomically (no multi-record transactions)")]
    TransactionsUnavailable,
    #[error("deletion aborted: {0}")]
    Store(#[from] StoreError),
}

impl From<LedgerError> for ReconciliationError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Store(e) => ReconciliationError::Store(e),
            // Restoration is pure addition; anything else is a storage inconsistency.
            other => ReconciliationError::Store(StoreError::Other(other.to_string())),
        }
    }
}

/// Outbound notification failure. Logged only, never surfaced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    #[error("notification queue is full")]
    QueueFull,
    #[error("notification worker has stopped")]
    Disconnected,
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Work-order service failures.
#[derive(Debug, Error)]
pub enum WorkOrderError {
    #[error("work order {0} not found")]
    NotFound(Uuid),
    #[error("cannot move a work order from {from} to {to}")]
    InvalidTransition {
        from: WorkOrderStatus,
        to: WorkOrderStatus,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_conflict_names_part_and_available_amount() {
        let conflict = StockConflict {
            part_id: Uuid::nil(),
            part_name: "V-belt A42".to_string(),
            requested: Decimal::new(1100, 2),
            available: Decimal::new(1000, 2),
        };
        let msg = conflict.to_string();
        assert!(msg.contains("V-belt A42"));
        assert!(msg.contains("10.00"));
    }

    #[test]
    fn test_ledger_error_maps_into_reconciliation_store_error() {
        let err: ReconciliationError = LedgerError::PartNotFound(Uuid::nil()).into();
        assert!(matches!(err, ReconciliationError::Store(_)));
    }
}
