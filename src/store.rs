//! Persistence boundary.
//!
//! Services never touch tables directly. They hand a closure to
//! [`Store::run`], which executes it as one unit of work against a
//! [`StoreTx`]. Whether that unit is atomic depends on the backend and is
//! reported by [`Store::capabilities`]:
//!
//! - [`PgStore`] runs every unit inside a database transaction.
//! - [`MemoryStore`] can do either; its non-transactional mode applies each
//!   write as soon as it is made, like a document store without
//!   multi-record transactions.
//!
//! Every operation on [`StoreTx`] is individually atomic. In particular
//! [`StoreTx::try_decrement_stock`] is a single conditional write, never a
//! read followed by a write.

pub mod memory;
pub mod postgres;

pub use memory::{FailPoint, MemoryStore};
pub use postgres::PgStore;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::executor::StoreError;
use crate::model::{
    InventoryPart, MaintenanceSchedule, PartsUsageRecord, ScheduleCompletion, WorkOrder,
    WorkOrderAttachment, WorkOrderComment,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCapabilities {
    /// All writes of one [`Store::run`] commit or roll back together.
    pub multi_record_transactions: bool,
}

/// Result of a conditional stock decrement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockUpdate {
    /// Stock was decremented; the part as it is now.
    Applied(InventoryPart),
    /// Stock is below the requested amount and was left unchanged.
    Insufficient { name: String, available: Decimal },
    Missing,
}

/// Operations available inside one unit of work.
pub trait StoreTx {
    fn insert_schedule(&mut self, schedule: &MaintenanceSchedule) -> Result<(), StoreError>;
    fn find_schedule(&mut self, id: Uuid) -> Result<Option<MaintenanceSchedule>, StoreError>;
    /// Read a schedule and hold it against concurrent completion for the
    /// rest of the unit of work, where the backend can.
    fn lock_schedule(&mut self, id: Uuid) -> Result<Option<MaintenanceSchedule>, StoreError>;
    fn update_schedule(&mut self, schedule: &MaintenanceSchedule) -> Result<(), StoreError>;
    /// Write an advanced schedule only if nobody else advanced it first.
    ///
    /// Returns `false` when the stored `times_completed` no longer equals
    /// `expected_times_completed`.
    fn advance_schedule(
        &mut self,
        schedule: &MaintenanceSchedule,
        expected_times_completed: u32,
    ) -> Result<bool, StoreError>;
    fn delete_schedule(&mut self, id: Uuid) -> Result<bool, StoreError>;
    /// Active schedules whose due date is before `today`, oldest first.
    fn overdue_schedules(&mut self, today: NaiveDate) -> Result<Vec<MaintenanceSchedule>, StoreError>;

    /// Returns `false` if a completion with the same idempotency key exists.
    fn insert_completion(&mut self, completion: &ScheduleCompletion) -> Result<bool, StoreError>;
    fn find_completion_by_key(&mut self, key: Uuid) -> Result<Option<ScheduleCompletion>, StoreError>;
    fn update_completion(&mut self, completion: &ScheduleCompletion) -> Result<(), StoreError>;
    fn completions_for_schedule(
        &mut self,
        schedule_id: Uuid,
    ) -> Result<Vec<ScheduleCompletion>, StoreError>;

    fn insert_work_order(&mut self, work_order: &WorkOrder) -> Result<(), StoreError>;
    fn find_work_order(&mut self, id: Uuid) -> Result<Option<WorkOrder>, StoreError>;
    fn find_work_order_by_completion(
        &mut self,
        completion_id: Uuid,
    ) -> Result<Option<WorkOrder>, StoreError>;
    fn update_work_order(&mut self, work_order: &WorkOrder) -> Result<(), StoreError>;
    /// Delete a work order with its comments and attachments, and clear any
    /// completion link to it. Usage records must already be gone.
    fn delete_work_order(&mut self, id: Uuid) -> Result<bool, StoreError>;

    fn insert_comment(&mut self, comment: &WorkOrderComment) -> Result<(), StoreError>;
    fn comments_for_work_order(&mut self, work_order_id: Uuid)
        -> Result<Vec<WorkOrderComment>, StoreError>;
    fn insert_attachment(&mut self, attachment: &WorkOrderAttachment) -> Result<(), StoreError>;
    fn attachments_for_work_order(
        &mut self,
        work_order_id: Uuid,
    ) -> Result<Vec<WorkOrderAttachment>, StoreError>;

    fn insert_part(&mut self, part: &InventoryPart) -> Result<(), StoreError>;
    fn find_part(&mut self, id: Uuid) -> Result<Option<InventoryPart>, StoreError>;
    fn list_parts(&mut self) -> Result<Vec<InventoryPart>, StoreError>;
    fn set_unit_price(&mut self, part_id: Uuid, unit_price: Decimal) -> Result<bool, StoreError>;
    /// `quantity_in_stock -= quantity` where `quantity_in_stock >= quantity`.
    fn try_decrement_stock(&mut self, part_id: Uuid, quantity: Decimal)
        -> Result<StockUpdate, StoreError>;
    /// Unconditional `quantity_in_stock += quantity`; `None` if the part is gone.
    fn increment_stock(
        &mut self,
        part_id: Uuid,
        quantity: Decimal,
    ) -> Result<Option<InventoryPart>, StoreError>;

    fn insert_usage(&mut self, usage: &PartsUsageRecord) -> Result<(), StoreError>;
    fn usage_for_work_order(&mut self, work_order_id: Uuid)
        -> Result<Vec<PartsUsageRecord>, StoreError>;
    fn delete_usage(&mut self, id: Uuid) -> Result<bool, StoreError>;
}

pub trait Store: Send + Sync {
    fn capabilities(&self) -> StoreCapabilities;

    /// Run `f` as one unit of work.
    ///
    /// On a transactional backend an `Err` from `f` discards every write it
    /// made. Otherwise writes already made stay.
    fn run<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, E>,
        E: From<StoreError>;
}
