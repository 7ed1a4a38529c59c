//! In-process store.
//!
//! Tables sit behind one `may` mutex, so a contending coroutine parks
//! instead of blocking its worker thread. In transactional mode a unit of work runs on
//! a private copy taken under the lock and swapped back on success, so units
//! are serialized and all-or-nothing. In non-transactional mode each
//! operation takes the lock on its own and its write is visible at once.
//!
//! [`MemoryStore::fail_next`] arms a one-shot fault on a named operation.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use may::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{StockUpdate, Store, StoreCapabilities, StoreTx};
use crate::executor::StoreError;
use crate::model::quantity::canonical;
use crate::model::{
    InventoryPart, MaintenanceSchedule, PartsUsageRecord, ScheduleCompletion, WorkOrder,
    WorkOrderAttachment, WorkOrderComment,
};

/// Operations that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertCompletion,
    UpdateCompletion,
    AdvanceSchedule,
    InsertWorkOrder,
    UpdateWorkOrder,
    DeleteWorkOrder,
    DecrementStock,
    IncrementStock,
    InsertUsage,
    DeleteUsage,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    schedules: HashMap<Uuid, MaintenanceSchedule>,
    completions: HashMap<Uuid, ScheduleCompletion>,
    work_orders: HashMap<Uuid, WorkOrder>,
    comments: HashMap<Uuid, WorkOrderComment>,
    attachments: HashMap<Uuid, WorkOrderAttachment>,
    parts: HashMap<Uuid, InventoryPart>,
    usage: HashMap<Uuid, PartsUsageRecord>,
}

#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    faults: Mutex<Vec<FailPoint>>,
    transactional: bool,
}

impl MemoryStore {
    /// Store whose units of work are atomic.
    pub fn transactional() -> Self {
        Self::with_mode(true)
    }

    /// Store that applies every write immediately.
    pub fn non_transactional() -> Self {
        Self::with_mode(false)
    }

    fn with_mode(transactional: bool) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            faults: Mutex::new(Vec::new()),
            transactional,
        }
    }

    /// Make the next call of `point` fail with [`StoreError::Injected`].
    pub fn fail_next(&self, point: FailPoint) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push(point);
        }
    }

    fn lock_tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Other("memory store lock poisoned".to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::transactional()
    }
}

impl Store for MemoryStore {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            multi_record_transactions: self.transactional,
        }
    }

    fn run<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        if !self.transactional {
            let mut tx = MemoryTx {
                tables: Access::Live(&self.tables),
                faults: &self.faults,
            };
            return f(&mut tx);
        }

        let mut guard = self.lock_tables()?;
        let mut working = guard.clone();
        let result = {
            let mut tx = MemoryTx {
                tables: Access::Private(&mut working),
                faults: &self.faults,
            };
            f(&mut tx)
        };
        if result.is_ok() {
            *guard = working;
        }
        result
    }
}

enum Access<'a> {
    Private(&'a mut Tables),
    Live(&'a Mutex<Tables>),
}

struct MemoryTx<'a> {
    tables: Access<'a>,
    faults: &'a Mutex<Vec<FailPoint>>,
}

impl MemoryTx<'_> {
    fn with<R>(&mut self, f: impl FnOnce(&mut Tables) -> R) -> Result<R, StoreError> {
        match &mut self.tables {
            Access::Private(tables) => Ok(f(tables)),
            Access::Live(mutex) => {
                let mut guard = mutex
                    .lock()
                    .map_err(|_| StoreError::Other("memory store lock poisoned".to_string()))?;
                Ok(f(&mut guard))
            }
        }
    }

    fn check(&self, point: FailPoint) -> Result<(), StoreError> {
        let mut faults = self
            .faults
            .lock()
            .map_err(|_| StoreError::Other("fault list poisoned".to_string()))?;
        if let Some(pos) = faults.iter().position(|p| *p == point) {
            faults.remove(pos);
            return Err(StoreError::Injected(format!("{point:?}")));
        }
        Ok(())
    }
}

fn duplicate(table: &str, id: Uuid) -> StoreError {
    StoreError::QueryError(format!("duplicate key {id} in {table}"))
}

fn sorted_by<T, K: Ord>(mut rows: Vec<T>, key: impl FnMut(&T) -> K) -> Vec<T> {
    rows.sort_by_key(key);
    rows
}

impl StoreTx for MemoryTx<'_> {
    fn insert_schedule(&mut self, schedule: &MaintenanceSchedule) -> Result<(), StoreError> {
        self.with(|t| {
            t.schedules.insert(schedule.id, schedule.clone());
        })
    }

    fn find_schedule(&mut self, id: Uuid) -> Result<Option<MaintenanceSchedule>, StoreError> {
        self.with(|t| t.schedules.get(&id).cloned())
    }

    fn lock_schedule(&mut self, id: Uuid) -> Result<Option<MaintenanceSchedule>, StoreError> {
        // Transactional units already hold the table lock.
        self.find_schedule(id)
    }

    fn update_schedule(&mut self, schedule: &MaintenanceSchedule) -> Result<(), StoreError> {
        self.with(|t| match t.schedules.get_mut(&schedule.id) {
            Some(row) => {
                *row = schedule.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "maintenance schedule",
                id: schedule.id,
            }),
        })?
    }

    fn advance_schedule(
        &mut self,
        schedule: &MaintenanceSchedule,
        expected_times_completed: u32,
    ) -> Result<bool, StoreError> {
        self.check(FailPoint::AdvanceSchedule)?;
        self.with(|t| match t.schedules.get_mut(&schedule.id) {
            Some(row) if row.times_completed == expected_times_completed => {
                *row = schedule.clone();
                true
            }
            _ => false,
        })
    }

    fn delete_schedule(&mut self, id: Uuid) -> Result<bool, StoreError> {
        self.with(|t| t.schedules.remove(&id).is_some())
    }

    fn overdue_schedules(&mut self, today: NaiveDate) -> Result<Vec<MaintenanceSchedule>, StoreError> {
        let rows = self.with(|t| {
            t.schedules
                .values()
                .filter(|s| s.is_overdue(today))
                .cloned()
                .collect::<Vec<_>>()
        })?;
        Ok(sorted_by(rows, |s| (s.next_due_date, s.id)))
    }

    fn insert_completion(&mut self, completion: &ScheduleCompletion) -> Result<bool, StoreError> {
        self.check(FailPoint::InsertCompletion)?;
        self.with(|t| {
            if t
                .completions
                .values()
                .any(|c| c.idempotency_key == completion.idempotency_key)
            {
                return false;
            }
            t.completions.insert(completion.id, completion.clone());
            true
        })
    }

    fn find_completion_by_key(&mut self, key: Uuid) -> Result<Option<ScheduleCompletion>, StoreError> {
        self.with(|t| {
            t.completions
                .values()
                .find(|c| c.idempotency_key == key)
                .cloned()
        })
    }

    fn update_completion(&mut self, completion: &ScheduleCompletion) -> Result<(), StoreError> {
        self.check(FailPoint::UpdateCompletion)?;
        self.with(|t| match t.completions.get_mut(&completion.id) {
            Some(row) => {
                *row = completion.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "schedule completion",
                id: completion.id,
            }),
        })?
    }

    fn completions_for_schedule(
        &mut self,
        schedule_id: Uuid,
    ) -> Result<Vec<ScheduleCompletion>, StoreError> {
        let rows = self.with(|t| {
            t.completions
                .values()
                .filter(|c| c.schedule_id == schedule_id)
                .cloned()
                .collect::<Vec<_>>()
        })?;
        Ok(sorted_by(rows, |c| c.completed_at))
    }

    fn insert_work_order(&mut self, work_order: &WorkOrder) -> Result<(), StoreError> {
        self.check(FailPoint::InsertWorkOrder)?;
        self.with(|t| {
            if t.work_orders.contains_key(&work_order.id) {
                return Err(duplicate("work_orders", work_order.id));
            }
            t.work_orders.insert(work_order.id, work_order.clone());
            Ok(())
        })?
    }

    fn find_work_order(&mut self, id: Uuid) -> Result<Option<WorkOrder>, StoreError> {
        self.with(|t| t.work_orders.get(&id).cloned())
    }

    fn find_work_order_by_completion(
        &mut self,
        completion_id: Uuid,
    ) -> Result<Option<WorkOrder>, StoreError> {
        self.with(|t| {
            t.work_orders
                .values()
                .find(|w| w.completion_id == Some(completion_id))
                .cloned()
        })
    }

    fn update_work_order(&mut self, work_order: &WorkOrder) -> Result<(), StoreError> {
        self.check(FailPoint::UpdateWorkOrder)?;
        self.with(|t| match t.work_orders.get_mut(&work_order.id) {
            Some(row) => {
                *row = work_order.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "work order",
                id: work_order.id,
            }),
        })?
    }

    fn delete_work_order(&mut self, id: Uuid) -> Result<bool, StoreError> {
        self.check(FailPoint::DeleteWorkOrder)?;
        self.with(|t| {
            if t.work_orders.remove(&id).is_none() {
                return false;
            }
            t.comments.retain(|_, c| c.work_order_id != id);
            t.attachments.retain(|_, a| a.work_order_id != id);
            for completion in t.completions.values_mut() {
                if completion.work_order_id == Some(id) {
                    completion.work_order_id = None;
                }
            }
            true
        })
    }

    fn insert_comment(&mut self, comment: &WorkOrderComment) -> Result<(), StoreError> {
        self.with(|t| {
            t.comments.insert(comment.id, comment.clone());
        })
    }

    fn comments_for_work_order(
        &mut self,
        work_order_id: Uuid,
    ) -> Result<Vec<WorkOrderComment>, StoreError> {
        let rows = self.with(|t| {
            t.comments
                .values()
                .filter(|c| c.work_order_id == work_order_id)
                .cloned()
                .collect::<Vec<_>>()
        })?;
        Ok(sorted_by(rows, |c| c.created_at))
    }

    fn insert_attachment(&mut self, attachment: &WorkOrderAttachment) -> Result<(), StoreError> {
        self.with(|t| {
            t.attachments.insert(attachment.id, attachment.clone());
        })
    }

    fn attachments_for_work_order(
        &mut self,
        work_order_id: Uuid,
    ) -> Result<Vec<WorkOrderAttachment>, StoreError> {
        let rows = self.with(|t| {
            t.attachments
                .values()
                .filter(|a| a.work_order_id == work_order_id)
                .cloned()
                .collect::<Vec<_>>()
        })?;
        Ok(sorted_by(rows, |a| a.created_at))
    }

    fn insert_part(&mut self, part: &InventoryPart) -> Result<(), StoreError> {
        self.with(|t| {
            t.parts.insert(part.id, part.clone());
        })
    }

    fn find_part(&mut self, id: Uuid) -> Result<Option<InventoryPart>, StoreError> {
        self.with(|t| t.parts.get(&id).cloned())
    }

    fn list_parts(&mut self) -> Result<Vec<InventoryPart>, StoreError> {
        let rows = self.with(|t| t.parts.values().cloned().collect::<Vec<_>>())?;
        Ok(sorted_by(rows, |p| (p.name.clone(), p.id)))
    }

    fn set_unit_price(&mut self, part_id: Uuid, unit_price: Decimal) -> Result<bool, StoreError> {
        self.with(|t| match t.parts.get_mut(&part_id) {
            Some(part) => {
                part.unit_price = canonical(unit_price);
                true
            }
            None => false,
        })
    }

    fn try_decrement_stock(
        &mut self,
        part_id: Uuid,
        quantity: Decimal,
    ) -> Result<StockUpdate, StoreError> {
        self.check(FailPoint::DecrementStock)?;
        self.with(|t| match t.parts.get_mut(&part_id) {
            None => StockUpdate::Missing,
            Some(part) if part.quantity_in_stock >= quantity => {
                part.quantity_in_stock = canonical(part.quantity_in_stock - quantity);
                StockUpdate::Applied(part.clone())
            }
            Some(part) => StockUpdate::Insufficient {
                name: part.name.clone(),
                available: part.quantity_in_stock,
            },
        })
    }

    fn increment_stock(
        &mut self,
        part_id: Uuid,
        quantity: Decimal,
    ) -> Result<Option<InventoryPart>, StoreError> {
        self.check(FailPoint::IncrementStock)?;
        self.with(|t| {
            t.parts.get_mut(&part_id).map(|part| {
                part.quantity_in_stock = canonical(part.quantity_in_stock + quantity);
                part.clone()
            })
        })
    }

    fn insert_usage(&mut self, usage: &PartsUsageRecord) -> Result<(), StoreError> {
        self.check(FailPoint::InsertUsage)?;
        self.with(|t| {
            if t.usage.contains_key(&usage.id) {
                return Err(duplicate("parts_usage", usage.id));
            }
            t.usage.insert(usage.id, usage.clone());
            Ok(())
        })?
    }

    fn usage_for_work_order(
        &mut self,
        work_order_id: Uuid,
    ) -> Result<Vec<PartsUsageRecord>, StoreError> {
        let rows = self.with(|t| {
            t.usage
                .values()
                .filter(|u| u.work_order_id == work_order_id)
                .cloned()
                .collect::<Vec<_>>()
        })?;
        Ok(sorted_by(rows, |u| (u.used_at, u.id)))
    }

    fn delete_usage(&mut self, id: Uuid) -> Result<bool, StoreError> {
        self.check(FailPoint::DeleteUsage)?;
        self.with(|t| t.usage.remove(&id).is_some())
    }
}
