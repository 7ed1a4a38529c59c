//! Work-order service: creation, assignment, status changes, comments and
//! attachments. Assignees hear about changes through the notification queue.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{ValidationError, WorkOrderError};
use crate::identity::Actor;
use crate::model::{
    MaintenanceSchedule, Priority, WorkOrder, WorkOrderAttachment, WorkOrderComment,
    WorkOrderStatus, WorkOrderType, WorkTarget,
};
use crate::notify::Notifier;
use crate::store::Store;

/// Input for a new corrective work order, as entered in a form.
#[derive(Debug, Clone, Default)]
pub struct NewWorkOrder {
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub equipment_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub due_date: Option<NaiveDate>,
    pub estimated_hours: Option<Decimal>,
    pub labor_cost: Option<Decimal>,
}

impl NewWorkOrder {
    fn validate(&self) -> Result<WorkTarget, ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if self.labor_cost.is_some_and(|c| c.is_sign_negative()) {
            return Err(ValidationError::Negative);
        }
        WorkTarget::from_columns(self.equipment_id, self.location_id)
            .ok_or(ValidationError::AmbiguousTarget)
    }
}

pub struct WorkOrderService<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    notifier: Notifier,
}

impl<S: Store> WorkOrderService<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, notifier: Notifier) -> Self {
        Self {
            store,
            clock,
            notifier,
        }
    }

    pub fn create_corrective(&self, input: NewWorkOrder, actor: &Actor) -> Result<WorkOrder, WorkOrderError> {
        let target = input.validate()?;
        let now = self.clock.now();
        let work_order = WorkOrder {
            id: Uuid::new_v4(),
            title: input.title.trim().to_string(),
            description: input.description,
            work_type: WorkOrderType::Corrective,
            status: WorkOrderStatus::Open,
            priority: input.priority,
            target,
            assigned_to: input.assigned_to,
            created_by: actor.id,
            schedule_id: None,
            completion_id: None,
            due_date: input.due_date,
            completed_date: None,
            estimated_hours: input.estimated_hours,
            actual_hours: None,
            labor_cost: input.labor_cost.map(crate::model::quantity::canonical).unwrap_or(Decimal::ZERO),
            parts_cost: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };
        self.store.run(|tx| tx.insert_work_order(&work_order))?;
        log::info!("work order {} created by {}", work_order.id, actor.name);
        self.notify_assignee(&work_order, actor, "New work order assigned");
        Ok(work_order)
    }

    pub fn get(&self, id: Uuid) -> Result<WorkOrder, WorkOrderError> {
        self.store
            .run(|tx| tx.find_work_order(id))?
            .ok_or(WorkOrderError::NotFound(id))
    }

    /// Hand the order to `assignee`, or unassign it with `None`.
    pub fn assign(&self, id: Uuid, assignee: Option<Uuid>, actor: &Actor) -> Result<WorkOrder, WorkOrderError> {
        let now = self.clock.now();
        let work_order = self.store.run(|tx| {
            let mut work_order = tx.find_work_order(id)?.ok_or(WorkOrderError::NotFound(id))?;
            work_order.assigned_to = assignee;
            work_order.updated_at = now;
            tx.update_work_order(&work_order)?;
            Ok::<_, WorkOrderError>(work_order)
        })?;
        self.notify_assignee(&work_order, actor, "Work order assigned to you");
        Ok(work_order)
    }

    pub fn change_status(
        &self,
        id: Uuid,
        next: WorkOrderStatus,
        actor: &Actor,
    ) -> Result<WorkOrder, WorkOrderError> {
        let now = self.clock.now();
        let work_order = self.store.run(|tx| {
            let mut work_order = tx.find_work_order(id)?.ok_or(WorkOrderError::NotFound(id))?;
            let from = work_order.status;
            if !work_order.transition(next, now) {
                return Err(WorkOrderError::InvalidTransition { from, to: next });
            }
            tx.update_work_order(&work_order)?;
            Ok::<_, WorkOrderError>(work_order)
        })?;
        log::info!("work order {id} is now {next}");
        self.notify_assignee(&work_order, actor, &format!("Work order {next}"));
        Ok(work_order)
    }

    pub fn add_comment(&self, id: Uuid, body: &str, actor: &Actor) -> Result<WorkOrderComment, WorkOrderError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ValidationError::Missing.into());
        }
        let comment = WorkOrderComment {
            id: Uuid::new_v4(),
            work_order_id: id,
            author_id: actor.id,
            body: body.to_string(),
            created_at: self.clock.now(),
        };
        self.store.run(|tx| {
            tx.find_work_order(id)?.ok_or(WorkOrderError::NotFound(id))?;
            tx.insert_comment(&comment)?;
            Ok::<_, WorkOrderError>(())
        })?;
        Ok(comment)
    }

    pub fn comments(&self, id: Uuid) -> Result<Vec<WorkOrderComment>, WorkOrderError> {
        Ok(self.store.run(|tx| tx.comments_for_work_order(id))?)
    }

    /// Record attachment metadata; the file itself is already in external storage.
    pub fn add_attachment(
        &self,
        id: Uuid,
        file_name: &str,
        storage_ref: &str,
        actor: &Actor,
    ) -> Result<WorkOrderAttachment, WorkOrderError> {
        if file_name.trim().is_empty() || storage_ref.trim().is_empty() {
            return Err(ValidationError::Missing.into());
        }
        let attachment = WorkOrderAttachment {
            id: Uuid::new_v4(),
            work_order_id: id,
            file_name: file_name.trim().to_string(),
            storage_ref: storage_ref.to_string(),
            uploaded_by: actor.id,
            created_at: self.clock.now(),
        };
        self.store.run(|tx| {
            tx.find_work_order(id)?.ok_or(WorkOrderError::NotFound(id))?;
            tx.insert_attachment(&attachment)?;
            Ok::<_, WorkOrderError>(())
        })?;
        Ok(attachment)
    }

    pub fn attachments(&self, id: Uuid) -> Result<Vec<WorkOrderAttachment>, WorkOrderError> {
        Ok(self.store.run(|tx| tx.attachments_for_work_order(id))?)
    }

    /// Active schedules past their due date as of the clock's today.
    pub fn overdue_schedules(&self) -> Result<Vec<MaintenanceSchedule>, WorkOrderError> {
        let today = self.clock.today();
        Ok(self.store.run(|tx| tx.overdue_schedules(today))?)
    }

    fn notify_assignee(&self, work_order: &WorkOrder, actor: &Actor, headline: &str) {
        match work_order.assigned_to {
            // Actors are not notified of their own changes.
            Some(assignee) if assignee != actor.id => {
                self.notifier.work_order_event(work_order, assignee, headline)
            }
            _ => {}
        }
    }
}
