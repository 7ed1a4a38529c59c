//! Domain records: schedules, completions, work orders, parts and templates.
//!
//! These are plain data types with the invariants that can be checked
//! locally (status transitions, stock thresholds, cost snapshots). Anything
//! that spans records lives in the services built on [`crate::store`].

pub mod completion;
pub mod inventory;
pub mod quantity;
pub mod schedule;
pub mod template;
pub mod work_order;

pub use completion::{ChecklistResult, CommitStage, PartsRejections, ScheduleCompletion};
pub use inventory::{compatible_parts, InventoryPart, PartsUsageRecord};
pub use quantity::{normalize_decimal, Quantity};
pub use schedule::{MaintenanceSchedule, ScheduleAdvance};
pub use template::{
    ChecklistItem, ChecklistTemplate, InMemoryTemplateStore, ProcedureStep, ProcedureTemplate,
    Template, TemplateStore,
};
pub use work_order::{
    Priority, WorkOrder, WorkOrderAttachment, WorkOrderComment, WorkOrderStatus, WorkOrderType,
    WorkTarget,
};
