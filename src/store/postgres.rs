//! PostgreSQL store over `may_postgres`.
//!
//! Each [`Store::run`] call borrows one connection, opens a transaction,
//! and commits it if the closure succeeds. Connections are picked round
//! robin and held for the duration of the unit of work.

use chrono::{DateTime, NaiveDate, Utc};
use may_postgres::types::{Json, ToSql};
use may_postgres::Row;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use super::{StockUpdate, Store, StoreCapabilities, StoreTx};
use crate::config::DatabaseConfig;
use crate::connection::{connect, ConnectionError};
use crate::executor::{Executor, PgExecutor, StoreError};
use crate::model::{
    ChecklistResult, CommitStage, InventoryPart, MaintenanceSchedule, PartsRejections,
    PartsUsageRecord, Quantity, ScheduleCompletion, WorkOrder, WorkOrderAttachment,
    WorkOrderComment, WorkTarget,
};
use crate::recurrence::Frequency;
use crate::transaction::{IsolationLevel, Transaction};

pub struct PgStore {
    connections: Vec<may::sync::Mutex<PgExecutor>>,
    next: AtomicUsize,
    statement_timeout_seconds: u64,
}

impl PgStore {
    /// Open `config.max_connections` connections to `config.url`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError` if the URL is invalid or any connection fails.
    pub fn connect(config: &DatabaseConfig) -> Result<Self, ConnectionError> {
        let count = config.max_connections.max(1) as usize;
        let mut connections = Vec::with_capacity(count);
        for _ in 0..count {
            connections.push(may::sync::Mutex::new(PgExecutor::new(connect(&config.url)?)));
        }
        log::info!("postgres store ready with {count} connection(s)");
        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
            statement_timeout_seconds: config.statement_timeout_seconds,
        })
    }

    /// Single-connection store over an existing executor.
    pub fn from_executor(executor: PgExecutor) -> Self {
        Self {
            connections: vec![may::sync::Mutex::new(executor)],
            next: AtomicUsize::new(0),
            statement_timeout_seconds: 0,
        }
    }
}

impl Store for PgStore {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            multi_record_transactions: true,
        }
    }

    fn run<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let slot = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        let executor = self.connections[slot]
            .lock()
            .map_err(|_| StoreError::Other("connection slot poisoned".to_string()))?;

        let transaction = executor
            .begin(IsolationLevel::ReadCommitted, self.statement_timeout_seconds)
            .map_err(StoreError::from)?;

        let result = {
            let mut tx = PgTx { tx: &transaction };
            f(&mut tx)
        };
        match result {
            Ok(value) => {
                transaction.commit().map_err(StoreError::from)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = transaction.rollback() {
                    log::warn!("rollback after failed unit of work also failed: {rollback}");
                }
                Err(e)
            }
        }
    }
}

struct PgTx<'a> {
    tx: &'a Transaction,
}

fn parse_err(column: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::ParseError(format!("{column}: {e}"))
}

fn get<'r, T: may_postgres::types::FromSql<'r>>(row: &'r Row, column: &str) -> Result<T, StoreError> {
    row.try_get(column).map_err(|e| parse_err(column, e))
}

fn get_enum<T: FromStr>(row: &Row, column: &str) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    let text: String = get(row, column)?;
    text.parse().map_err(|e| parse_err(column, e))
}

fn get_count(row: &Row, column: &str) -> Result<u32, StoreError> {
    let n: i32 = get(row, column)?;
    u32::try_from(n).map_err(|e| parse_err(column, e))
}

fn count_param(n: u32) -> Result<i32, StoreError> {
    i32::try_from(n).map_err(|e| StoreError::Other(format!("count out of range: {e}")))
}

const SCHEDULE_COLUMNS: &str = "id, equipment_id, title, description, frequency, next_due_date, \
     last_completed_date, last_completion_id, times_completed, repeat_count, auto_pause_when_done, \
     is_active, priority, assigned_to, procedure_template_id, checklist_template_id, \
     estimated_hours, created_by, created_at, updated_at";

fn schedule_from_row(row: &Row) -> Result<MaintenanceSchedule, StoreError> {
    let frequency: Option<String> = get(row, "frequency")?;
    let repeat_count: Option<i32> = get(row, "repeat_count")?;
    Ok(MaintenanceSchedule {
        id: get(row, "id")?,
        equipment_id: get(row, "equipment_id")?,
        title: get(row, "title")?,
        description: get(row, "description")?,
        frequency: Frequency::from_name_or_default(frequency.as_deref()),
        next_due_date: get(row, "next_due_date")?,
        last_completed_date: get(row, "last_completed_date")?,
        last_completion_id: get(row, "last_completion_id")?,
        times_completed: get_count(row, "times_completed")?,
        repeat_count: repeat_count
            .map(u32::try_from)
            .transpose()
            .map_err(|e| parse_err("repeat_count", e))?,
        auto_pause_when_done: get(row, "auto_pause_when_done")?,
        is_active: get(row, "is_active")?,
        priority: get_enum(row, "priority")?,
        assigned_to: get(row, "assigned_to")?,
        procedure_template_id: get(row, "procedure_template_id")?,
        checklist_template_id: get(row, "checklist_template_id")?,
        estimated_hours: get(row, "estimated_hours")?,
        created_by: get(row, "created_by")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

const COMPLETION_COLUMNS: &str = "id, schedule_id, idempotency_key, completed_by, \
     completed_by_name, completed_at, checklist_results, procedure_notes, duration_hours, \
     work_order_id, stage, parts_rejections";

fn completion_from_row(row: &Row) -> Result<ScheduleCompletion, StoreError> {
    let Json(checklist_results): Json<BTreeMap<String, ChecklistResult>> =
        get(row, "checklist_results")?;
    let Json(parts_rejections): Json<PartsRejections> = get(row, "parts_rejections")?;
    Ok(ScheduleCompletion {
        id: get(row, "id")?,
        schedule_id: get(row, "schedule_id")?,
        idempotency_key: get(row, "idempotency_key")?,
        completed_by: get(row, "completed_by")?,
        completed_by_name: get(row, "completed_by_name")?,
        completed_at: get(row, "completed_at")?,
        checklist_results,
        procedure_notes: get(row, "procedure_notes")?,
        duration_hours: get(row, "duration_hours")?,
        work_order_id: get(row, "work_order_id")?,
        stage: get_enum::<CommitStage>(row, "stage")?,
        parts_rejections,
    })
}

const WORK_ORDER_COLUMNS: &str = "id, title, description, work_type, status, priority, \
     equipment_id, location_id, assigned_to, created_by, schedule_id, completion_id, due_date, \
     completed_date, estimated_hours, actual_hours, labor_cost, parts_cost, created_at, updated_at";

fn work_order_from_row(row: &Row) -> Result<WorkOrder, StoreError> {
    let id: Uuid = get(row, "id")?;
    let target = WorkTarget::from_columns(get(row, "equipment_id")?, get(row, "location_id")?)
        .ok_or_else(|| parse_err("equipment_id/location_id", format!("work order {id} has no single target")))?;
    Ok(WorkOrder {
        id,
        title: get(row, "title")?,
        description: get(row, "description")?,
        work_type: get_enum(row, "work_type")?,
        status: get_enum(row, "status")?,
        priority: get_enum(row, "priority")?,
        target,
        assigned_to: get(row, "assigned_to")?,
        created_by: get(row, "created_by")?,
        schedule_id: get(row, "schedule_id")?,
        completion_id: get(row, "completion_id")?,
        due_date: get(row, "due_date")?,
        completed_date: get(row, "completed_date")?,
        estimated_hours: get(row, "estimated_hours")?,
        actual_hours: get(row, "actual_hours")?,
        labor_cost: get(row, "labor_cost")?,
        parts_cost: get(row, "parts_cost")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

const PART_COLUMNS: &str = "id, name, part_number, quantity_in_stock, min_quantity, unit_price, \
     unit_of_measure, compatible_equipment, created_at, updated_at";

fn part_from_row(row: &Row) -> Result<InventoryPart, StoreError> {
    let compatible: Vec<Uuid> = get(row, "compatible_equipment")?;
    Ok(InventoryPart {
        id: get(row, "id")?,
        name: get(row, "name")?,
        part_number: get(row, "part_number")?,
        quantity_in_stock: get(row, "quantity_in_stock")?,
        min_quantity: get(row, "min_quantity")?,
        unit_price: get(row, "unit_price")?,
        unit_of_measure: get(row, "unit_of_measure")?,
        compatible_equipment: compatible.into_iter().collect::<BTreeSet<_>>(),
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

const USAGE_COLUMNS: &str =
    "id, part_id, work_order_id, quantity_used, unit_cost, total_cost, used_by, used_at";

fn usage_from_row(row: &Row) -> Result<PartsUsageRecord, StoreError> {
    let quantity: Decimal = get(row, "quantity_used")?;
    Ok(PartsUsageRecord {
        id: get(row, "id")?,
        part_id: get(row, "part_id")?,
        work_order_id: get(row, "work_order_id")?,
        quantity_used: Quantity::new(quantity).map_err(|e| parse_err("quantity_used", e))?,
        unit_cost: get(row, "unit_cost")?,
        total_cost: get(row, "total_cost")?,
        used_by: get(row, "used_by")?,
        used_at: get(row, "used_at")?,
    })
}

fn comment_from_row(row: &Row) -> Result<WorkOrderComment, StoreError> {
    Ok(WorkOrderComment {
        id: get(row, "id")?,
        work_order_id: get(row, "work_order_id")?,
        author_id: get(row, "author_id")?,
        body: get(row, "body")?,
        created_at: get(row, "created_at")?,
    })
}

fn attachment_from_row(row: &Row) -> Result<WorkOrderAttachment, StoreError> {
    Ok(WorkOrderAttachment {
        id: get(row, "id")?,
        work_order_id: get(row, "work_order_id")?,
        file_name: get(row, "file_name")?,
        storage_ref: get(row, "storage_ref")?,
        uploaded_by: get(row, "uploaded_by")?,
        created_at: get(row, "created_at")?,
    })
}

fn collect<T>(rows: Vec<Row>, map: fn(&Row) -> Result<T, StoreError>) -> Result<Vec<T>, StoreError> {
    rows.iter().map(map).collect()
}

impl PgTx<'_> {
    fn one<T>(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
        map: fn(&Row) -> Result<T, StoreError>,
    ) -> Result<Option<T>, StoreError> {
        self.tx.query_opt(sql, params)?.as_ref().map(map).transpose()
    }

    fn write_schedule(&self, sql: &str, s: &MaintenanceSchedule, extra: Option<i32>) -> Result<u64, StoreError> {
        let times_completed = count_param(s.times_completed)?;
        let repeat_count = s.repeat_count.map(count_param).transpose()?;
        let frequency = s.frequency.as_str();
        let priority = s.priority.as_str();
        let mut params: Vec<&dyn ToSql> = vec![
            &s.id,
            &s.equipment_id,
            &s.title,
            &s.description,
            &frequency,
            &s.next_due_date,
            &s.last_completed_date,
            &s.last_completion_id,
            &times_completed,
            &repeat_count,
            &s.auto_pause_when_done,
            &s.is_active,
            &priority,
            &s.assigned_to,
            &s.procedure_template_id,
            &s.checklist_template_id,
            &s.estimated_hours,
            &s.created_by,
            &s.created_at,
            &s.updated_at,
        ];
        if let Some(expected) = extra.as_ref() {
            params.push(expected);
        }
        self.tx.execute(sql, &params)
    }

    fn write_work_order(&self, sql: &str, w: &WorkOrder) -> Result<u64, StoreError> {
        let work_type = w.work_type.as_str();
        let status = w.status.as_str();
        let priority = w.priority.as_str();
        let equipment_id = w.target.equipment_id();
        let location_id = w.target.location_id();
        self.tx.execute(
            sql,
            &[
                &w.id,
                &w.title,
                &w.description,
                &work_type,
                &status,
                &priority,
                &equipment_id,
                &location_id,
                &w.assigned_to,
                &w.created_by,
                &w.schedule_id,
                &w.completion_id,
                &w.due_date,
                &w.completed_date,
                &w.estimated_hours,
                &w.actual_hours,
                &w.labor_cost,
                &w.parts_cost,
                &w.created_at,
                &w.updated_at,
            ],
        )
    }
}

const SCHEDULE_VALUES: &str =
    "$1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20";

const SCHEDULE_SET: &str = "equipment_id = $2, title = $3, description = $4, frequency = $5, \
     next_due_date = $6, last_completed_date = $7, last_completion_id = $8, times_completed = $9, \
     repeat_count = $10, auto_pause_when_done = $11, is_active = $12, priority = $13, \
     assigned_to = $14, procedure_template_id = $15, checklist_template_id = $16, \
     estimated_hours = $17, created_by = $18, created_at = $19, updated_at = $20";

const WORK_ORDER_SET: &str = "title = $2, description = $3, work_type = $4, status = $5, \
     priority = $6, equipment_id = $7, location_id = $8, assigned_to = $9, created_by = $10, \
     schedule_id = $11, completion_id = $12, due_date = $13, completed_date = $14, \
     estimated_hours = $15, actual_hours = $16, labor_cost = $17, parts_cost = $18, \
     created_at = $19, updated_at = $20";

impl StoreTx for PgTx<'_> {
    fn insert_schedule(&mut self, schedule: &MaintenanceSchedule) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO maintenance_schedules ({SCHEDULE_COLUMNS}) VALUES ({SCHEDULE_VALUES})"
        );
        self.write_schedule(&sql, schedule, None).map(|_| ())
    }

    fn find_schedule(&mut self, id: Uuid) -> Result<Option<MaintenanceSchedule>, StoreError> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM maintenance_schedules WHERE id = $1");
        self.one(&sql, &[&id], schedule_from_row)
    }

    fn lock_schedule(&mut self, id: Uuid) -> Result<Option<MaintenanceSchedule>, StoreError> {
        let sql = format!(
            "SELECT {SCHEDULE_COLUMNS} FROM maintenance_schedules WHERE id = $1 FOR UPDATE"
        );
        self.one(&sql, &[&id], schedule_from_row)
    }

    fn update_schedule(&mut self, schedule: &MaintenanceSchedule) -> Result<(), StoreError> {
        let sql = format!("UPDATE maintenance_schedules SET {SCHEDULE_SET} WHERE id = $1");
        match self.write_schedule(&sql, schedule, None)? {
            0 => Err(StoreError::NotFound {
                entity: "maintenance schedule",
                id: schedule.id,
            }),
            _ => Ok(()),
        }
    }

    fn advance_schedule(
        &mut self,
        schedule: &MaintenanceSchedule,
        expected_times_completed: u32,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE maintenance_schedules SET {SCHEDULE_SET} WHERE id = $1 AND times_completed = $21"
        );
        let expected = count_param(expected_times_completed)?;
        Ok(self.write_schedule(&sql, schedule, Some(expected))? == 1)
    }

    fn delete_schedule(&mut self, id: Uuid) -> Result<bool, StoreError> {
        let n = self
            .tx
            .execute("DELETE FROM maintenance_schedules WHERE id = $1", &[&id])?;
        Ok(n > 0)
    }

    fn overdue_schedules(&mut self, today: NaiveDate) -> Result<Vec<MaintenanceSchedule>, StoreError> {
        let sql = format!(
            "SELECT {SCHEDULE_COLUMNS} FROM maintenance_schedules \
             WHERE is_active AND next_due_date < $1 ORDER BY next_due_date, id"
        );
        collect(self.tx.query_all(&sql, &[&today])?, schedule_from_row)
    }

    fn insert_completion(&mut self, c: &ScheduleCompletion) -> Result<bool, StoreError> {
        let sql = format!(
            "INSERT INTO schedule_completions ({COMPLETION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (idempotency_key) DO NOTHING"
        );
        let checklist = Json(&c.checklist_results);
        let stage = c.stage.as_str();
        let rejections = Json(&c.parts_rejections);
        let n = self.tx.execute(
            &sql,
            &[
                &c.id,
                &c.schedule_id,
                &c.idempotency_key,
                &c.completed_by,
                &c.completed_by_name,
                &c.completed_at,
                &checklist,
                &c.procedure_notes,
                &c.duration_hours,
                &c.work_order_id,
                &stage,
                &rejections,
            ],
        )?;
        Ok(n == 1)
    }

    fn find_completion_by_key(&mut self, key: Uuid) -> Result<Option<ScheduleCompletion>, StoreError> {
        let sql = format!(
            "SELECT {COMPLETION_COLUMNS} FROM schedule_completions WHERE idempotency_key = $1"
        );
        self.one(&sql, &[&key], completion_from_row)
    }

    fn update_completion(&mut self, c: &ScheduleCompletion) -> Result<(), StoreError> {
        // Identity and inputs are fixed at insert.
        let stage = c.stage.as_str();
        let rejections = Json(&c.parts_rejections);
        let n = self.tx.execute(
            "UPDATE schedule_completions \
             SET work_order_id = $2, stage = $3, parts_rejections = $4 WHERE id = $1",
            &[&c.id, &c.work_order_id, &stage, &rejections],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                entity: "schedule completion",
                id: c.id,
            });
        }
        Ok(())
    }

    fn completions_for_schedule(
        &mut self,
        schedule_id: Uuid,
    ) -> Result<Vec<ScheduleCompletion>, StoreError> {
        let sql = format!(
            "SELECT {COMPLETION_COLUMNS} FROM schedule_completions \
             WHERE schedule_id = $1 ORDER BY completed_at"
        );
        collect(self.tx.query_all(&sql, &[&schedule_id])?, completion_from_row)
    }

    fn insert_work_order(&mut self, work_order: &WorkOrder) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO work_orders ({WORK_ORDER_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)"
        );
        self.write_work_order(&sql, work_order).map(|_| ())
    }

    fn find_work_order(&mut self, id: Uuid) -> Result<Option<WorkOrder>, StoreError> {
        let sql = format!("SELECT {WORK_ORDER_COLUMNS} FROM work_orders WHERE id = $1");
        self.one(&sql, &[&id], work_order_from_row)
    }

    fn find_work_order_by_completion(
        &mut self,
        completion_id: Uuid,
    ) -> Result<Option<WorkOrder>, StoreError> {
        let sql = format!("SELECT {WORK_ORDER_COLUMNS} FROM work_orders WHERE completion_id = $1");
        self.one(&sql, &[&completion_id], work_order_from_row)
    }

    fn update_work_order(&mut self, work_order: &WorkOrder) -> Result<(), StoreError> {
        let sql = format!("UPDATE work_orders SET {WORK_ORDER_SET} WHERE id = $1");
        match self.write_work_order(&sql, work_order)? {
            0 => Err(StoreError::NotFound {
                entity: "work order",
                id: work_order.id,
            }),
            _ => Ok(()),
        }
    }

    fn delete_work_order(&mut self, id: Uuid) -> Result<bool, StoreError> {
        // Comments and attachments cascade; completion links are set null.
        let n = self
            .tx
            .execute("DELETE FROM work_orders WHERE id = $1", &[&id])?;
        Ok(n > 0)
    }

    fn insert_comment(&mut self, c: &WorkOrderComment) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO work_order_comments (id, work_order_id, author_id, body, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
            &[&c.id, &c.work_order_id, &c.author_id, &c.body, &c.created_at],
        )?;
        Ok(())
    }

    fn comments_for_work_order(
        &mut self,
        work_order_id: Uuid,
    ) -> Result<Vec<WorkOrderComment>, StoreError> {
        let rows = self.tx.query_all(
            "SELECT id, work_order_id, author_id, body, created_at FROM work_order_comments \
             WHERE work_order_id = $1 ORDER BY created_at",
            &[&work_order_id],
        )?;
        collect(rows, comment_from_row)
    }

    fn insert_attachment(&mut self, a: &WorkOrderAttachment) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO work_order_attachments \
             (id, work_order_id, file_name, storage_ref, uploaded_by, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[&a.id, &a.work_order_id, &a.file_name, &a.storage_ref, &a.uploaded_by, &a.created_at],
        )?;
        Ok(())
    }

    fn attachments_for_work_order(
        &mut self,
        work_order_id: Uuid,
    ) -> Result<Vec<WorkOrderAttachment>, StoreError> {
        let rows = self.tx.query_all(
            "SELECT id, work_order_id, file_name, storage_ref, uploaded_by, created_at \
             FROM work_order_attachments WHERE work_order_id = $1 ORDER BY created_at",
            &[&work_order_id],
        )?;
        collect(rows, attachment_from_row)
    }

    fn insert_part(&mut self, p: &InventoryPart) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO inventory_parts ({PART_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        );
        let compatible: Vec<Uuid> = p.compatible_equipment.iter().copied().collect();
        self.tx.execute(
            &sql,
            &[
                &p.id,
                &p.name,
                &p.part_number,
                &p.quantity_in_stock,
                &p.min_quantity,
                &p.unit_price,
                &p.unit_of_measure,
                &compatible,
                &p.created_at,
                &p.updated_at,
            ],
        )?;
        Ok(())
    }

    fn find_part(&mut self, id: Uuid) -> Result<Option<InventoryPart>, StoreError> {
        let sql = format!("SELECT {PART_COLUMNS} FROM inventory_parts WHERE id = $1");
        self.one(&sql, &[&id], part_from_row)
    }

    fn list_parts(&mut self) -> Result<Vec<InventoryPart>, StoreError> {
        let sql = format!("SELECT {PART_COLUMNS} FROM inventory_parts ORDER BY name, id");
        collect(self.tx.query_all(&sql, &[])?, part_from_row)
    }

    fn set_unit_price(&mut self, part_id: Uuid, unit_price: Decimal) -> Result<bool, StoreError> {
        let now: DateTime<Utc> = Utc::now();
        let n = self.tx.execute(
            "UPDATE inventory_parts SET unit_price = round($2::numeric, 2), updated_at = $3 WHERE id = $1",
            &[&part_id, &unit_price, &now],
        )?;
        Ok(n > 0)
    }

    fn try_decrement_stock(
        &mut self,
        part_id: Uuid,
        quantity: Decimal,
    ) -> Result<StockUpdate, StoreError> {
        let sql = format!(
            "UPDATE inventory_parts SET quantity_in_stock = quantity_in_stock - $1, updated_at = now() \
             WHERE id = $2 AND quantity_in_stock >= $1 RETURNING {PART_COLUMNS}"
        );
        if let Some(part) = self.one(&sql, &[&quantity, &part_id], part_from_row)? {
            return Ok(StockUpdate::Applied(part));
        }
        // The conditional write did not apply; report why from the current row.
        let row = self.tx.query_opt(
            "SELECT name, quantity_in_stock FROM inventory_parts WHERE id = $1",
            &[&part_id],
        )?;
        match row {
            Some(row) => Ok(StockUpdate::Insufficient {
                name: get(&row, "name")?,
                available: get(&row, "quantity_in_stock")?,
            }),
            None => Ok(StockUpdate::Missing),
        }
    }

    fn increment_stock(
        &mut self,
        part_id: Uuid,
        quantity: Decimal,
    ) -> Result<Option<InventoryPart>, StoreError> {
        let sql = format!(
            "UPDATE inventory_parts SET quantity_in_stock = quantity_in_stock + $1, updated_at = now() \
             WHERE id = $2 RETURNING {PART_COLUMNS}"
        );
        self.one(&sql, &[&quantity, &part_id], part_from_row)
    }

    fn insert_usage(&mut self, u: &PartsUsageRecord) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO parts_usage ({USAGE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        );
        let quantity = u.quantity_used.value();
        self.tx.execute(
            &sql,
            &[
                &u.id,
                &u.part_id,
                &u.work_order_id,
                &quantity,
                &u.unit_cost,
                &u.total_cost,
                &u.used_by,
                &u.used_at,
            ],
        )?;
        Ok(())
    }

    fn usage_for_work_order(
        &mut self,
        work_order_id: Uuid,
    ) -> Result<Vec<PartsUsageRecord>, StoreError> {
        let sql = format!(
            "SELECT {USAGE_COLUMNS} FROM parts_usage WHERE work_order_id = $1 ORDER BY used_at, id"
        );
        collect(self.tx.query_all(&sql, &[&work_order_id])?, usage_from_row)
    }

    fn delete_usage(&mut self, id: Uuid) -> Result<bool, StoreError> {
        let n = self
            .tx
            .execute("DELETE FROM parts_usage WHERE id = $1", &[&id])?;
        Ok(n > 0)
    }
}
