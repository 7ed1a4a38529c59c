//! Schedules, completions, work orders and their comments and attachments.

use sea_query::{Index, Table};

use crate::executor::StoreError;
use crate::migration::{Migration, SchemaManager};

pub struct CreateMaintenanceTables;

impl Migration for CreateMaintenanceTables {
    fn name(&self) -> &str {
        "create_maintenance_tables"
    }

    fn version(&self) -> i64 {
        20240301000000
    }

    fn up(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError> {
        manager.execute(
            r#"
            CREATE TABLE IF NOT EXISTS maintenance_schedules (
                id UUID PRIMARY KEY,
                equipment_id UUID NOT NULL,
                title VARCHAR(255) NOT NULL,
                description TEXT,
                frequency VARCHAR(32),
                next_due_date DATE NOT NULL,
                last_completed_date TIMESTAMPTZ,
                last_completion_id UUID,
                times_completed INTEGER NOT NULL DEFAULT 0 CHECK (times_completed >= 0),
                repeat_count INTEGER CHECK (repeat_count IS NULL OR repeat_count >= 0),
                auto_pause_when_done BOOLEAN NOT NULL DEFAULT false,
                is_active BOOLEAN NOT NULL DEFAULT true,
                priority VARCHAR(16) NOT NULL DEFAULT 'medium',
                assigned_to UUID,
                procedure_template_id UUID,
                checklist_template_id UUID,
                estimated_hours NUMERIC(12, 2),
                created_by UUID NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )?;

        manager.execute(
            r#"
            CREATE TABLE IF NOT EXISTS schedule_completions (
                id UUID PRIMARY KEY,
                schedule_id UUID NOT NULL REFERENCES maintenance_schedules(id) ON DELETE CASCADE,
                idempotency_key UUID NOT NULL,
                completed_by UUID NOT NULL,
                completed_by_name VARCHAR(255) NOT NULL,
                completed_at TIMESTAMPTZ NOT NULL,
                checklist_results JSONB NOT NULL DEFAULT '{}'::jsonb,
                procedure_notes TEXT,
                duration_hours NUMERIC(12, 2),
                work_order_id UUID,
                stage VARCHAR(32) NOT NULL
            )
            "#,
        )?;
        manager.create_index(
            Index::create()
                .if_not_exists()
                .name("uq_schedule_completions_idempotency_key")
                .table("schedule_completions")
                .col("idempotency_key")
                .unique()
                .to_owned(),
        )?;
        manager.create_index(
            Index::create()
                .if_not_exists()
                .name("idx_schedule_completions_schedule_id")
                .table("schedule_completions")
                .col("schedule_id")
                .to_owned(),
        )?;

        manager.execute(
            r#"
            CREATE TABLE IF NOT EXISTS work_orders (
                id UUID PRIMARY KEY,
                title VARCHAR(255) NOT NULL,
                description TEXT,
                work_type VARCHAR(16) NOT NULL,
                status VARCHAR(16) NOT NULL,
                priority VARCHAR(16) NOT NULL,
                equipment_id UUID,
                location_id UUID,
                assigned_to UUID,
                created_by UUID NOT NULL,
                schedule_id UUID REFERENCES maintenance_schedules(id) ON DELETE SET NULL,
                completion_id UUID REFERENCES schedule_completions(id) ON DELETE SET NULL,
                due_date DATE,
                completed_date TIMESTAMPTZ,
                estimated_hours NUMERIC(12, 2),
                actual_hours NUMERIC(12, 2),
                labor_cost NUMERIC(12, 2) NOT NULL DEFAULT 0,
                parts_cost NUMERIC(12, 2) NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                CONSTRAINT work_orders_single_target
                    CHECK ((equipment_id IS NULL) <> (location_id IS NULL))
            )
            "#,
        )?;
        manager.create_index(
            Index::create()
                .if_not_exists()
                .name("uq_work_orders_completion_id")
                .table("work_orders")
                .col("completion_id")
                .unique()
                .to_owned(),
        )?;
        manager.create_index(
            Index::create()
                .if_not_exists()
                .name("idx_work_orders_assigned_to")
                .table("work_orders")
                .col("assigned_to")
                .to_owned(),
        )?;

        // The completion row exists before its work order, so this side of
        // the link is added once both tables are there.
        manager.execute(
            r#"
            DO $$
            BEGIN
                IF NOT EXISTS (
                    SELECT 1 FROM pg_constraint WHERE conname = 'schedule_completions_work_order_fk'
                ) THEN
                    ALTER TABLE schedule_completions
                        ADD CONSTRAINT schedule_completions_work_order_fk
                        FOREIGN KEY (work_order_id) REFERENCES work_orders(id) ON DELETE SET NULL;
                END IF;
            END
            $$
            "#,
        )?;

        manager.execute(
            r#"
            CREATE TABLE IF NOT EXISTS work_order_comments (
                id UUID PRIMARY KEY,
                work_order_id UUID NOT NULL REFERENCES work_orders(id) ON DELETE CASCADE,
                author_id UUID NOT NULL,
                body TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )?;
        manager.execute(
            r#"
            CREATE TABLE IF NOT EXISTS work_order_attachments (
                id UUID PRIMARY KEY,
                work_order_id UUID NOT NULL REFERENCES work_orders(id) ON DELETE CASCADE,
                file_name VARCHAR(255) NOT NULL,
                storage_ref TEXT NOT NULL,
                uploaded_by UUID NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )?;
        manager.create_index(
            Index::create()
                .if_not_exists()
                .name("idx_work_order_comments_work_order_id")
                .table("work_order_comments")
                .col("work_order_id")
                .to_owned(),
        )?;
        manager.create_index(
            Index::create()
                .if_not_exists()
                .name("idx_work_order_attachments_work_order_id")
                .table("work_order_attachments")
                .col("work_order_id")
                .to_owned(),
        )?;
        manager.create_index(
            Index::create()
                .if_not_exists()
                .name("idx_maintenance_schedules_next_due_date")
                .table("maintenance_schedules")
                .col("next_due_date")
                .to_owned(),
        )
    }

    fn down(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError> {
        manager.execute(
            "ALTER TABLE IF EXISTS schedule_completions \
             DROP CONSTRAINT IF EXISTS schedule_completions_work_order_fk",
        )?;
        for table in [
            "work_order_attachments",
            "work_order_comments",
            "work_orders",
            "schedule_completions",
            "maintenance_schedules",
        ] {
            manager.drop_table(Table::drop().table(table).if_exists().to_owned())?;
        }
        Ok(())
    }
}
