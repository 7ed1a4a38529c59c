//! Parts inventory and the usage ledger.

use sea_query::{Index, Table};

use crate::executor::StoreError;
use crate::migration::{Migration, SchemaManager};

pub struct CreateInventoryTables;

impl Migration for CreateInventoryTables {
    fn name(&self) -> &str {
        "create_inventory_tables"
    }

    fn version(&self) -> i64 {
        20240301000100
    }

    fn up(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError> {
        manager.execute(
            r#"
            CREATE TABLE IF NOT EXISTS inventory_parts (
                id UUID PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                part_number VARCHAR(64),
                quantity_in_stock NUMERIC(12, 2) NOT NULL DEFAULT 0
                    CONSTRAINT inventory_parts_stock_non_negative CHECK (quantity_in_stock >= 0),
                min_quantity NUMERIC(12, 2) NOT NULL DEFAULT 0,
                unit_price NUMERIC(12, 2) NOT NULL DEFAULT 0,
                unit_of_measure VARCHAR(32) NOT NULL DEFAULT 'each',
                compatible_equipment UUID[] NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )?;
        manager.execute(
            r#"
            CREATE TABLE IF NOT EXISTS parts_usage (
                id UUID PRIMARY KEY,
                part_id UUID NOT NULL REFERENCES inventory_parts(id) ON DELETE RESTRICT,
                work_order_id UUID NOT NULL REFERENCES work_orders(id) ON DELETE RESTRICT,
                quantity_used NUMERIC(12, 2) NOT NULL
                    CONSTRAINT parts_usage_quantity_positive CHECK (quantity_used > 0),
                unit_cost NUMERIC(12, 2) NOT NULL,
                total_cost NUMERIC(12, 2) NOT NULL,
                used_by UUID NOT NULL,
                used_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )?;
        manager.create_index(
            Index::create()
                .if_not_exists()
                .name("idx_parts_usage_work_order_id")
                .table("parts_usage")
                .col("work_order_id")
                .to_owned(),
        )?;
        manager.create_index(
            Index::create()
                .if_not_exists()
                .name("idx_parts_usage_part_id")
                .table("parts_usage")
                .col("part_id")
                .to_owned(),
        )?;
        manager.create_index(
            Index::create()
                .if_not_exists()
                .name("idx_inventory_parts_name")
                .table("inventory_parts")
                .col("name")
                .to_owned(),
        )
    }

    fn down(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError> {
        manager.drop_table(Table::drop().table("parts_usage").if_exists().to_owned())?;
        manager.drop_table(Table::drop().table("inventory_parts").if_exists().to_owned())
    }
}
