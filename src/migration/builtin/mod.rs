//! Migrations shipped with the crate, in version order.

mod m20240301000000_create_maintenance_tables;
mod m20240301000100_create_inventory_tables;
mod m20240301000200_add_completion_parts_rejections;

pub use m20240301000000_create_maintenance_tables::CreateMaintenanceTables;
pub use m20240301000100_create_inventory_tables::CreateInventoryTables;
pub use m20240301000200_add_completion_parts_rejections::AddCompletionPartsRejections;

use super::Migration;

pub fn all() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(CreateMaintenanceTables),
        Box::new(CreateInventoryTables),
        Box::new(AddCompletionPartsRejections),
    ]
}
