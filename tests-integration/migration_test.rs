//! Migration system against a real PostgreSQL database.
//!
//! Skipped unless `TEST_DATABASE_URL` is set.

#[path = "common.rs"]
mod common;

use std::time::Duration;

use upkeep::migration::{
    builtin, is_migration_lock_held, Migration, MigrationError, MigrationLockGuard, Migrator,
    SchemaManager,
};
use upkeep::{Executor, StoreError};

struct CreateScratchTable;

impl Migration for CreateScratchTable {
    fn name(&self) -> &str {
        "create_scratch_table"
    }

    fn version(&self) -> i64 {
        29991231235959
    }

    fn up(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError> {
        manager.execute(
            "CREATE TABLE IF NOT EXISTS upkeep_scratch (id UUID PRIMARY KEY, label TEXT NOT NULL)",
        )
    }

    fn down(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError> {
        manager.execute("DROP TABLE IF EXISTS upkeep_scratch")
    }
}

fn table_exists(executor: &dyn Executor, table: &str) -> bool {
    let row = executor
        .query_one(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = $1",
            &[&table],
        )
        .unwrap();
    let count: i64 = row.get(0);
    count > 0
}

#[test]
fn test_builtin_schema_is_applied_and_valid() {
    let _serial = common::serial();
    let executor = require_db!(common::executor());

    let status = Migrator::new().status(&executor).unwrap();
    assert!(status.is_up_to_date(), "pending: {:?}", status.pending);
    assert_eq!(status.latest_applied_version(), Some(20240301000200));
    assert_eq!(Migrator::new().validate_checksums(&executor).unwrap(), 3);

    for table in [
        "maintenance_schedules",
        "schedule_completions",
        "work_orders",
        "work_order_comments",
        "work_order_attachments",
        "inventory_parts",
        "parts_usage",
    ] {
        assert!(table_exists(&executor, table), "{table} missing");
    }

    // Re-running is a no-op.
    assert!(Migrator::new().up(&executor, None).unwrap().is_empty());
}

#[test]
fn test_extra_migration_up_and_down() {
    let _serial = common::serial();
    let executor = require_db!(common::executor());
    let mut migrations = builtin::all();
    migrations.push(Box::new(CreateScratchTable));
    let migrator = Migrator::with_migrations(migrations).unwrap();

    let applied = migrator.up(&executor, None).unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].name, "create_scratch_table");
    assert!(table_exists(&executor, "upkeep_scratch"));

    let rolled_back = migrator.down(&executor, Some(1)).unwrap();
    assert_eq!(rolled_back.len(), 1);
    assert_eq!(rolled_back[0].version, 29991231235959);
    assert!(!table_exists(&executor, "upkeep_scratch"));
    assert!(migrator.status(&executor).unwrap().applied.iter().all(|r| r.version != 29991231235959));
}

#[test]
fn test_lock_blocks_a_second_migrator() {
    let _serial = common::serial();
    let holder = require_db!(common::executor());
    let other = require_db!(common::executor());

    let guard = MigrationLockGuard::acquire(&holder, Duration::from_secs(30)).unwrap();
    assert!(is_migration_lock_held(&other).unwrap());

    let err = Migrator::new()
        .with_lock_timeout(Duration::from_secs(1))
        .up(&other, None)
        .unwrap_err();
    assert!(matches!(err, MigrationError::LockTimeout(_)), "{err}");

    drop(guard);
    assert!(!is_migration_lock_held(&other).unwrap());
}
