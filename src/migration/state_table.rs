//! The `upkeep_migrations` state table

use crate::executor::{Executor, StoreError};

pub const STATE_TABLE: &str = "upkeep_migrations";

/// Create the state table and its index if they do not exist.
///
/// The table also carries the lock row (see [`super::lock`]), so it has to
/// exist before any lock is taken.
pub fn initialize_state_table(executor: &dyn Executor) -> Result<(), StoreError> {
    executor.execute(
        "CREATE TABLE IF NOT EXISTS upkeep_migrations (
            version BIGINT PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            checksum VARCHAR(64) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL,
            execution_time_ms BIGINT,
            success BOOLEAN NOT NULL DEFAULT true
        )",
        &[],
    )?;
    executor.execute(
        "CREATE INDEX IF NOT EXISTS idx_upkeep_migrations_applied_at \
         ON upkeep_migrations(applied_at)",
        &[],
    )?;
    Ok(())
}
