//! Migration trait definition

use super::schema_manager::SchemaManager;
use crate::executor::StoreError;

/// One versioned schema change.
///
/// Migrations are synchronous; statements go through the manager's
/// executor, which the `may` runtime schedules.
pub trait Migration: Send + Sync {
    /// Human-readable identifier.
    fn name(&self) -> &str;

    /// Timestamp version, `YYYYMMDDHHMMSS`.
    fn version(&self) -> i64;

    fn up(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError>;

    fn down(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError>;
}
