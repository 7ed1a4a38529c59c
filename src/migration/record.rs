//! Rows of the `upkeep_migrations` state table

use chrono::{DateTime, Utc};
use may_postgres::Row;
use serde::Serialize;

use crate::executor::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    /// SHA-256 of the statements the migration issued.
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
    pub execution_time_ms: Option<i64>,
    pub success: bool,
}

impl MigrationRecord {
    /// Expected column order: `version, name, checksum, applied_at,
    /// execution_time_ms, success`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ParseError` when a column has an unexpected type.
    pub fn from_row(row: &Row) -> Result<Self, StoreError> {
        let parse = |column: &str, e: may_postgres::Error| {
            StoreError::ParseError(format!("upkeep_migrations.{column}: {e}"))
        };
        Ok(Self {
            version: row.try_get(0).map_err(|e| parse("version", e))?,
            name: row.try_get(1).map_err(|e| parse("name", e))?,
            checksum: row.try_get(2).map_err(|e| parse("checksum", e))?,
            applied_at: row.try_get(3).map_err(|e| parse("applied_at", e))?,
            execution_time_ms: row.try_get(4).map_err(|e| parse("execution_time_ms", e))?,
            success: row.try_get(5).map_err(|e| parse("success", e))?,
        })
    }
}
