//! Applied versus pending migrations

use serde::Serialize;

use super::record::MigrationRecord;

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub applied: Vec<MigrationRecord>,
    pub pending: Vec<PendingMigration>,
}

/// A known migration that has not been applied yet.
#[derive(Debug, Clone, Serialize)]
pub struct PendingMigration {
    pub version: i64,
    pub name: String,
    pub checksum: String,
    /// What `up` will run.
    pub statements: Vec<String>,
}

impl MigrationStatus {
    pub fn new(applied: Vec<MigrationRecord>, pending: Vec<PendingMigration>) -> Self {
        Self { applied, pending }
    }

    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn latest_applied_version(&self) -> Option<i64> {
        self.applied.iter().map(|m| m.version).max()
    }

    pub fn next_pending_version(&self) -> Option<i64> {
        self.pending.first().map(|m| m.version)
    }
}
