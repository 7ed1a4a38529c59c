//! Migrator - applies, rolls back and inspects migrations

use chrono::Utc;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use super::builtin;
use super::checksum::plan;
use super::lock::MigrationLockGuard;
use super::record::MigrationRecord;
use super::state_table::initialize_state_table;
use super::status::{MigrationStatus, PendingMigration};
use super::{Migration, MigrationError, SchemaManager};
use crate::config::MigrationConfig;
use crate::executor::Executor;

pub struct Migrator {
    migrations: Vec<Box<dyn Migration>>,
    lock_timeout: Duration,
}

impl Default for Migrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Migrator {
    /// The migrations shipped with the crate.
    pub fn new() -> Self {
        Self {
            migrations: builtin::all(),
            lock_timeout: Duration::from_secs(MigrationConfig::default().lock_timeout_seconds),
        }
    }

    pub fn from_config(config: &MigrationConfig) -> Self {
        Self::new().with_lock_timeout(Duration::from_secs(config.lock_timeout_seconds))
    }

    /// A migrator over an explicit set of migrations.
    ///
    /// # Errors
    ///
    /// `InvalidVersion` if a version is not positive or appears twice.
    pub fn with_migrations(mut migrations: Vec<Box<dyn Migration>>) -> Result<Self, MigrationError> {
        let mut seen = BTreeSet::new();
        for m in &migrations {
            if m.version() <= 0 || !seen.insert(m.version()) {
                return Err(MigrationError::InvalidVersion(m.version()));
            }
        }
        migrations.sort_by_key(|m| m.version());
        Ok(Self {
            migrations,
            lock_timeout: Duration::from_secs(MigrationConfig::default().lock_timeout_seconds),
        })
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn migrations(&self) -> &[Box<dyn Migration>] {
        &self.migrations
    }

    fn find(&self, version: i64) -> Option<&dyn Migration> {
        self.migrations
            .iter()
            .find(|m| m.version() == version)
            .map(|m| m.as_ref())
    }

    /// Compare the known migrations with the state table.
    ///
    /// # Errors
    ///
    /// `ChecksumMismatch` if an applied migration now issues different SQL,
    /// `UnknownMigration` if the database has one this build lacks.
    pub fn status(&self, executor: &dyn Executor) -> Result<MigrationStatus, MigrationError> {
        initialize_state_table(executor)?;
        let applied = query_applied_migrations(executor)?;

        for record in &applied {
            let Some(migration) = self.find(record.version) else {
                return Err(MigrationError::UnknownMigration {
                    version: record.version,
                    name: record.name.clone(),
                });
            };
            let (_, current) = plan(migration)?;
            if current != record.checksum {
                return Err(MigrationError::ChecksumMismatch {
                    version: record.version,
                    name: record.name.clone(),
                    stored: record.checksum.clone(),
                    current,
                });
            }
        }

        let applied_versions: BTreeSet<i64> = applied.iter().map(|r| r.version).collect();
        let mut pending = Vec::new();
        for migration in &self.migrations {
            if applied_versions.contains(&migration.version()) {
                continue;
            }
            let (statements, checksum) = plan(migration.as_ref())?;
            pending.push(PendingMigration {
                version: migration.version(),
                name: migration.name().to_string(),
                checksum,
                statements,
            });
        }
        Ok(MigrationStatus::new(applied, pending))
    }

    /// Returns the number of applied migrations whose checksums were checked.
    pub fn validate_checksums(&self, executor: &dyn Executor) -> Result<usize, MigrationError> {
        Ok(self.status(executor)?.applied.len())
    }

    /// Apply up to `steps` pending migrations (all when `None`) under the lock.
    pub fn up(
        &self,
        executor: &dyn Executor,
        steps: Option<usize>,
    ) -> Result<Vec<MigrationRecord>, MigrationError> {
        initialize_state_table(executor)?;
        let lock = MigrationLockGuard::acquire(executor, self.lock_timeout)?;
        self.up_with_lock(lock.executor(), steps)
    }

    /// Apply pending migrations; the caller already holds the lock.
    pub fn up_with_lock(
        &self,
        executor: &dyn Executor,
        steps: Option<usize>,
    ) -> Result<Vec<MigrationRecord>, MigrationError> {
        let status = self.status(executor)?;
        let take = steps.unwrap_or(status.pending.len());
        let mut applied = Vec::new();

        for pending in status.pending.into_iter().take(take) {
            let Some(migration) = self.find(pending.version) else {
                continue;
            };
            let start = Instant::now();
            let manager = SchemaManager::new(executor);
            migration
                .up(&manager)
                .map_err(|source| MigrationError::ExecutionFailed {
                    version: pending.version,
                    name: pending.name.clone(),
                    source,
                })?;

            let record = MigrationRecord {
                version: pending.version,
                name: pending.name,
                checksum: pending.checksum,
                applied_at: Utc::now(),
                execution_time_ms: i64::try_from(start.elapsed().as_millis()).ok(),
                success: true,
            };
            record_migration(executor, &record)?;
            log::info!("applied migration {} ({})", record.version, record.name);
            applied.push(record);
        }
        Ok(applied)
    }

    /// Roll back the newest `steps` applied migrations (one when `None`).
    pub fn down(
        &self,
        executor: &dyn Executor,
        steps: Option<usize>,
    ) -> Result<Vec<MigrationRecord>, MigrationError> {
        initialize_state_table(executor)?;
        let lock = MigrationLockGuard::acquire(executor, self.lock_timeout)?;
        let executor = lock.executor();

        let mut applied = self.status(executor)?.applied;
        applied.sort_by_key(|m| std::cmp::Reverse(m.version));
        let mut rolled_back = Vec::new();

        for record in applied.into_iter().take(steps.unwrap_or(1)) {
            let Some(migration) = self.find(record.version) else {
                continue;
            };
            let manager = SchemaManager::new(executor);
            migration
                .down(&manager)
                .map_err(|source| MigrationError::ExecutionFailed {
                    version: record.version,
                    name: record.name.clone(),
                    source,
                })?;
            remove_migration_record(executor, record.version)?;
            log::info!("rolled back migration {} ({})", record.version, record.name);
            rolled_back.push(record);
        }
        Ok(rolled_back)
    }
}

/// Applied migrations, oldest first. The lock row is excluded.
fn query_applied_migrations(executor: &dyn Executor) -> Result<Vec<MigrationRecord>, MigrationError> {
    let rows = executor.query_all(
        "SELECT version, name, checksum, applied_at, execution_time_ms, success \
         FROM upkeep_migrations WHERE version > 0 ORDER BY version ASC",
        &[],
    )?;
    rows.iter()
        .map(|row| MigrationRecord::from_row(row).map_err(MigrationError::from))
        .collect()
}

fn record_migration(executor: &dyn Executor, record: &MigrationRecord) -> Result<(), MigrationError> {
    executor.execute(
        "INSERT INTO upkeep_migrations \
         (version, name, checksum, applied_at, execution_time_ms, success) \
         VALUES ($1, $2, $3, $4, $5, $6)",
        &[
            &record.version,
            &record.name,
            &record.checksum,
            &record.applied_at,
            &record.execution_time_ms,
            &record.success,
        ],
    )?;
    Ok(())
}

fn remove_migration_record(executor: &dyn Executor, version: i64) -> Result<(), MigrationError> {
    executor.execute("DELETE FROM upkeep_migrations WHERE version = $1", &[&version])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::StoreError;
    use may_postgres::types::ToSql;
    use may_postgres::Row;
    use std::cell::RefCell;

    /// Logs every statement; the state table always reads back empty.
    #[derive(Default)]
    struct ScriptedExecutor {
        log: RefCell<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl Executor for ScriptedExecutor {
        fn execute(&self, query: &str, _params: &[&dyn ToSql]) -> Result<u64, StoreError> {
            self.log.borrow_mut().push(query.to_string());
            match self.fail_on {
                Some(needle) if query.contains(needle) => {
                    Err(StoreError::QueryError(format!("refused: {needle}")))
                }
                _ => Ok(1),
            }
        }

        fn query_one(&self, query: &str, _params: &[&dyn ToSql]) -> Result<Row, StoreError> {
            Err(StoreError::QueryError(format!("no rows for {query}")))
        }

        fn query_all(&self, query: &str, _params: &[&dyn ToSql]) -> Result<Vec<Row>, StoreError> {
            self.log.borrow_mut().push(query.to_string());
            Ok(Vec::new())
        }
    }

    struct Noop(i64);

    impl Migration for Noop {
        fn name(&self) -> &str {
            "noop"
        }
        fn version(&self) -> i64 {
            self.0
        }
        fn up(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError> {
            manager.execute("SELECT 1")
        }
        fn down(&self, _manager: &SchemaManager<'_>) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn test_builtin_versions_are_ordered_and_unique() {
        let migrator = Migrator::new();
        let versions: Vec<i64> = migrator.migrations().iter().map(|m| m.version()).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(versions, sorted);
        assert!(versions.iter().all(|v| *v > 0));
    }

    #[test]
    fn test_duplicate_versions_rejected() {
        let err = Migrator::with_migrations(vec![Box::new(Noop(5)), Box::new(Noop(5))]);
        assert!(matches!(err, Err(MigrationError::InvalidVersion(5))));
        let err = Migrator::with_migrations(vec![Box::new(Noop(-1))]);
        assert!(matches!(err, Err(MigrationError::InvalidVersion(-1))));
    }

    #[test]
    fn test_builtin_schema_carries_the_constraints() {
        let sql: String = Migrator::new()
            .migrations()
            .iter()
            .flat_map(|m| plan(m.as_ref()).unwrap().0)
            .collect::<Vec<_>>()
            .join("\n");
        assert!(sql.contains("(equipment_id IS NULL) <> (location_id IS NULL)"));
        assert!(sql.contains("CHECK (quantity_in_stock >= 0)"));
        assert!(sql.contains("CHECK (quantity_used > 0)"));
        assert!(sql.contains("uq_schedule_completions_idempotency_key"));
        assert!(sql.contains("ADD COLUMN IF NOT EXISTS parts_rejections JSONB"));
    }

    #[test]
    fn test_status_on_empty_database_lists_everything_pending() {
        let executor = ScriptedExecutor::default();
        let status = Migrator::new().status(&executor).unwrap();
        assert!(status.applied.is_empty());
        assert_eq!(status.pending.len(), 3);
        assert_eq!(status.next_pending_version(), Some(20240301000000));
        assert!(!status.is_up_to_date());
    }

    #[test]
    fn test_up_takes_lock_records_and_releases() {
        let executor = ScriptedExecutor::default();
        let applied = Migrator::new().up(&executor, Some(1)).unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].name, "create_maintenance_tables");

        let log = executor.log.borrow();
        let lock = log.iter().position(|s| s.contains("'LOCK'")).unwrap();
        let first_ddl = log.iter().position(|s| s.contains("maintenance_schedules")).unwrap();
        let recorded = log
            .iter()
            .position(|s| s.contains("execution_time_ms, success) VALUES"))
            .unwrap();
        assert!(lock < first_ddl && first_ddl < recorded);
        assert!(log.last().unwrap().starts_with("DELETE FROM upkeep_migrations"));
        assert!(!log.iter().any(|s| s.contains("inventory_parts")));
    }

    #[test]
    fn test_failed_migration_is_not_recorded_and_lock_released() {
        let executor = ScriptedExecutor {
            fail_on: Some("CREATE TABLE IF NOT EXISTS work_orders"),
            ..Default::default()
        };
        let err = Migrator::new().up(&executor, None).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::ExecutionFailed { version: 20240301000000, .. }
        ));
        let log = executor.log.borrow();
        assert!(!log
            .iter()
            .any(|s| s.contains("execution_time_ms, success) VALUES")));
        assert!(log.last().unwrap().starts_with("DELETE FROM upkeep_migrations"));
    }
}
