//! Table-based migration lock
//!
//! The process that manages to insert the lock row (version `-1`) into
//! `upkeep_migrations` holds the lock; everyone else polls until it is gone
//! or the timeout expires.

use std::time::{Duration, Instant};

use super::MigrationError;
use crate::executor::Executor;

/// Reserved version of the lock row. Real migrations use positive versions.
pub const LOCK_VERSION: i64 = -1;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-attempt statement timeout so a stuck INSERT cannot outlive the lock timeout.
const ATTEMPT_TIMEOUT_SECONDS: u64 = 5;

/// Holds the migration lock; releases it on drop.
pub struct MigrationLockGuard<'a> {
    executor: &'a dyn Executor,
}

impl<'a> MigrationLockGuard<'a> {
    /// # Errors
    ///
    /// `MigrationError::LockTimeout` if the lock is still held by someone
    /// else after `timeout`.
    pub fn acquire(executor: &'a dyn Executor, timeout: Duration) -> Result<Self, MigrationError> {
        acquire_migration_lock(executor, timeout)?;
        Ok(Self { executor })
    }

    pub fn executor(&self) -> &'a dyn Executor {
        self.executor
    }
}

impl Drop for MigrationLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = release_migration_lock(self.executor) {
            log::warn!("failed to release migration lock: {e}");
        }
    }
}

fn timeout_error(timeout: Duration) -> MigrationError {
    MigrationError::LockTimeout(format!(
        "lock not acquired within {}s; another process may be migrating. \
         A stale lock can be cleared with: DELETE FROM upkeep_migrations WHERE version = {LOCK_VERSION}",
        timeout.as_secs()
    ))
}

/// Poll until the lock row is ours or `timeout` has passed.
pub fn acquire_migration_lock(executor: &dyn Executor, timeout: Duration) -> Result<(), MigrationError> {
    let start = Instant::now();
    let _ = executor.execute(
        &format!("SET statement_timeout = '{ATTEMPT_TIMEOUT_SECONDS}s'"),
        &[],
    );

    let result = loop {
        if start.elapsed() >= timeout {
            break Err(timeout_error(timeout));
        }
        match executor.execute(
            "INSERT INTO upkeep_migrations (version, name, checksum, applied_at, success) \
             VALUES ($1, 'LOCK', 'lock', now(), true) \
             ON CONFLICT (version) DO NOTHING",
            &[&LOCK_VERSION],
        ) {
            Ok(n) if n > 0 => break Ok(()),
            Ok(_) => log::debug!("migration lock held elsewhere, waiting"),
            Err(e) => {
                let message = e.to_string();
                if !(message.contains("timeout") || message.contains("canceling statement")) {
                    break Err(MigrationError::Database(e));
                }
                log::debug!("lock attempt timed out, retrying");
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let _ = executor.execute("RESET statement_timeout", &[]);
    result
}

pub fn release_migration_lock(executor: &dyn Executor) -> Result<(), MigrationError> {
    executor.execute(
        "DELETE FROM upkeep_migrations WHERE version = $1",
        &[&LOCK_VERSION],
    )?;
    Ok(())
}

pub fn is_migration_lock_held(executor: &dyn Executor) -> Result<bool, MigrationError> {
    let row = executor.query_one(
        "SELECT COUNT(*) FROM upkeep_migrations WHERE version = $1",
        &[&LOCK_VERSION],
    )?;
    let count: i64 = row
        .try_get(0)
        .map_err(|e| crate::executor::StoreError::ParseError(e.to_string()))?;
    Ok(count > 0)
}
