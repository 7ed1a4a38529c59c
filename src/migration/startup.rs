//! Applying migrations when a service starts

use super::{MigrationError, Migrator};
use crate::config::MigrationConfig;
use crate::executor::Executor;

/// Apply every pending built-in migration before the service takes traffic.
///
/// With several instances starting at once, the first one to take the lock
/// migrates and the others wait for it (up to the configured timeout), then
/// find nothing left to do. Returns how many migrations this call applied.
///
/// # Example
///
/// ```rust,no_run
/// use upkeep::{connect, PgExecutor, UpkeepConfig};
/// use upkeep::migration::startup_migrations;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = UpkeepConfig::load()?;
///     let executor = PgExecutor::new(connect(&config.database.url)?);
///     startup_migrations(&executor, &config.migrations)?;
///     Ok(())
/// }
/// ```
pub fn startup_migrations(
    executor: &dyn Executor,
    config: &MigrationConfig,
) -> Result<usize, MigrationError> {
    let applied = Migrator::from_config(config).up(executor, None)?;
    if applied.is_empty() {
        log::debug!("no pending migrations");
    } else {
        log::info!("applied {} migration(s) on startup", applied.len());
    }
    Ok(applied.len())
}
