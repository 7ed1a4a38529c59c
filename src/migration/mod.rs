//! Schema migrations for the PostgreSQL store.
//!
//! Migrations are compiled into the crate (see [`builtin`]). Each one is a
//! [`Migration`] whose `up`/`down` drive a [`SchemaManager`]; the
//! [`Migrator`] tracks what ran in the `upkeep_migrations` table, guards
//! concurrent runs with a lock row in that same table, and refuses to go on
//! when an applied migration no longer produces the SQL it was recorded with.
//!
//! # Example
//!
//! ```rust,no_run
//! use upkeep::migration::{Migration, SchemaManager};
//! use upkeep::StoreError;
//! use sea_query::{ColumnDef, Table};
//!
//! pub struct CreateToolCribs;
//!
//! impl Migration for CreateToolCribs {
//!     fn name(&self) -> &str {
//!         "create_tool_cribs"
//!     }
//!
//!     fn version(&self) -> i64 {
//!         20240601120000
//!     }
//!
//!     fn up(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError> {
//!         manager.create_table(
//!             Table::create()
//!                 .table("tool_cribs")
//!                 .if_not_exists()
//!                 .col(ColumnDef::new("id").uuid().not_null().primary_key())
//!                 .col(ColumnDef::new("name").string().not_null())
//!                 .to_owned(),
//!         )
//!     }
//!
//!     fn down(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError> {
//!         manager.drop_table(Table::drop().table("tool_cribs").if_exists().to_owned())
//!     }
//! }
//! ```

pub mod builtin;
pub mod checksum;
pub mod error;
pub mod lock;
pub mod migration;
pub mod migrator;
pub mod record;
pub mod schema_manager;
pub mod startup;
pub mod state_table;
pub mod status;

pub use checksum::{checksum_statements, plan};
pub use error::MigrationError;
pub use lock::{is_migration_lock_held, MigrationLockGuard, LOCK_VERSION};
pub use migration::Migration;
pub use migrator::Migrator;
pub use record::MigrationRecord;
pub use schema_manager::SchemaManager;
pub use startup::startup_migrations;
pub use state_table::initialize_state_table;
pub use status::{MigrationStatus, PendingMigration};
