//! # Upkeep
//!
//! Preventive-maintenance and parts-inventory core for the `may` coroutine
//! runtime, backed by PostgreSQL through `may_postgres` or by an in-memory
//! store.
//!
//! - [`recurrence`] computes next due dates.
//! - [`workflow`] is the completion wizard a technician steps through.
//! - [`lifecycle`] commits a finished wizard: completion record, schedule
//!   advance and preventive work order, atomically or resumably.
//! - [`ledger`] and [`reconciler`] move parts stock; [`deletion`] puts it
//!   back when a work order is removed.
//! - [`work_orders`] manages corrective work orders and their status.
//! - [`migration`] owns the PostgreSQL schema.

pub mod clock;
pub mod config;
pub mod connection;
pub mod deletion;
pub mod error;
pub mod executor;
pub mod identity;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod migration;
pub mod model;
pub mod notify;
pub mod reconciler;
pub mod recurrence;
pub mod store;
pub mod transaction;
pub mod work_orders;
pub mod workflow;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::UpkeepConfig;
pub use connection::{connect, ConnectionError};
pub use deletion::{DeletionReconciler, DeletionReport};
pub use error::{
    LedgerError, LifecycleCommitError, NotificationError, ReconciliationError, StockConflict,
    ValidationError, WorkOrderError,
};
pub use executor::{Executor, PgExecutor, StoreError};
pub use identity::{Actor, IdentityProvider, StaticIdentity};
pub use ledger::InventoryLedger;
pub use lifecycle::{
    CompletionCommitter, CompletionReceipt, CompletionRequest, MaintenanceLifecycleCoordinator,
};
pub use notify::{Notification, NotificationDispatcher, Notifier, OutboundQueue};
pub use reconciler::{PartRequest, PartsReport, PartsSelection, PartsUsageReconciler};
pub use recurrence::{next_due_date, Frequency};
pub use store::{MemoryStore, PgStore, Store, StoreTx};
pub use transaction::{IsolationLevel, Transaction, TransactionError};
pub use work_orders::{NewWorkOrder, WorkOrderService};
pub use workflow::{CompletionWizard, FinalizeOutcome, Step};
