//! Units of work on PostgreSQL.
//!
//! The PostgreSQL store runs every unit of work (completion commit, parts
//! consumption, deletion reconciliation) inside one [`Transaction`]. A
//! transaction implements [`Executor`], so the row mapping code never needs
//! to know whether it is inside one.

use crate::executor::{instrumented, Executor, StoreError};
use may_postgres::types::ToSql;
use may_postgres::{Client, Row};
use thiserror::Error;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }

    /// The statement that opens a transaction at this level.
    fn begin_sql(self) -> String {
        format!("BEGIN ISOLATION LEVEL {}", self.as_sql())
    }
}

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("could not {stage} transaction: {source}")]
    Postgres {
        stage: &'static str,
        #[source]
        source: may_postgres::Error,
    },
    #[error("transaction already committed or rolled back")]
    Closed,
}

impl From<TransactionError> for StoreError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::Postgres { source, .. } => StoreError::PostgresError(source),
            TransactionError::Closed => StoreError::Other(err.to_string()),
        }
    }
}

/// An open transaction on one connection.
///
/// Dropping it without [`commit`](Self::commit) rolls it back.
pub struct Transaction {
    client: Client,
    closed: bool,
}

impl Transaction {
    /// Open a transaction. A non-zero `statement_timeout_seconds` bounds every
    /// statement inside it with `SET LOCAL statement_timeout`.
    pub(crate) fn begin(
        client: Client,
        isolation: IsolationLevel,
        statement_timeout_seconds: u64,
    ) -> Result<Self, TransactionError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span().entered();

        client
            .execute(isolation.begin_sql().as_str(), &[])
            .map_err(|source| TransactionError::Postgres { stage: "begin", source })?;
        let transaction = Self {
            client,
            closed: false,
        };
        if statement_timeout_seconds > 0 {
            let sql = format!("SET LOCAL statement_timeout = '{statement_timeout_seconds}s'");
            transaction
                .client
                .execute(sql.as_str(), &[])
                .map_err(|source| TransactionError::Postgres { stage: "configure", source })?;
        }
        Ok(transaction)
    }

    /// # Errors
    ///
    /// `Closed` if the transaction already ended; `Postgres` if the server
    /// refused the commit, in which case nothing was written.
    pub fn commit(mut self) -> Result<(), TransactionError> {
        if self.closed {
            return Err(TransactionError::Closed);
        }
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::commit_transaction_span().entered();

        // Closed before the round-trip so Drop never sends a ROLLBACK after it.
        self.closed = true;
        self.client
            .execute("COMMIT", &[])
            .map_err(|source| TransactionError::Postgres { stage: "commit", source })?;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<(), TransactionError> {
        if self.closed {
            return Err(TransactionError::Closed);
        }
        self.closed = true;
        self.send_rollback()
    }

    fn send_rollback(&self) -> Result<(), TransactionError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::rollback_transaction_span().entered();

        self.client
            .execute("ROLLBACK", &[])
            .map_err(|source| TransactionError::Postgres { stage: "roll back", source })?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            return Err(TransactionError::Closed.into());
        }
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.send_rollback() {
                log::warn!("rollback of abandoned transaction failed: {e}");
            }
        }
    }
}

impl Executor for Transaction {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, StoreError> {
        self.ensure_open()?;
        instrumented(query, || self.client.execute(query, params))
    }

    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, StoreError> {
        self.ensure_open()?;
        instrumented(query, || self.client.query_one(query, params))
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, StoreError> {
        self.ensure_open()?;
        instrumented(query, || self.client.query(query, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_statement_names_isolation_level() {
        assert_eq!(
            IsolationLevel::default().begin_sql(),
            "BEGIN ISOLATION LEVEL READ COMMITTED"
        );
        assert_eq!(
            IsolationLevel::Serializable.begin_sql(),
            "BEGIN ISOLATION LEVEL SERIALIZABLE"
        );
    }

    #[test]
    fn test_closed_becomes_store_error() {
        let err: StoreError = TransactionError::Closed.into();
        assert!(matches!(err, StoreError::Other(ref m) if m.contains("already committed")));
    }
}
