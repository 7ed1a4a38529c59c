//! SchemaManager - schema operations available to migrations

use sea_query::{
    ColumnDef, IndexCreateStatement, IndexDropStatement, PostgresQueryBuilder, Table,
    TableAlterStatement, TableCreateStatement, TableDropStatement,
};
use std::cell::RefCell;

use crate::executor::{Executor, StoreError};

/// Runs DDL for a migration and keeps the statements it issued.
///
/// A manager built with [`SchemaManager::recording`] has no executor: it
/// only collects the SQL, which is what checksums and dry runs are computed
/// from.
pub struct SchemaManager<'a> {
    executor: Option<&'a dyn Executor>,
    statements: RefCell<Vec<String>>,
}

impl<'a> SchemaManager<'a> {
    pub fn new(executor: &'a dyn Executor) -> Self {
        Self {
            executor: Some(executor),
            statements: RefCell::new(Vec::new()),
        }
    }

    /// A manager that records statements without running them.
    pub fn recording() -> SchemaManager<'static> {
        SchemaManager {
            executor: None,
            statements: RefCell::new(Vec::new()),
        }
    }

    /// The statements issued so far, in order.
    pub fn into_statements(self) -> Vec<String> {
        self.statements.into_inner()
    }

    /// # Example
    /// ```rust,no_run
    /// # use upkeep::migration::SchemaManager;
    /// use sea_query::{ColumnDef, Table};
    ///
    /// # let manager = SchemaManager::recording();
    /// let table = Table::create()
    ///     .table("spare_bins")
    ///     .if_not_exists()
    ///     .col(ColumnDef::new("id").uuid().not_null().primary_key())
    ///     .to_owned();
    /// manager.create_table(table)?;
    /// # Ok::<(), upkeep::StoreError>(())
    /// ```
    pub fn create_table(&self, table: TableCreateStatement) -> Result<(), StoreError> {
        self.run(table.build(PostgresQueryBuilder))
    }

    pub fn drop_table(&self, table: TableDropStatement) -> Result<(), StoreError> {
        self.run(table.build(PostgresQueryBuilder))
    }

    pub fn alter_table(&self, alter: TableAlterStatement) -> Result<(), StoreError> {
        self.run(alter.build(PostgresQueryBuilder))
    }

    pub fn create_index(&self, index: IndexCreateStatement) -> Result<(), StoreError> {
        self.run(index.build(PostgresQueryBuilder))
    }

    pub fn drop_index(&self, index: IndexDropStatement) -> Result<(), StoreError> {
        self.run(index.build(PostgresQueryBuilder))
    }

    pub fn add_column(&self, table: &str, column: ColumnDef) -> Result<(), StoreError> {
        let alter = Table::alter()
            .table(table.to_string())
            .add_column(column)
            .to_owned();
        self.alter_table(alter)
    }

    pub fn drop_column(&self, table: &str, column: &str) -> Result<(), StoreError> {
        let alter = Table::alter()
            .table(table.to_string())
            .drop_column(column.to_string())
            .to_owned();
        self.alter_table(alter)
    }

    /// Raw SQL, for constraints the builders do not express.
    pub fn execute(&self, sql: &str) -> Result<(), StoreError> {
        self.run(sql.trim().to_string())
    }

    fn run(&self, sql: String) -> Result<(), StoreError> {
        if let Some(executor) = self.executor {
            log::debug!("migration statement: {sql}");
            executor.execute(&sql, &[])?;
        }
        self.statements.borrow_mut().push(sql);
        Ok(())
    }
}
