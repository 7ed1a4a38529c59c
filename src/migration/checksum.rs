//! Checksums of migration statements

use sha2::{Digest, Sha256};

use super::{Migration, SchemaManager};
use crate::executor::StoreError;

/// Hex SHA-256 over the statements, one per line.
pub fn checksum_statements(statements: &[String]) -> String {
    let mut hasher = Sha256::new();
    for statement in statements {
        hasher.update(statement.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Run `up` against a recording manager and return its statements and
/// their checksum. Nothing touches the database.
pub fn plan(migration: &dyn Migration) -> Result<(Vec<String>, String), StoreError> {
    let manager = SchemaManager::recording();
    migration.up(&manager)?;
    let statements = manager.into_statements();
    let checksum = checksum_statements(&statements);
    Ok((statements, checksum))
}
