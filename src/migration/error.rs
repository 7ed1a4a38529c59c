//! Migration-specific error types

use thiserror::Error;

use crate::executor::StoreError;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("database error: {0}")]
    Database(#[from] StoreError),

    #[error(
        "migration '{name}' (version {version}) has been modified after being applied \
         (stored checksum {stored}, current {current})"
    )]
    ChecksumMismatch {
        version: i64,
        name: String,
        stored: String,
        current: String,
    },

    #[error("migration lock timeout: {0}")]
    LockTimeout(String),

    #[error("migration '{name}' (version {version}) failed: {source}")]
    ExecutionFailed {
        version: i64,
        name: String,
        #[source]
        source: StoreError,
    },

    /// A migration recorded in the database that this build does not know about.
    #[error("applied migration '{name}' (version {version}) is not known to this build")]
    UnknownMigration { version: i64, name: String },

    #[error("invalid migration version {0}: versions must be positive and unique")]
    InvalidVersion(i64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_mismatch_names_the_migration() {
        let err = MigrationError::ChecksumMismatch {
            version: 20240301000000,
            name: "create_maintenance_tables".into(),
            stored: "aa".into(),
            current: "bb".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("create_maintenance_tables"));
        assert!(msg.contains("20240301000000"));
    }

    #[test]
    fn test_store_errors_convert() {
        let err: MigrationError = StoreError::QueryError("syntax".into()).into();
        assert!(matches!(err, MigrationError::Database(_)));
    }
}
