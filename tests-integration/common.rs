//! Shared setup: a migrated database from `TEST_DATABASE_URL`, or nothing.
#![allow(dead_code)]

use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex, MutexGuard};

use upkeep::config::DatabaseConfig;
use upkeep::migration::Migrator;
use upkeep::{connect, PgExecutor, PgStore};

static MIGRATED: Lazy<Result<(), String>> = Lazy::new(|| {
    let Some(url) = database_url() else {
        return Ok(());
    };
    let executor = PgExecutor::new(connect(&url).map_err(|e| e.to_string())?);
    Migrator::new()
        .up(&executor, None)
        .map(|_| ())
        .map_err(|e| e.to_string())
});

static SERIAL: Mutex<()> = Mutex::new(());

/// Tests that change the migration table take turns.
pub fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn database_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL").ok().filter(|s| !s.is_empty())
}

/// A plain executor on a migrated database; `None` skips the test.
pub fn executor() -> Option<PgExecutor> {
    let url = database_url()?;
    if let Err(e) = &*MIGRATED {
        panic!("migrations failed: {e}");
    }
    Some(PgExecutor::new(connect(&url).expect("connect")))
}

/// A pooled store on a migrated database; `None` skips the test.
pub fn store(connections: u32) -> Option<Arc<PgStore>> {
    let url = database_url()?;
    if let Err(e) = &*MIGRATED {
        panic!("migrations failed: {e}");
    }
    let config = DatabaseConfig {
        url,
        max_connections: connections,
        statement_timeout_seconds: 30,
    };
    Some(Arc::new(PgStore::connect(&config).expect("connect store")))
}

#[macro_export]
macro_rules! require_db {
    ($e:expr) => {
        match $e {
            Some(v) => v,
            None => {
                eprintln!("TEST_DATABASE_URL not set; skipping");
                return;
            }
        }
    };
}
