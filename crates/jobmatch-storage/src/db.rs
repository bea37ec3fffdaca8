//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex. WAL mode and the usual
//! PRAGMAs are configured on open, and pending migrations run before the
//! handle is returned.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use jobmatch_core::error::JobMatchError;

use crate::migrations;

/// Thread-safe SQLite database wrapper.
///
/// The connection is wrapped in a Mutex since rusqlite's Connection is not
/// Sync. Batched writes go through [`Database::with_tx`], which is the only
/// commit unit the repository uses for embedding updates.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self, JobMatchError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| JobMatchError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| JobMatchError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, JobMatchError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| JobMatchError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| JobMatchError::Storage(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, JobMatchError>
    where
        F: FnOnce(&Connection) -> Result<T, JobMatchError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| JobMatchError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a closure inside a transaction.
    ///
    /// Commits if the closure returns Ok; any Err rolls the whole
    /// transaction back, leaving previously committed batches untouched.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, JobMatchError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T, JobMatchError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| JobMatchError::Storage(format!("Database lock poisoned: {}", e)))?;
        let tx = conn
            .transaction()
            .map_err(|e| JobMatchError::Storage(format!("Failed to begin transaction: {}", e)))?;
        let out = f(&tx)?;
        tx.commit()
            .map_err(|e| JobMatchError::Storage(format!("Failed to commit transaction: {}", e)))?;
        Ok(out)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}
