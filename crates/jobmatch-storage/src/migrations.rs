//! Database schema migrations.
//!
//! Applies the postings table plus the schema_migrations tracking table.

use rusqlite::Connection;
use tracing::info;

use jobmatch_core::error::JobMatchError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), JobMatchError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| JobMatchError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| JobMatchError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: postings table.
///
/// The embedding is a raw little-endian f32 blob with its dimension in a
/// separate column; the CHECK keeps the pair consistent. Partial indexes
/// back the two scans the pipeline and index build rely on.
fn apply_v1(conn: &Connection) -> Result<(), JobMatchError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS postings (
            id                          INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id                      TEXT UNIQUE,
            company_name                TEXT,
            title                       TEXT,
            description                 TEXT,
            location                    TEXT,
            skills_desc                 TEXT,
            work_type                   TEXT,
            formatted_work_type         TEXT,
            formatted_experience_level  TEXT,
            remote_allowed              TEXT,
            pay_period                  TEXT,
            currency                    TEXT,
            compensation_type           TEXT,
            min_salary                  REAL,
            med_salary                  REAL,
            max_salary                  REAL,
            normalized_salary           REAL,
            views                       INTEGER,
            applies                     INTEGER,
            job_posting_url             TEXT,
            application_url             TEXT,
            listed_time                 TEXT,
            expiry                      TEXT,
            zip_code                    TEXT,
            embedding                   BLOB,
            embedding_dim               INTEGER,
            created_at                  INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            CHECK ((embedding IS NULL) = (embedding_dim IS NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_postings_unembedded
            ON postings (id)
            WHERE embedding IS NULL;

        CREATE INDEX IF NOT EXISTS idx_postings_embedded
            ON postings (id)
            WHERE embedding IS NOT NULL;

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| JobMatchError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}
