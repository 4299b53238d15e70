//! Versioned schema migrations.
//!
//! Applied versions are recorded in `_migrations`; pending ones run in
//! order.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_job_batches_table",
        sql: include_str!("sql/001_create_job_batches.sql"),
    },
    Migration {
        version: 2,
        description: "create_jobs_table",
        sql: include_str!("sql/002_create_jobs.sql"),
    },
    Migration {
        version: 3,
        description: "create_receipts_table",
        sql: include_str!("sql/003_create_receipts.sql"),
    },
];

/// Brings the schema up to date. Each migration and its `_migrations` row
/// commit together, so an interrupted upgrade resumes at the failed step.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let applied: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        apply(conn, migration)?;
    }
    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    let failed = |reason: String| DatabaseError::Migration {
        version: migration.version,
        reason,
    };

    let tx = conn.unchecked_transaction()?;
    log::info!("Applying migration v{}: {}", migration.version, migration.description);
    tx.execute_batch(migration.sql)
        .map_err(|e| failed(e.to_string()))?;

    tx.execute(
        "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
        params![migration.version, migration.description],
    )?;
    tx.commit().map_err(|e| failed(e.to_string()))
}
