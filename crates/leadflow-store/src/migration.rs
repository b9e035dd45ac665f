//! Versioned schema migrations.
//!
//! Applied versions are recorded in `_migrations`; each migration runs in
//! its own transaction and is applied at most once.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// Append new migrations at the end; versions must strictly increase.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "conversations stored as JSON documents",
        sql: r#"
            CREATE TABLE conversations (
                id          TEXT PRIMARY KEY,
                state       TEXT NOT NULL,
                data        TEXT NOT NULL,
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL
            );
        "#,
    },
    Migration {
        version: 2,
        description: "recent-first conversation listing",
        sql: r#"
            CREATE INDEX idx_conversations_updated ON conversations(updated_at DESC);
        "#,
    },
];

/// Apply every pending migration.  Synchronous; run it on the blocking pool.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| failed(0, "create _migrations", e))?;

    let current = current_version(conn)?;
    let mut applied = 0usize;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        apply(conn, migration)?;
        applied += 1;
    }

    if applied == 0 {
        debug!(version = current, "schema up to date");
    } else {
        info!(from = current, applied, "schema migrated");
    }
    Ok(())
}

/// Latest applied version, `0` on a fresh database.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| failed(0, "read current version", e))
}

/// Highest version this build knows about.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    info!(
        version = migration.version,
        description = migration.description,
        "applying migration"
    );
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| failed(migration.version, "begin", e))?;
    tx.execute_batch(migration.sql)
        .map_err(|e| failed(migration.version, "execute", e))?;
    tx.execute(
        "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            migration.version,
            migration.description,
            chrono::Utc::now().timestamp()
        ],
    )
    .map_err(|e| failed(migration.version, "record", e))?;
    // Dropping an uncommitted transaction rolls it back.
    tx.commit()
        .map_err(|e| failed(migration.version, "commit", e))
}

fn failed(version: u32, step: &str, err: rusqlite::Error) -> StoreError {
    StoreError::Migration {
        version,
        message: format!("{step}: {err}"),
    }
}
