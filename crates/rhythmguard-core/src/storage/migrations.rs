//! Database schema migrations for rhythmguard.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Create the schema_version table if it doesn't exist.
fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            tracing::warn!(error = %e, "failed to read schema_version");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Migration v1: session ledger and the app state singleton.
///
/// The single active session is guarded by the conditional insert in
/// `Database`, not by an index.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            id                    TEXT PRIMARY KEY,
            kind                  TEXT NOT NULL,
            intention             TEXT,
            priority_ref          TEXT,
            started_at            TEXT NOT NULL,
            planned_minutes       INTEGER NOT NULL,
            ended_at              TEXT,
            forced                INTEGER NOT NULL DEFAULT 0,
            break_until           TEXT,
            long_break            INTEGER NOT NULL DEFAULT 0,
            distractions          INTEGER,
            completed_goal        INTEGER,
            went_down_rabbit_hole INTEGER,
            notes                 TEXT
        );

        CREATE TABLE IF NOT EXISTS app_state (
            id           INTEGER PRIMARY KEY CHECK (id = 1),
            break_until  TEXT,
            evening_mode INTEGER NOT NULL DEFAULT 0
        );

        INSERT OR IGNORE INTO app_state (id, break_until, evening_mode) VALUES (1, NULL, 0);

        CREATE INDEX IF NOT EXISTS idx_sessions_ended_at ON sessions(ended_at);
        CREATE INDEX IF NOT EXISTS idx_sessions_started_at ON sessions(started_at);",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()?;
    Ok(())
}
