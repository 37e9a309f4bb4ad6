//! Schema versioning and migrations
//!
//! Forward-only. The applied version lives in `PRAGMA user_version`; every
//! migration runs in its own transaction together with the version bump.

use rusqlite::Connection;

use crate::errors::StorageError;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// V1: the shared `(service, client, key) -> value` table.
const MIGRATION_V1: &str = r#"
CREATE TABLE IF NOT EXISTS services (
    service TEXT NOT NULL,
    client  TEXT NOT NULL,
    key     TEXT NOT NULL,
    value   BLOB,
    PRIMARY KEY (service, client, key)
);

CREATE INDEX IF NOT EXISTS idx_services_key ON services (service, key);
"#;

/// Apply all pending migrations to bring the database to [`SCHEMA_VERSION`].
pub fn migrate_to_latest(conn: &mut Connection) -> Result<(), StorageError> {
    let current = get_schema_version(conn)?;

    if current > SCHEMA_VERSION {
        return Err(StorageError::Migration(format!(
            "database schema version {current} is newer than supported version {SCHEMA_VERSION}"
        )));
    }

    if current < 1 {
        apply(conn, 1, MIGRATION_V1)?;
    }

    Ok(())
}

/// Get current schema version
pub fn get_schema_version(conn: &Connection) -> Result<i32, StorageError> {
    let version = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

fn apply(conn: &mut Connection, version: i32, sql: &str) -> Result<(), StorageError> {
    let tx = conn.transaction()?;
    tx.execute_batch(sql)
        .map_err(|e| StorageError::Migration(format!("migration v{version} failed: {e}")))?;
    tx.pragma_update(None, "user_version", version)?;
    tx.commit()?;

    tracing::info!(version, "Applied schema migration");
    Ok(())
}
