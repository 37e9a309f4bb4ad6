//! Connection pooling and pragma configuration

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::DbPool;
use crate::errors::StorageError;

/// Pool sizing and lock-wait settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbOptions {
    pub pool_size: u32,
    pub busy_timeout: Duration,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            pool_size: 8,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Path that selects a process-private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

static MEMORY_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize a connection pool for the database at `db_path`.
///
/// Creates the parent directory and the database file if needed. Every
/// connection handed out by the pool has WAL journaling, `synchronous =
/// NORMAL`, foreign keys and the configured busy timeout applied.
///
/// [`MEMORY_PATH`] opens a named shared-cache in-memory database so every
/// pooled connection sees the same tables. Each pool gets its own name; the
/// database lives as long as one of its connections does.
pub fn initialize_pool(db_path: &Path, options: DbOptions) -> Result<DbPool, StorageError> {
    let busy_timeout = options.busy_timeout;

    if db_path.as_os_str() == MEMORY_PATH {
        let id = MEMORY_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
        let uri = format!("file:ddss-mem-{}-{id}?mode=memory&cache=shared", std::process::id());
        let manager = SqliteConnectionManager::file(&uri)
            .with_flags(OpenFlags::default() | OpenFlags::SQLITE_OPEN_URI)
            .with_init(move |conn| apply_pragmas(conn, busy_timeout));
        let pool = Pool::builder()
            .max_size(options.pool_size)
            .min_idle(Some(1))
            .build(manager)?;

        tracing::debug!(uri = %uri, pool_size = options.pool_size, "SQLite in-memory pool initialized");
        return Ok(pool);
    }

    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            StorageError::Migration(format!(
                "failed to create db directory {}: {e}",
                parent.display()
            ))
        })?;
    }

    let manager = SqliteConnectionManager::file(db_path)
        .with_init(move |conn| apply_pragmas(conn, busy_timeout));

    let pool = Pool::builder()
        .max_size(options.pool_size)
        .build(manager)?;

    tracing::debug!(
        path = %db_path.display(),
        pool_size = options.pool_size,
        "SQLite pool initialized"
    );

    Ok(pool)
}

/// Apply connection pragmas.
fn apply_pragmas(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    // journal_mode answers with the resulting mode, so it needs the checked variant.
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}
