//! Token-scoped record store
//!
//! One logical table of `(service, client, key) -> value` rows. Every
//! operation is implicitly scoped to the fixed [`SERVICE`] partition. Values
//! are opaque bytes; the store never interprets them.
//!
//! Each `set` is a single upsert. No transaction spans multiple keys, so
//! callers that write several fields get per-field consistency only.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, params};

use crate::SERVICE;
use crate::db::{DbOptions, DbPool, initialize_pool, migrate_to_latest};
use crate::errors::StorageError;

/// Key/value table operations backing all engine state.
pub trait RecordStore: Send + Sync {
    /// Exact single-row lookup; `None` when the row is absent.
    fn get(&self, client: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Insert or replace the value for `(client, key)`.
    fn set(&self, client: &str, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// All clients' values for one key.
    fn list_by_key(&self, key: &str) -> Result<BTreeMap<String, Vec<u8>>, StorageError>;

    /// All keys stored for one client.
    fn list_by_client(&self, client: &str) -> Result<BTreeMap<String, Vec<u8>>, StorageError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed store. Each call checks a connection out of the pool.
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: DbPool,
    service: &'static str,
}

impl SqliteRecordStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub fn open(path: &Path, options: DbOptions) -> Result<Self, StorageError> {
        let pool = initialize_pool(path, options)?;
        Self::from_pool(pool)
    }

    /// Wrap an existing pool, migrating the schema first.
    pub fn from_pool(pool: DbPool) -> Result<Self, StorageError> {
        let mut conn = pool.get()?;
        migrate_to_latest(&mut conn)?;
        drop(conn);
        Ok(Self {
            pool,
            service: SERVICE,
        })
    }

    #[cfg(test)]
    fn with_service(pool: DbPool, service: &'static str) -> Result<Self, StorageError> {
        let store = Self::from_pool(pool)?;
        Ok(Self { service, ..store })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        Ok(self.pool.get()?)
    }
}

impl RecordStore for SqliteRecordStore {
    fn get(&self, client: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let value = self
            .conn()?
            .query_row(
                "SELECT value FROM services WHERE service = ?1 AND client = ?2 AND key = ?3",
                params![self.service, client, key],
                |row| row.get::<_, Option<Vec<u8>>>(0),
            )
            .optional()?
            .flatten();

        tracing::debug!(client = %crate::redact(client), key, found = value.is_some(), "get");
        Ok(value)
    }

    fn set(&self, client: &str, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.conn()?.execute(
            r#"
            INSERT INTO services (service, client, key, value)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (service, client, key) DO UPDATE SET value = excluded.value
            "#,
            params![self.service, client, key, value],
        )?;

        tracing::debug!(client = %crate::redact(client), key, len = value.len(), "set");
        Ok(())
    }

    fn list_by_key(&self, key: &str) -> Result<BTreeMap<String, Vec<u8>>, StorageError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT client, value FROM services WHERE service = ?1 AND key = ?2")?;
        let rows = stmt.query_map(params![self.service, key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<Vec<u8>>>(1)?.unwrap_or_default(),
            ))
        })?;

        let mut out = BTreeMap::new();
        for row in rows {
            let (client, value) = row?;
            out.insert(client, value);
        }
        Ok(out)
    }

    fn list_by_client(&self, client: &str) -> Result<BTreeMap<String, Vec<u8>>, StorageError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM services WHERE service = ?1 AND client = ?2")?;
        let rows = stmt.query_map(params![self.service, client], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<Vec<u8>>>(1)?.unwrap_or_default(),
            ))
        })?;

        let mut out = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            out.insert(key, value);
        }
        Ok(out)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local store for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    rows: RwLock<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, client: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let rows = self.rows.read().map_err(|_| StorageError::Poisoned)?;
        Ok(rows.get(&(client.to_string(), key.to_string())).cloned())
    }

    fn set(&self, client: &str, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut rows = self.rows.write().map_err(|_| StorageError::Poisoned)?;
        rows.insert((client.to_string(), key.to_string()), value.to_vec());
        Ok(())
    }

    fn list_by_key(&self, key: &str) -> Result<BTreeMap<String, Vec<u8>>, StorageError> {
        let rows = self.rows.read().map_err(|_| StorageError::Poisoned)?;
        Ok(rows
            .iter()
            .filter(|((_, k), _)| k == key)
            .map(|((client, _), value)| (client.clone(), value.clone()))
            .collect())
    }

    fn list_by_client(&self, client: &str) -> Result<BTreeMap<String, Vec<u8>>, StorageError> {
        let rows = self.rows.read().map_err(|_| StorageError::Poisoned)?;
        Ok(rows
            .iter()
            .filter(|((c, _), _)| c == client)
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect())
    }
}

impl<T: RecordStore + ?Sized> RecordStore for std::sync::Arc<T> {
    fn get(&self, client: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).get(client, key)
    }

    fn set(&self, client: &str, key: &str, value: &[u8]) -> Result<(), StorageError> {
        (**self).set(client, key, value)
    }

    fn list_by_key(&self, key: &str) -> Result<BTreeMap<String, Vec<u8>>, StorageError> {
        (**self).list_by_key(key)
    }

    fn list_by_client(&self, client: &str) -> Result<BTreeMap<String, Vec<u8>>, StorageError> {
        (**self).list_by_client(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sqlite_store(tmp: &tempfile::TempDir) -> SqliteRecordStore {
        SqliteRecordStore::open(&tmp.path().join("store.db"), DbOptions::default()).unwrap()
    }

    #[test]
    fn get_missing_row_is_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = sqlite_store(&tmp);
        assert_eq!(store.get("dev1", "data").unwrap(), None);
    }

    #[test]
    fn set_upserts_single_row_per_triple() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = sqlite_store(&tmp);

        store.set("dev1", "data", b"first").unwrap();
        store.set("dev1", "data", b"second").unwrap();

        assert_eq!(store.get("dev1", "data").unwrap(), Some(b"second".to_vec()));
        let count: i64 = store
            .pool()
            .get()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM services WHERE client = 'dev1' AND key = 'data'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn values_are_binary_safe() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = sqlite_store(&tmp);
        let payload: Vec<u8> = (0..=255u8).chain([0, 0, 0xff]).collect();

        store.set("dev1", "png", &payload).unwrap();
        assert_eq!(store.get("dev1", "png").unwrap(), Some(payload));

        store.set("dev1", "empty", b"").unwrap();
        assert_eq!(store.get("dev1", "empty").unwrap(), Some(Vec::new()));
    }

    #[test]
    fn listings_group_by_key_and_client() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = sqlite_store(&tmp);

        store.set("dev1", "enrolled", b"1").unwrap();
        store.set("dev2", "enrolled", b"0").unwrap();
        store.set("dev1", "data", b"payload").unwrap();

        let by_key = store.list_by_key("enrolled").unwrap();
        assert_eq!(
            by_key.into_iter().collect::<Vec<_>>(),
            vec![
                ("dev1".to_string(), b"1".to_vec()),
                ("dev2".to_string(), b"0".to_vec()),
            ]
        );

        let by_client = store.list_by_client("dev1").unwrap();
        assert_eq!(
            by_client.keys().cloned().collect::<Vec<_>>(),
            vec!["data".to_string(), "enrolled".to_string()]
        );
    }

    #[test]
    fn other_service_partitions_are_invisible() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ours = sqlite_store(&tmp);
        let theirs = SqliteRecordStore::with_service(ours.pool().clone(), "disp").unwrap();

        theirs.set("dev1", "data", b"foreign").unwrap();

        assert_eq!(ours.get("dev1", "data").unwrap(), None);
        assert!(ours.list_by_client("dev1").unwrap().is_empty());
        assert_eq!(theirs.get("dev1", "data").unwrap(), Some(b"foreign".to_vec()));
    }

    #[test]
    fn reopening_keeps_rows() {
        let tmp = tempfile::TempDir::new().unwrap();
        sqlite_store(&tmp).set("admin", "token", b"secret").unwrap();

        let reopened = sqlite_store(&tmp);
        assert_eq!(
            reopened.get("admin", "token").unwrap(),
            Some(b"secret".to_vec())
        );
    }

    #[test]
    fn memory_store_matches_sqlite_semantics() {
        let store = MemoryRecordStore::new();
        assert_eq!(store.get("dev1", "data").unwrap(), None);

        store.set("dev1", "data", b"a").unwrap();
        store.set("dev1", "data", b"b").unwrap();
        store.set("dev2", "data", b"c").unwrap();

        assert_eq!(store.get("dev1", "data").unwrap(), Some(b"b".to_vec()));
        assert_eq!(store.list_by_key("data").unwrap().len(), 2);
        assert_eq!(store.list_by_client("dev1").unwrap().len(), 1);
    }
}
