use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::broadcast;

use crate::domain::ports::connection::ConnectionEvent;
use crate::domain::ports::store::{KeyValueStore, StoreError};

use super::{migrations, resolve_range};

/// SQLite-backed key-value store for durable single-node deployments.
///
/// Strings, sets, hashes and lists each get a table; a single mutexed
/// connection serializes all commands, which also linearizes the
/// read-modify-write operations (`getset`, `hincrby`).
pub struct SqliteStore {
    conn: Mutex<Connection>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl SqliteStore {
    /// Create a new `SQLite` store at the given path.
    ///
    /// Expands `~`, creates parent directories, opens the connection,
    /// sets WAL mode and pragmas, and initializes the schema.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::WriteFailed` if the database cannot be opened
    /// or initialized.
    pub fn new(path: &str) -> Result<Self, StoreError> {
        let expanded = shellexpand::tilde(path);
        let db_path = PathBuf::from(expanded.as_ref());

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        }

        let conn =
            Connection::open(&db_path).map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        Self::initialize(conn)
    }

    /// Create an in-memory database, useful for tests.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::WriteFailed` if initialization fails.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;

        migrations::initialize_schema(&conn).map_err(|e| StoreError::WriteFailed(e.to_string()))?;

        let (events, _) = broadcast::channel(16);
        Ok(Self {
            conn: Mutex::new(conn),
            events,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::WriteFailed("lock poisoned".into()))
    }
}

fn read_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::ReadFailed(e.to_string())
}

fn write_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::WriteFailed(e.to_string())
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(read_err)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(write_err)?;
        Ok(())
    }

    async fn setnx(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(write_err)?;
        Ok(changed > 0)
    }

    async fn getset(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        let previous: Option<String> = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(read_err)?;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(write_err)?;
        Ok(previous)
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        for statement in [
            "DELETE FROM kv WHERE key = ?1",
            "DELETE FROM set_members WHERE key = ?1",
            "DELETE FROM hash_fields WHERE key = ?1",
            "DELETE FROM list_items WHERE key = ?1",
        ] {
            conn.execute(statement, params![key]).map_err(write_err)?;
        }
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO set_members (key, member) VALUES (?1, ?2)",
            params![key, member],
        )
        .map_err(write_err)?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM set_members WHERE key = ?1 AND member = ?2",
            params![key, member],
        )
        .map_err(write_err)?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT member FROM set_members WHERE key = ?1 ORDER BY member")
            .map_err(read_err)?;
        let members = stmt
            .query_map(params![key], |row| row.get(0))
            .map_err(read_err)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(read_err)?;
        Ok(members)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO hash_fields (key, field, value) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key, field) DO UPDATE SET value = excluded.value",
            params![key, field, value],
        )
        .map_err(write_err)?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM hash_fields WHERE key = ?1 AND field = ?2",
            params![key, field],
            |row| row.get(0),
        )
        .optional()
        .map_err(read_err)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM hash_fields WHERE key = ?1 AND field = ?2",
            params![key, field],
        )
        .map_err(write_err)?;
        Ok(())
    }

    async fn hsetnx(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO hash_fields (key, field, value) VALUES (?1, ?2, ?3)",
                params![key, field, value],
            )
            .map_err(write_err)?;
        Ok(changed > 0)
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM hash_fields WHERE key = ?1 AND field = ?2",
                params![key, field],
                |row| row.get(0),
            )
            .map_err(read_err)?;
        Ok(count > 0)
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let current: Option<String> = conn
            .query_row(
                "SELECT value FROM hash_fields WHERE key = ?1 AND field = ?2",
                params![key, field],
                |row| row.get(0),
            )
            .optional()
            .map_err(read_err)?;
        let current: i64 = match current {
            None => 0,
            Some(text) => text
                .parse()
                .map_err(|_| StoreError::WrongType(key.into()))?,
        };
        let next = current + delta;
        conn.execute(
            "INSERT INTO hash_fields (key, field, value) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key, field) DO UPDATE SET value = excluded.value",
            params![key, field, next.to_string()],
        )
        .map_err(write_err)?;
        Ok(next)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO list_items (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(write_err)?;
        Ok(())
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT value FROM list_items WHERE key = ?1 ORDER BY id")
            .map_err(read_err)?;
        let items = stmt
            .query_map(params![key], |row| row.get(0))
            .map_err(read_err)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(read_err)?;
        Ok(resolve_range(items.len(), start, stop)
            .map(|(from, to)| items[from..=to].to_vec())
            .unwrap_or_default())
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id FROM list_items WHERE key = ?1 ORDER BY id")
            .map_err(read_err)?;
        let ids = stmt
            .query_map(params![key], |row| row.get(0))
            .map_err(read_err)?
            .collect::<Result<Vec<i64>, _>>()
            .map_err(read_err)?;
        drop(stmt);

        let keep = resolve_range(ids.len(), start, stop);
        for (index, id) in ids.iter().enumerate() {
            let kept = keep.is_some_and(|(from, to)| index >= from && index <= to);
            if !kept {
                conn.execute("DELETE FROM list_items WHERE id = ?1", params![id])
                    .map_err(write_err)?;
            }
        }
        Ok(())
    }

    fn connected(&self) -> bool {
        true
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}
