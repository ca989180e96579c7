//! SQLite queue store
//!
//! This module provides a SQLite-based implementation of the QueueStore trait.
//! Snapshots are written with `VACUUM INTO`, which produces a compact,
//! self-consistent copy of the database.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{QueueStore, StorageError, StorageResult};
use crate::uri::CrawlUri;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// SQLite queue store backend
pub struct SqliteQueueStore {
    conn: Connection,
}

impl SqliteQueueStore {
    /// Creates a new SqliteQueueStore
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteQueueStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates a store backed by an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

impl QueueStore for SqliteQueueStore {
    fn push(&mut self, key: &str, precedence: u8, uri: &CrawlUri) -> StorageResult<()> {
        let data = serde_json::to_string(uri)?;
        self.conn.execute(
            "INSERT INTO pending (class_key, precedence, data) VALUES (?1, ?2, ?3)",
            params![key, precedence, data],
        )?;
        Ok(())
    }

    fn pop(&mut self, key: &str) -> StorageResult<Option<CrawlUri>> {
        let head: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT seq, data FROM pending WHERE class_key = ?1
                 ORDER BY precedence, seq LIMIT 1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((seq, data)) = head else {
            return Ok(None);
        };

        self.conn
            .execute("DELETE FROM pending WHERE seq = ?1", params![seq])?;

        Ok(Some(serde_json::from_str(&data)?))
    }

    fn len(&self, key: &str) -> StorageResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pending WHERE class_key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn queues(&self) -> StorageResult<Vec<(String, usize)>> {
        let mut stmt = self.conn.prepare(
            "SELECT class_key, COUNT(*) FROM pending GROUP BY class_key ORDER BY MIN(seq)",
        )?;

        let queues = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(queues)
    }

    fn mark_seen(&mut self, canonical: &str) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO seen (canonical) VALUES (?1)",
            params![canonical],
        )?;
        Ok(inserted == 1)
    }

    fn checkpoint(&mut self, path: &Path) -> StorageResult<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let target = path.to_string_lossy().into_owned();
        self.conn.execute("VACUUM INTO ?1", params![target])?;
        Ok(())
    }

    fn recover(&mut self, path: &Path) -> StorageResult<()> {
        if !path.exists() {
            return Err(StorageError::SnapshotNotFound(path.display().to_string()));
        }

        let source = path.to_string_lossy().into_owned();
        self.conn
            .execute("ATTACH DATABASE ?1 AS snapshot", params![source])?;

        let copied = self.conn.execute_batch(
            "
            BEGIN;
            DELETE FROM main.pending;
            DELETE FROM main.seen;
            INSERT INTO main.pending (seq, class_key, precedence, data)
                SELECT seq, class_key, precedence, data FROM snapshot.pending;
            INSERT INTO main.seen (canonical) SELECT canonical FROM snapshot.seen;
            COMMIT;
        ",
        );

        if copied.is_err() {
            // leave the connection usable even if the copy failed half-way
            let _ = self.conn.execute_batch("ROLLBACK;");
        }
        self.conn.execute_batch("DETACH DATABASE snapshot;")?;

        copied.map_err(|e| StorageError::Database(format!("Recovery failed: {}", e)))
    }

    fn snapshot_file_name(&self) -> &'static str {
        "queues.db"
    }
}
