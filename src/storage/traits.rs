//! Storage traits and error types
//!
//! This module defines the trait interface for frontier queue backends and
//! associated error types.

use crate::uri::CrawlUri;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence substrate for frontier group queues
///
/// A store holds one ordered queue of pending URIs per politeness key plus
/// the set of canonical URIs already seen. Within a queue, URIs are returned
/// by ascending precedence and, within equal precedence, in insertion order.
///
/// Implementations are driven from behind the frontier's lock, so methods
/// take `&mut self` and need not be internally synchronized.
pub trait QueueStore: Send {
    /// Appends a URI to the queue for `key` at the given precedence tier
    fn push(&mut self, key: &str, precedence: u8, uri: &CrawlUri) -> StorageResult<()>;

    /// Removes and returns the first URI of the queue for `key`
    fn pop(&mut self, key: &str) -> StorageResult<Option<CrawlUri>>;

    /// Number of URIs pending for `key`
    fn len(&self, key: &str) -> StorageResult<usize>;

    /// Every non-empty queue with its pending count
    fn queues(&self) -> StorageResult<Vec<(String, usize)>>;

    /// Records a canonical URI as seen
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The URI had not been seen before
    /// * `Ok(false)` - The URI was already seen
    fn mark_seen(&mut self, canonical: &str) -> StorageResult<bool>;

    /// Writes a consistent snapshot of all queues and the seen set to `path`
    fn checkpoint(&mut self, path: &Path) -> StorageResult<()>;

    /// Replaces all contents with the snapshot stored at `path`
    fn recover(&mut self, path: &Path) -> StorageResult<()>;

    /// File name used for this store's snapshot inside a checkpoint
    fn snapshot_file_name(&self) -> &'static str;
}
