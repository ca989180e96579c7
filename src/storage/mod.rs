//! Storage module for frontier queues
//!
//! This module handles persistence of the frontier's pending URIs and its
//! already-seen set, including:
//! - SQLite database initialization and schema management
//! - An in-memory backend for small crawls and tests
//! - Snapshot and restore of queue contents for checkpoints

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemoryQueueStore;
pub use sqlite::SqliteQueueStore;
pub use traits::{QueueStore, StorageError, StorageResult};

use std::path::Path;

/// Opens the queue store for a frontier
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file, or `None` for in-memory queues
///
/// # Returns
///
/// * `Ok(Box<dyn QueueStore>)` - Successfully opened store
/// * `Err(StorageError)` - Failed to open the database
pub fn open_queue_store(path: Option<&Path>) -> StorageResult<Box<dyn QueueStore>> {
    match path {
        Some(path) => {
            tracing::info!("Opening queue store at {}", path.display());
            Ok(Box::new(SqliteQueueStore::new(path)?))
        }
        None => {
            tracing::debug!("Using in-memory queue store");
            Ok(Box::new(MemoryQueueStore::new()))
        }
    }
}
