//! Checkpointing
//!
//! A checkpoint is a directory under the configured checkpoints directory,
//! named `cp<5-digit sequence>-<14-digit timestamp>` (`rcp...` once the crawl
//! was recovered from an earlier checkpoint). Each registered component writes
//! its own files into it; a `valid` stamp is written last, only when every
//! component succeeded.

mod checkpoint;
mod service;
mod traits;

pub use checkpoint::{find_available_checkpoints, Checkpoint, VALIDITY_STAMP};
pub use service::{CheckpointRecord, CheckpointService};
pub use traits::Checkpointable;

use crate::storage::StorageError;
use thiserror::Error;

/// Errors raised while writing or recovering a checkpoint
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid checkpoint name: {0}")]
    InvalidName(String),

    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    #[error("Recovery checkpoint must be set before the crawl starts")]
    AfterLaunch,

    #[error("Crawl did not pause within {0}s")]
    Quiescence(u64),

    #[error("Component {component} failed: {message}")]
    Component { component: String, message: String },
}
