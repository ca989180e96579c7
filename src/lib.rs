//! Sumi-Engine: a continuous crawl scheduling engine
//!
//! This crate implements the scheduling core of a long-running web crawler:
//! a politeness-aware URI frontier, a pool of crawl workers, a crawl
//! controller state machine, and a checkpoint service able to snapshot all
//! scheduling state so a crawl can be paused and resumed without data loss.
//!
//! Fetching and content processing are supplied by the embedding program
//! through [`pipeline::ProcessorChain`] implementations.

pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod frontier;
pub mod pipeline;
pub mod stats;
pub mod storage;
pub mod uri;
pub mod worker;

use thiserror::Error;

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use checkpoint::{Checkpoint, CheckpointService, Checkpointable};
pub use config::Config;
pub use controller::{CrawlController, CrawlState, CrawlStatus};
pub use frontier::{Disposition, DispositionListener, Frontier, FrontierState};
pub use pipeline::{Pipeline, ProcessError, ProcessorChain, WorkerContext};
pub use stats::StatisticsTracker;
pub use uri::{CrawlUri, SchedulingDirective};
pub use worker::WorkerPool;
