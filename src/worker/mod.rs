//! Crawl workers
//!
//! This module contains:
//! - The worker loop that moves URIs from the frontier through the pipeline
//! - The pool that creates, resizes, retires and kills workers
//! - Per-worker status used for reports
//! - The emergency memory reserve released on severe errors

mod pool;
mod reserve;
mod status;
mod toe;

pub use pool::WorkerPool;
pub use reserve::MemoryReserve;
pub use status::{Step, WorkerStatus};
pub use toe::WorkerSignal;
