//! Processing pipeline seam
//!
//! The engine does not fetch or parse anything itself. Each worker runs a URI
//! through two processor chains supplied by the embedding program: the fetch
//! chain (fetching, link extraction) and the disposition chain (the final
//! stage that mutates shared state, such as scheduling discovered links).
//! Only the disposition chain runs inside the frontier's disposition bracket,
//! so a checkpoint never observes half of it.

use crate::uri::CrawlUri;
use crate::worker::WorkerStatus;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Failure raised by a processor
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The URI failed; the worker keeps running
    #[error("{0}")]
    Recoverable(String),

    /// A resource-exhaustion style failure; the crawl is paused
    #[error("serious error: {0}")]
    Severe(String),
}

/// A chain of processors applied to one URI
#[async_trait]
pub trait ProcessorChain: Send + Sync {
    /// Processes `uri` in place, recording outcome on it
    async fn process(&self, uri: &mut CrawlUri, ctx: &WorkerContext) -> Result<(), ProcessError>;
}

/// Per-worker handle passed to processors
///
/// Processors report which processor is running through
/// [`WorkerContext::at_processor`] so that worker reports stay accurate.
#[derive(Clone)]
pub struct WorkerContext {
    serial: u32,
    status: Arc<Mutex<WorkerStatus>>,
}

impl WorkerContext {
    pub(crate) fn new(serial: u32, status: Arc<Mutex<WorkerStatus>>) -> Self {
        Self { serial, status }
    }

    /// Serial number of the worker running this chain
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Records that processor `name` is about to run
    pub fn at_processor(&self, name: &str) {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .begin_processor(name);
    }
}

/// The two chains every URI passes through
#[derive(Clone)]
pub struct Pipeline {
    pub fetch: Arc<dyn ProcessorChain>,
    pub disposition: Arc<dyn ProcessorChain>,
}

impl Pipeline {
    pub fn new(fetch: Arc<dyn ProcessorChain>, disposition: Arc<dyn ProcessorChain>) -> Self {
        Self { fetch, disposition }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(Arc::new(NoopChain), Arc::new(NoopChain))
    }
}

/// Chain that leaves the URI untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopChain;

#[async_trait]
impl ProcessorChain for NoopChain {
    async fn process(&self, _uri: &mut CrawlUri, _ctx: &WorkerContext) -> Result<(), ProcessError> {
        Ok(())
    }
}
