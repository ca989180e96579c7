//! The worker loop
//!
//! A worker takes one URI at a time from the frontier, runs it through the
//! fetch chain, then through the disposition chain inside the frontier's
//! disposition bracket, and returns it. Two cancellation signals stop it:
//! `retire` is honored between URIs, `kill` also interrupts processing.

use super::pool::PoolShared;
use super::status::{Step, WorkerStatus};
use crate::pipeline::{ProcessError, WorkerContext};
use crate::uri::{status, CrawlUri};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Message sent from workers to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerSignal {
    /// A severe error occurred; the crawl should pause
    SeriousError { serial: u32, message: String },
}

/// Whether the loop continues after returning a URI
enum Flow {
    Continue,
    Exit,
}

pub(super) struct Worker {
    pub(super) serial: u32,
    pub(super) status: Arc<Mutex<WorkerStatus>>,
    pub(super) retire: CancellationToken,
    pub(super) kill: CancellationToken,
    pub(super) shared: Arc<PoolShared>,
}

impl Worker {
    fn set_step(&self, step: Step) {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_step(step);
    }

    fn with_status<R>(&self, f: impl FnOnce(&mut WorkerStatus) -> R) -> R {
        f(&mut self.status.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub(super) async fn run(self) {
        self.set_step(Step::AboutToGetUri);
        self.shared.mark_started();
        tracing::debug!("Worker #{} started", self.serial);

        loop {
            if self.retire.is_cancelled() {
                tracing::debug!("Worker #{} retiring", self.serial);
                break;
            }
            self.set_step(Step::AboutToGetUri);

            let uri = tokio::select! {
                biased;
                _ = self.kill.cancelled() => break,
                _ = self.retire.cancelled() => continue,
                next = self.shared.frontier.next() => match next {
                    Some(uri) => uri,
                    None => {
                        tracing::debug!("Worker #{} saw frontier termination", self.serial);
                        break;
                    }
                },
            };

            match self.process(uri).await {
                Flow::Continue => self.set_step(Step::Finishing),
                Flow::Exit => break,
            }
        }

        self.set_step(Step::Finished);
        self.shared.deregister(self.serial);
        tracing::debug!("Worker #{} finished", self.serial);
    }

    async fn process(&self, mut uri: CrawlUri) -> Flow {
        uri.fetch_attempts += 1;
        self.with_status(|s| s.begin_uri(uri.url.as_str()));
        self.shared.active.fetch_add(1, Ordering::SeqCst);

        let ctx = WorkerContext::new(self.serial, self.status.clone());
        let outcome = tokio::select! {
            biased;
            _ = self.kill.cancelled() => None,
            result = self.run_pipeline(&mut uri, &ctx) => Some(result),
        };

        let flow = match outcome {
            Some(Ok(())) => Flow::Continue,
            Some(Err(ProcessError::Recoverable(message))) => {
                self.set_step(Step::HandlingException);
                tracing::warn!(
                    "Worker #{} failed processing {}: {}",
                    self.serial,
                    uri.url,
                    message
                );
                uri.fetch_status = status::S_RUNTIME_EXCEPTION;
                uri.annotate(format!("err={}", message));
                Flow::Continue
            }
            Some(Err(ProcessError::Severe(message))) => {
                self.serious_error(&mut uri, &message);
                Flow::Continue
            }
            None if self.shared.shutdown.is_cancelled() => {
                tracing::debug!("Worker #{} interrupted holding {}", self.serial, uri.url);
                uri.fetch_status = status::S_RUNTIME_EXCEPTION;
                uri.annotate("err=interrupted");
                Flow::Exit
            }
            None => {
                tracing::warn!("Worker #{} killed holding {}", self.serial, uri.url);
                uri.fetch_status = status::S_PROCESSING_THREAD_KILLED;
                uri.annotate("err=killed");
                Flow::Exit
            }
        };

        self.shared.frontier.end_disposition(self.serial);
        self.set_step(Step::AboutToReturnUri);
        self.shared.frontier.finished(uri);
        self.with_status(|s| s.end_uri());
        self.shared.active.fetch_sub(1, Ordering::SeqCst);
        flow
    }

    async fn run_pipeline(
        &self,
        uri: &mut CrawlUri,
        ctx: &WorkerContext,
    ) -> Result<(), ProcessError> {
        let pipeline = &self.shared.pipeline;

        self.with_status(|s| s.begin_chain());
        AssertUnwindSafe(pipeline.fetch.process(uri, ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(recoverable_panic(payload)))?;

        self.shared.frontier.begin_disposition(self.serial).await;
        self.with_status(|s| s.begin_chain());
        let result = AssertUnwindSafe(pipeline.disposition.process(uri, ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(recoverable_panic(payload)));
        self.shared.frontier.end_disposition(self.serial);
        result
    }

    fn serious_error(&self, uri: &mut CrawlUri, message: &str) {
        self.set_step(Step::HandlingException);
        self.shared.reserve.release_one();

        let signal = WorkerSignal::SeriousError {
            serial: self.serial,
            message: message.to_string(),
        };
        if self.shared.signals.send(signal).is_err() {
            tracing::warn!("No controller listening for worker signals");
        }

        tracing::error!(
            "Serious error on worker #{} processing {}: {}\n{}",
            self.serial,
            uri.url,
            message,
            self.shared.report()
        );

        uri.annotate(format!("err={}", message));
        uri.annotate(format!("os{}", uri.fetch_status));
        uri.fetch_status = status::S_SERIOUS_ERROR;
    }
}

fn recoverable_panic(payload: Box<dyn Any + Send>) -> ProcessError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    };
    ProcessError::Recoverable(format!("panic: {}", message))
}
