//! Crawl statistics
//!
//! The [`StatisticsTracker`] listens to every frontier disposition and keeps
//! running totals. Its [`ProgressSnapshot`] tells the checkpoint service
//! whether anything happened since the last checkpoint.

use crate::checkpoint::{Checkpoint, CheckpointError, Checkpointable};
use crate::frontier::{Disposition, DispositionListener};
use crate::uri::{status, CrawlUri};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Totals at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub succeeded: u64,
    pub failed: u64,
    pub disregarded: u64,
    pub deferred: u64,
    pub total_bytes: u64,
}

impl ProgressSnapshot {
    /// URIs fully accounted for
    pub fn finished(&self) -> u64 {
        self.succeeded + self.failed + self.disregarded
    }

    /// Returns true if no URI was disposed of between the two snapshots
    pub fn same_progress_as(&self, other: &ProgressSnapshot) -> bool {
        self == other
    }

    pub fn summary(&self) -> String {
        format!(
            "{} finished ({} succeeded, {} failed, {} disregarded), {} retried, {} bytes",
            self.finished(),
            self.succeeded,
            self.failed,
            self.disregarded,
            self.deferred,
            self.total_bytes
        )
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrackerState {
    progress: ProgressSnapshot,
    /// Dispositions by fetch status
    status_codes: BTreeMap<i32, u64>,
}

/// Tallies dispositions reported by the frontier
#[derive(Debug)]
pub struct StatisticsTracker {
    state: Mutex<TrackerState>,
    created: DateTime<Utc>,
}

impl Default for StatisticsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            created: Utc::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.lock().progress.clone()
    }

    /// Dispositions counted per fetch status
    pub fn status_codes(&self) -> BTreeMap<i32, u64> {
        self.lock().status_codes.clone()
    }

    /// Prints totals to stdout
    pub fn print_statistics(&self) {
        let state = self.lock();
        let progress = &state.progress;
        let elapsed = Utc::now() - self.created;

        println!("=== Crawl Statistics ===\n");

        println!("Overview:");
        println!("  URIs finished: {}", progress.finished());
        println!("  Succeeded: {}", progress.succeeded);
        println!("  Failed: {}", progress.failed);
        println!("  Disregarded: {}", progress.disregarded);
        println!("  Retries scheduled: {}", progress.deferred);
        println!("  Bytes: {}", progress.total_bytes);
        println!("  Elapsed: {}s", elapsed.num_seconds());
        println!();

        let total: u64 = state.status_codes.values().sum();
        if total > 0 {
            println!("Dispositions by Status:");
            let mut counts: Vec<_> = state.status_codes.iter().collect();
            counts.sort_by(|a, b| b.1.cmp(a.1));
            for (code, count) in counts {
                let percentage = (*count as f64 / total as f64) * 100.0;
                println!(
                    "  {} {}: {} ({:.1}%)",
                    code,
                    status::status_name(*code),
                    count,
                    percentage
                );
            }
            println!();
        }
    }
}

impl DispositionListener for StatisticsTracker {
    fn uri_disposed(&self, disposition: Disposition, uri: &CrawlUri) {
        let mut state = self.lock();
        *state.status_codes.entry(uri.fetch_status).or_default() += 1;

        let progress = &mut state.progress;
        match disposition {
            Disposition::Succeeded => {
                progress.succeeded += 1;
                progress.total_bytes += uri.content_size;
            }
            Disposition::Failed => progress.failed += 1,
            Disposition::Disregarded => progress.disregarded += 1,
            Disposition::DeferredForRetry => progress.deferred += 1,
        }
    }
}

#[async_trait]
impl Checkpointable for StatisticsTracker {
    fn checkpoint_name(&self) -> &str {
        "statistics"
    }

    async fn start_checkpoint(&self, _checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        Ok(())
    }

    async fn do_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let state = self.lock();
        checkpoint.save_json(self.checkpoint_name(), &*state)
    }

    async fn finish_checkpoint(&self, _checkpoint: &Checkpoint) {}

    async fn set_recovery_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let recovered: TrackerState = checkpoint.load_json(self.checkpoint_name())?;
        tracing::info!("Statistics recovered: {}", recovered.progress.summary());
        *self.lock() = recovered;
        Ok(())
    }
}
