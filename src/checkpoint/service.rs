use super::{find_available_checkpoints, Checkpoint, CheckpointError, Checkpointable};
use crate::config::CheckpointConfig;
use crate::controller::{CrawlController, CrawlState};
use crate::stats::{ProgressSnapshot, StatisticsTracker};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;
use tokio::task::JoinHandle;

/// Outcome of one checkpoint attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub name: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Default)]
struct ServiceState {
    next_number: u32,
    recovery: Option<Checkpoint>,
    last: Option<Checkpoint>,
    last_progress: Option<ProgressSnapshot>,
    last_attempt: Option<CheckpointRecord>,
}

/// Coordinates checkpoints across every registered component
///
/// A checkpoint pauses the crawl, runs the three checkpoint phases on each
/// component in registration order, stamps the directory as valid when
/// everything succeeded, and resumes the crawl if it was running before.
/// Failures are logged and recorded; the crawl always continues.
pub struct CheckpointService {
    checkpoints_dir: PathBuf,
    config: CheckpointConfig,
    controller: CrawlController,
    stats: Arc<StatisticsTracker>,
    components: RwLock<Vec<Arc<dyn Checkpointable>>>,
    state: Mutex<ServiceState>,
    running: tokio::sync::Mutex<()>,
}

impl CheckpointService {
    /// Creates the service with the frontier and `stats` registered
    pub fn new(
        config: CheckpointConfig,
        controller: CrawlController,
        stats: Arc<StatisticsTracker>,
    ) -> Self {
        let frontier: Arc<dyn Checkpointable> = controller.frontier().clone();
        let tracker: Arc<dyn Checkpointable> = stats.clone();
        Self {
            checkpoints_dir: PathBuf::from(&config.checkpoints_dir),
            config,
            controller,
            stats,
            components: RwLock::new(vec![frontier, tracker]),
            state: Mutex::new(ServiceState {
                next_number: 1,
                ..ServiceState::default()
            }),
            running: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers another component to include in checkpoints
    pub fn register(&self, component: Arc<dyn Checkpointable>) {
        tracing::debug!("Registered checkpoint component {}", component.checkpoint_name());
        self.components
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(component);
    }

    pub fn checkpoints_dir(&self) -> &Path {
        &self.checkpoints_dir
    }

    /// Sequence number the next attempt will use
    pub fn next_checkpoint_number(&self) -> u32 {
        self.lock().next_number
    }

    /// Name of the last successful checkpoint
    pub fn last_checkpoint(&self) -> Option<String> {
        self.lock().last.as_ref().map(|cp| cp.name().to_string())
    }

    pub fn last_attempt(&self) -> Option<CheckpointRecord> {
        self.lock().last_attempt.clone()
    }

    /// Name of the checkpoint this crawl was recovered from
    pub fn recovery_checkpoint(&self) -> Option<String> {
        self.lock().recovery.as_ref().map(|cp| cp.name().to_string())
    }

    /// Takes a checkpoint on operator request
    ///
    /// Waits for a checkpoint already in progress to finish first.
    ///
    /// # Returns
    ///
    /// * `Some(name)` - The checkpoint was written and stamped
    /// * `None` - Nothing to checkpoint, or the attempt failed (see
    ///   [`CheckpointService::last_attempt`])
    pub async fn request_checkpoint(&self) -> Option<String> {
        let _running = self.running.lock().await;
        self.run_checkpoint(false).await
    }

    /// Takes a timer-driven checkpoint
    ///
    /// Skipped when another checkpoint is running, or when the crawl is
    /// paused and nothing was disposed of since the last checkpoint.
    pub async fn auto_checkpoint(&self) -> Option<String> {
        let Ok(_running) = self.running.try_lock() else {
            tracing::info!("Checkpoint already in progress; skipping scheduled checkpoint");
            return None;
        };
        self.run_checkpoint(true).await
    }

    async fn run_checkpoint(&self, auto: bool) -> Option<String> {
        let state = self.controller.state();
        if !self.controller.has_started()
            || matches!(state, CrawlState::Stopping | CrawlState::Finished)
        {
            tracing::debug!("No checkpoint taken in state {}", state);
            return None;
        }

        if auto && self.controller.is_paused() {
            let progress = self.stats.progress();
            let unchanged = self
                .lock()
                .last_progress
                .as_ref()
                .is_some_and(|last| last.same_progress_as(&progress));
            if unchanged {
                tracing::info!("Paused with no progress since last checkpoint; skipping");
                return None;
            }
        }

        let (sequence, recovered) = {
            let mut service = self.lock();
            let sequence = service.next_number;
            service.next_number += 1;
            (sequence, service.recovery.is_some())
        };

        // pause unless already paused or pausing on someone else's request
        let resume_after = !matches!(state, CrawlState::Paused | CrawlState::Pausing);
        if resume_after {
            self.controller.request_crawl_pause();
        }

        let timeout = self.controller.pause_timeout();
        let result = if self
            .controller
            .wait_for_state(CrawlState::Paused, timeout)
            .await
        {
            match Checkpoint::generate(&self.checkpoints_dir, sequence, recovered) {
                Ok(checkpoint) => {
                    let written = self.write_checkpoint(&checkpoint).await;
                    written.map(|progress| (checkpoint, progress))
                }
                Err(e) => Err(e),
            }
        } else {
            Err(CheckpointError::Quiescence(timeout.as_secs()))
        };

        if resume_after {
            self.controller.request_crawl_resume();
        }

        match result {
            Ok((checkpoint, progress)) => {
                let name = checkpoint.name().to_string();
                let previous = {
                    let mut service = self.lock();
                    service.last_progress = Some(progress);
                    service.last_attempt = Some(CheckpointRecord {
                        name: name.clone(),
                        success: true,
                        error: None,
                    });
                    service.last.replace(checkpoint)
                };
                if self.config.forget_all_but_latest {
                    if let Some(previous) = previous {
                        match previous.delete() {
                            Ok(()) => {
                                tracing::info!("Removed previous checkpoint {}", previous.name())
                            }
                            Err(e) => tracing::warn!(
                                "Could not remove previous checkpoint {}: {}",
                                previous.name(),
                                e
                            ),
                        }
                    }
                }
                Some(name)
            }
            Err(e) => {
                let name = format!("{}cp{:05}", if recovered { "r" } else { "" }, sequence);
                tracing::error!("Checkpoint {} failed: {}", name, e);
                self.lock().last_attempt = Some(CheckpointRecord {
                    name,
                    success: false,
                    error: Some(e.to_string()),
                });
                None
            }
        }
    }

    /// Runs the three phases on every component, then stamps the checkpoint
    ///
    /// Returns the progress recorded in the stamp.
    async fn write_checkpoint(
        &self,
        checkpoint: &Checkpoint,
    ) -> Result<ProgressSnapshot, CheckpointError> {
        let started = Instant::now();
        let components = self
            .components
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        tracing::info!(
            "Starting checkpoint {} of {} component(s)",
            checkpoint.name(),
            components.len()
        );

        let outcome = async {
            for component in &components {
                component
                    .start_checkpoint(checkpoint)
                    .await
                    .map_err(|e| component_error(component.as_ref(), e))?;
            }
            for component in &components {
                component
                    .do_checkpoint(checkpoint)
                    .await
                    .map_err(|e| component_error(component.as_ref(), e))?;
            }
            Ok::<(), CheckpointError>(())
        }
        .await;

        for component in &components {
            component.finish_checkpoint(checkpoint).await;
        }
        outcome?;

        let progress = self.stats.progress();
        checkpoint.write_validity_stamp(&progress.summary())?;
        tracing::info!(
            "Finished checkpoint {} in {:.2}s",
            checkpoint.name(),
            started.elapsed().as_secs_f64()
        );
        Ok(progress)
    }

    /// Starts the timer for periodic checkpoints
    ///
    /// Returns `None` when no interval is configured. The task ends once the
    /// crawl has finished.
    pub fn start_auto_checkpoints(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.config.interval_minutes == 0 {
            return None;
        }
        let period = std::time::Duration::from_secs(self.config.interval_minutes * 60);
        tracing::info!("Checkpointing every {} minute(s)", self.config.interval_minutes);

        let service = self.clone();
        Some(tokio::spawn(async move {
            let mut ticks =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            let mut state = service.controller.subscribe();
            let finished = async move {
                // the watch guard must not outlive this block
                let _ = state.wait_for(|s| *s == CrawlState::Finished).await;
            };
            tokio::pin!(finished);
            loop {
                tokio::select! {
                    _ = &mut finished => break,
                    _ = ticks.tick() => {
                        service.auto_checkpoint().await;
                    }
                }
            }
            tracing::debug!("Checkpoint timer stopped");
        }))
    }

    /// Lists valid checkpoints in the checkpoints directory, newest first
    pub fn find_available_checkpoints(&self) -> Vec<Checkpoint> {
        match find_available_checkpoints(&self.checkpoints_dir) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(
                    "Could not list checkpoints in {}: {}",
                    self.checkpoints_dir.display(),
                    e
                );
                Vec::new()
            }
        }
    }

    /// Returns true if a recovery checkpoint could still be chosen
    pub fn has_available_checkpoints(&self) -> bool {
        if self.controller.has_started() || self.lock().recovery.is_some() {
            return false;
        }
        !self.find_available_checkpoints().is_empty()
    }

    /// Restores every component from checkpoint `name`
    ///
    /// Must be called before the crawl starts. Later checkpoints continue the
    /// recovered sequence and carry the recovery marker.
    pub async fn set_recovery_checkpoint_by_name(&self, name: &str) -> Result<(), CheckpointError> {
        if self.controller.has_started() {
            return Err(CheckpointError::AfterLaunch);
        }
        let checkpoint = Checkpoint::open(&self.checkpoints_dir, name)?;
        if !checkpoint.has_validity_stamp() {
            tracing::warn!(
                "Checkpoint {} has no validity stamp and may be incomplete",
                checkpoint.name()
            );
        }

        let components = self
            .components
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for component in &components {
            component
                .set_recovery_checkpoint(&checkpoint)
                .await
                .map_err(|e| component_error(component.as_ref(), e))?;
        }

        let mut service = self.lock();
        service.next_number = checkpoint.sequence() + 1;
        service.last_progress = Some(self.stats.progress());
        tracing::info!(
            "Recovered from checkpoint {}; next checkpoint is number {}",
            checkpoint.name(),
            service.next_number
        );
        service.recovery = Some(checkpoint);
        Ok(())
    }
}

fn component_error(component: &dyn Checkpointable, error: CheckpointError) -> CheckpointError {
    match error {
        CheckpointError::Component { .. } => error,
        other => CheckpointError::Component {
            component: component.checkpoint_name().to_string(),
            message: other.to_string(),
        },
    }
}
