//! Crawl controller
//!
//! The controller owns the worker pool and a handle to the frontier. It
//! follows the frontier's reached state, reacts to worker signals, and
//! exposes the operator controls: start, pause, resume and stop.
//!
//! Control calls never fail. A request that does not apply in the current
//! state is a no-op.

mod state;

pub use state::{CrawlState, CrawlStatus};

use crate::config::ControllerConfig;
use crate::frontier::{Frontier, FrontierState};
use crate::pipeline::Pipeline;
use crate::worker::{MemoryReserve, WorkerPool, WorkerSignal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Receives controller state changes
pub trait CrawlStateListener: Send + Sync {
    fn crawl_state_changed(&self, previous: CrawlState, state: CrawlState);
}

struct Core {
    state: CrawlState,
    exit: CrawlStatus,
}

struct ControllerShared {
    config: ControllerConfig,
    frontier: Arc<Frontier>,
    pool: WorkerPool,
    core: Mutex<Core>,
    state_tx: watch::Sender<CrawlState>,
    has_started: AtomicBool,
    stop_complete: AtomicBool,
    listeners: RwLock<Vec<Arc<dyn CrawlStateListener>>>,
    signals: Mutex<Option<mpsc::UnboundedReceiver<WorkerSignal>>>,
    shutdown: CancellationToken,
}

/// Top-level crawl state machine
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct CrawlController {
    shared: Arc<ControllerShared>,
}

impl CrawlController {
    /// Creates a controller in the NASCENT state
    ///
    /// # Arguments
    ///
    /// * `config` - Controller settings (pool size, pause and stop policy)
    /// * `frontier` - The frontier workers draw from
    /// * `pipeline` - Processor chains run by every worker
    pub fn new(config: ControllerConfig, frontier: Arc<Frontier>, pipeline: Pipeline) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let reserve = MemoryReserve::new(config.reserve_blocks, config.reserve_block_bytes);
        let pool = WorkerPool::new(frontier.clone(), pipeline, signal_tx, reserve);
        let (state_tx, _) = watch::channel(CrawlState::Nascent);

        Self {
            shared: Arc::new(ControllerShared {
                config,
                frontier,
                pool,
                core: Mutex::new(Core {
                    state: CrawlState::Nascent,
                    exit: CrawlStatus::Created,
                }),
                state_tx,
                has_started: AtomicBool::new(false),
                stop_complete: AtomicBool::new(false),
                listeners: RwLock::new(Vec::new()),
                signals: Mutex::new(Some(signal_rx)),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    fn core(&self) -> MutexGuard<'_, Core> {
        self.shared.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_listener(&self, listener: Arc<dyn CrawlStateListener>) {
        self.shared
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Moves to `to` if the current state is one of `from` (any state when
    /// `from` is empty)
    ///
    /// A transition to the current state changes nothing and notifies no
    /// one. Returns true if the state changed.
    fn transition(&self, from: &[CrawlState], to: CrawlState, exit: Option<CrawlStatus>) -> bool {
        self.transition_with(from, to, exit, || {})
    }

    /// Like [`CrawlController::transition`], running `apply` under the state
    /// lock when the transition happens
    ///
    /// Frontier requests that go with a state change are made here so that
    /// two racing control calls leave the frontier matching the final state.
    fn transition_with(
        &self,
        from: &[CrawlState],
        to: CrawlState,
        exit: Option<CrawlStatus>,
        apply: impl FnOnce(),
    ) -> bool {
        let previous = {
            let mut core = self.core();
            let previous = core.state;
            if previous == to || (!from.is_empty() && !from.contains(&previous)) {
                return false;
            }
            core.state = to;
            if let Some(exit) = exit {
                core.exit = exit;
            }
            apply();
            self.shared.state_tx.send_replace(to);
            previous
        };

        tracing::info!("Crawl state {} -> {}", previous, to);
        let listeners = self
            .shared
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener.crawl_state_changed(previous, to);
        }
        true
    }

    /// Starts the crawl
    ///
    /// Moves to PREPARING, starts the configured number of workers, waits
    /// for all of them, then either pauses (when configured to pause at
    /// start) or lets the frontier hand out work.
    pub async fn request_crawl_start(&self) {
        if !self.transition(
            &[CrawlState::Nascent],
            CrawlState::Preparing,
            Some(CrawlStatus::FinishedAbnormal),
        ) {
            tracing::debug!("Ignoring start request in state {}", self.state());
            return;
        }
        self.shared.has_started.store(true, Ordering::SeqCst);

        let signals = self
            .shared
            .signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let reached = self.shared.frontier.subscribe();
        tokio::spawn(self.clone().supervise(reached, signals));

        self.shared.pool.set_size(self.shared.config.max_workers);
        self.shared.pool.wait_for_all().await;
        tracing::info!("{} worker(s) ready", self.shared.pool.count());

        if self.shared.config.pause_at_start {
            self.request_crawl_pause();
            return;
        }
        // a pause or stop requested while preparing wins
        let core = self.core();
        if core.state == CrawlState::Preparing {
            self.shared.frontier.unpause();
        } else {
            tracing::debug!("Not releasing work; crawl is {} after preparing", core.state);
        }
    }

    /// Follows frontier state and worker signals until the crawl is over
    async fn supervise(
        self,
        mut reached: watch::Receiver<FrontierState>,
        mut signals: Option<mpsc::UnboundedReceiver<WorkerSignal>>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = self.shared.shutdown.cancelled() => break,
                changed = reached.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *reached.borrow_and_update();
                    self.on_frontier_state(state).await;
                }
                Some(signal) = recv_signal(&mut signals) => self.on_worker_signal(signal),
            }
        }
        tracing::debug!("Controller supervisor exiting");
    }

    async fn on_frontier_state(&self, reached: FrontierState) {
        let state = self.state();
        tracing::debug!("Frontier reported {} while {}", reached, state);

        match reached {
            FrontierState::Run => {
                self.transition(
                    &[CrawlState::Preparing, CrawlState::Empty],
                    CrawlState::Running,
                    Some(CrawlStatus::Running),
                );
            }
            FrontierState::Empty => {
                if !matches!(
                    state,
                    CrawlState::Preparing | CrawlState::Running | CrawlState::Empty
                ) {
                    return;
                }
                if self.shared.config.run_while_empty {
                    self.transition(&[], CrawlState::Empty, Some(CrawlStatus::Running));
                } else if self.shared.config.pause_at_finish {
                    tracing::info!("Frontier drained; pausing");
                    self.request_crawl_pause();
                } else {
                    tracing::info!("Frontier drained; stopping");
                    self.begin_crawl_stop(CrawlStatus::Finished);
                }
            }
            FrontierState::Pause | FrontierState::Hold => match state {
                CrawlState::Pausing => self.complete_pause(),
                CrawlState::Running | CrawlState::Empty => {
                    tracing::warn!("Frontier paused on its own; pausing crawl");
                    self.request_crawl_pause();
                }
                _ => {}
            },
            FrontierState::Finish => self.complete_stop().await,
        }
    }

    fn on_worker_signal(&self, signal: WorkerSignal) {
        match signal {
            WorkerSignal::SeriousError { serial, message } => {
                tracing::error!(
                    "Pausing crawl after serious error on worker #{}: {}",
                    serial,
                    message
                );
                self.request_crawl_pause();
            }
        }
    }

    /// Asks the crawl to pause
    ///
    /// The crawl is PAUSING until the frontier reports it has no URI in
    /// progress, then PAUSED.
    pub fn request_crawl_pause(&self) {
        if !self.transition_with(
            &[CrawlState::Preparing, CrawlState::Running, CrawlState::Empty],
            CrawlState::Pausing,
            Some(CrawlStatus::WaitingForPause),
            || self.shared.frontier.pause(),
        ) {
            tracing::debug!("Ignoring pause request in state {}", self.state());
            return;
        }
        if self.shared.frontier.reached_state() == FrontierState::Pause {
            self.complete_pause();
        }
    }

    fn complete_pause(&self) {
        if self.transition(
            &[CrawlState::Pausing],
            CrawlState::Paused,
            Some(CrawlStatus::Paused),
        ) {
            tracing::info!("Crawl paused: {}", self.shared.frontier.one_line_report());
        }
    }

    /// Resumes a pausing or paused crawl
    pub fn request_crawl_resume(&self) {
        if !self.transition_with(
            &[CrawlState::Pausing, CrawlState::Paused],
            CrawlState::Running,
            Some(CrawlStatus::Running),
            || self.shared.frontier.unpause(),
        ) {
            tracing::debug!("Ignoring resume request in state {}", self.state());
            return;
        }
        self.shared.pool.replenish_reserve();
    }

    /// Stops the crawl
    ///
    /// A crawl that never started finishes immediately. A second request
    /// while stopping interrupts every worker.
    pub fn request_crawl_stop(&self) {
        match self.state() {
            CrawlState::Nascent => {
                if self.transition(
                    &[CrawlState::Nascent],
                    CrawlState::Finished,
                    Some(CrawlStatus::Aborted),
                ) {
                    self.shared.stop_complete.store(true, Ordering::SeqCst);
                    self.shared.shutdown.cancel();
                }
            }
            CrawlState::Stopping => {
                tracing::warn!("Stop requested again; interrupting workers");
                self.shared.pool.cleanup();
            }
            CrawlState::Finished => {
                tracing::debug!("Ignoring stop request; crawl already finished");
            }
            _ => self.begin_crawl_stop(CrawlStatus::Aborted),
        }
    }

    fn begin_crawl_stop(&self, exit: CrawlStatus) {
        self.transition_with(
            &[
                CrawlState::Preparing,
                CrawlState::Running,
                CrawlState::Empty,
                CrawlState::Pausing,
                CrawlState::Paused,
            ],
            CrawlState::Stopping,
            Some(exit),
            || self.shared.frontier.terminate(),
        );
    }

    async fn complete_stop(&self) {
        if self.state() == CrawlState::Finished {
            return;
        }
        // a frontier terminated by someone else still ends the crawl
        self.begin_crawl_stop(CrawlStatus::FinishedAbnormal);

        self.shared.pool.wait_for_exit().await;
        self.shared.pool.cleanup();
        if self.transition(&[CrawlState::Stopping], CrawlState::Finished, None) {
            self.shared.stop_complete.store(true, Ordering::SeqCst);
            tracing::info!(
                "Crawl finished ({}): {}",
                self.exit_status(),
                self.shared.frontier.one_line_report()
            );
        }
        self.shared.shutdown.cancel();
    }

    pub fn state(&self) -> CrawlState {
        self.core().state
    }

    /// Status as shown to an operator
    ///
    /// Once stopping, this is how the crawl ended.
    pub fn exit_status(&self) -> CrawlStatus {
        let core = self.core();
        match core.state {
            CrawlState::Nascent => CrawlStatus::Created,
            CrawlState::Preparing => CrawlStatus::Preparing,
            _ => core.exit,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state() == CrawlState::Paused
    }

    /// Returns true while RUNNING or EMPTY
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    pub fn is_finished(&self) -> bool {
        self.state() == CrawlState::Finished
    }

    pub fn has_started(&self) -> bool {
        self.shared.has_started.load(Ordering::SeqCst)
    }

    pub fn is_stop_complete(&self) -> bool {
        self.shared.stop_complete.load(Ordering::SeqCst)
    }

    /// Subscribes to controller state changes
    pub fn subscribe(&self) -> watch::Receiver<CrawlState> {
        self.shared.state_tx.subscribe()
    }

    /// Waits up to `timeout` for the controller to be in `target`
    pub async fn wait_for_state(&self, target: CrawlState, timeout: Duration) -> bool {
        let mut rx = self.subscribe();
        let reached = tokio::time::timeout(timeout, rx.wait_for(|state| *state == target)).await;
        matches!(reached, Ok(Ok(_)))
    }

    /// Waits until the crawl has finished and every worker has exited
    pub async fn wait_until_finished(&self) {
        let mut rx = self.subscribe();
        if rx.wait_for(|state| *state == CrawlState::Finished).await.is_err() {
            tracing::debug!("Controller state channel closed");
        }
    }

    /// How long a checkpoint waits for the crawl to pause
    pub fn pause_timeout(&self) -> Duration {
        Duration::from_secs(self.shared.config.pause_timeout_secs)
    }

    pub fn active_worker_count(&self) -> usize {
        self.shared.pool.active_count()
    }

    pub fn worker_count(&self) -> usize {
        self.shared.pool.count()
    }

    /// Forcibly interrupts one worker; see [`WorkerPool::kill`]
    pub async fn kill_worker(&self, serial: u32, replace: bool) -> bool {
        self.shared.pool.kill(serial, replace).await
    }

    pub fn frontier(&self) -> &Arc<Frontier> {
        &self.shared.frontier
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.shared.pool
    }

    /// Short human-readable status
    pub fn status_report(&self) -> String {
        format!(
            "{} ({}); {}; {}",
            self.state(),
            self.exit_status(),
            self.shared.pool.compact_report(),
            self.shared.frontier.one_line_report()
        )
    }
}

async fn recv_signal(
    signals: &mut Option<mpsc::UnboundedReceiver<WorkerSignal>>,
) -> Option<WorkerSignal> {
    match signals {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
