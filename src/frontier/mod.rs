//! URI frontier
//!
//! The frontier owns every URI that is waiting to be processed. URIs are
//! grouped by politeness key; each group hands out at most one URI at a time
//! and is snoozed between fetches. Workers take URIs with [`Frontier::next`]
//! and return them with [`Frontier::finished`].
//!
//! The frontier publishes the state it has reached (RUN, EMPTY, PAUSE,
//! FINISH) on a watch channel, which the crawl controller follows.

mod disposition;
mod group;
mod state;

pub use disposition::DispositionGate;
pub use group::{FrontierGroup, GroupStats};
pub use state::FrontierState;

use crate::checkpoint::{Checkpoint, CheckpointError, Checkpointable};
use crate::config::FrontierConfig;
use crate::storage::{open_queue_store, QueueStore, StorageResult};
use crate::uri::{status, CrawlUri, SchedulingDirective};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

/// Precedence tier for URIs returned to the head of their group
const HEAD_PRECEDENCE: u8 = 0;

/// How a finished URI was accounted for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Disposition {
    Succeeded,
    Failed,
    Disregarded,
    DeferredForRetry,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Disregarded => "DISREGARDED",
            Self::DeferredForRetry => "DEFERRED_FOR_RETRY",
        })
    }
}

/// Receives a notification every time the frontier accounts for a URI
pub trait DispositionListener: Send + Sync {
    fn uri_disposed(&self, disposition: Disposition, uri: &CrawlUri);
}

/// Aggregate frontier counters; persisted across checkpoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierCounters {
    /// Ordinal assigned to the next scheduled URI
    pub next_ordinal: u64,
    /// URIs accepted by `schedule`
    pub discovered: u64,
    /// URIs pending or in progress
    pub queued: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub disregarded: u64,
    /// Number of times a URI was returned for another attempt
    pub deferred: u64,
    pub total_bytes: u64,
}

impl FrontierCounters {
    /// URIs fully accounted for
    pub fn finished(&self) -> u64 {
        self.succeeded + self.failed + self.disregarded
    }
}

struct FrontierInner {
    store: Box<dyn QueueStore>,
    groups: HashMap<String, FrontierGroup>,
    /// Groups with pending URIs that may be handed out now, in round-robin order
    ready: VecDeque<String>,
    /// Groups with pending URIs waiting out their politeness delay, by wake time
    snoozed: BinaryHeap<Reverse<(Instant, String)>>,
    /// Clones of every checked-out URI, by ordinal
    checked_out: HashMap<u64, CrawlUri>,
    target: FrontierState,
    terminated: bool,
    counters: FrontierCounters,
}

impl FrontierInner {
    fn add_pending(&mut self, key: &str, now: Instant) {
        let group = self
            .groups
            .entry(key.to_string())
            .or_insert_with(|| FrontierGroup::new(key));
        group.pending += 1;
        self.enqueue_group(key, now);
    }

    /// Puts an idle group with pending work in the ready queue, or in the
    /// snooze heap while its delay runs
    fn enqueue_group(&mut self, key: &str, now: Instant) {
        let Some(group) = self.groups.get_mut(key) else {
            return;
        };
        if group.busy || group.pending == 0 || group.enqueued {
            return;
        }
        group.enqueued = true;
        match group.wake_time.filter(|wake| *wake > now) {
            Some(wake) => self.snoozed.push(Reverse((wake, key.to_string()))),
            None => self.ready.push_back(key.to_string()),
        }
    }

    /// Moves groups whose delay has run out to the back of the ready queue
    fn wake_due(&mut self, now: Instant) {
        while self
            .snoozed
            .peek()
            .is_some_and(|Reverse((wake, _))| *wake <= now)
        {
            if let Some(Reverse((_, key))) = self.snoozed.pop() {
                self.ready.push_back(key);
            }
        }
    }

    /// Checks out the first URI of the first ready group
    fn take_ready(&mut self, now: Instant) -> StorageResult<Option<CrawlUri>> {
        self.wake_due(now);
        while let Some(key) = self.ready.pop_front() {
            let Some(group) = self.groups.get_mut(&key) else {
                continue;
            };
            group.enqueued = false;
            if !group.is_eligible(now) {
                self.enqueue_group(&key, now);
                continue;
            }

            let popped = match self.store.pop(&key) {
                Ok(popped) => popped,
                Err(e) => {
                    group.enqueued = true;
                    self.ready.push_front(key);
                    return Err(e);
                }
            };
            match popped {
                Some(uri) => {
                    group.check_out();
                    self.checked_out.insert(uri.ordinal, uri.clone());
                    return Ok(Some(uri));
                }
                None => {
                    tracing::warn!(
                        "Group {} claimed {} pending URIs but its queue is empty",
                        key,
                        group.pending
                    );
                    group.pending = 0;
                }
            }
        }
        Ok(None)
    }

    /// Earliest wake time among snoozed groups
    fn next_wake(&self) -> Option<Instant> {
        self.snoozed.peek().map(|Reverse((wake, _))| *wake)
    }

    fn evaluate(&self) -> Option<FrontierState> {
        let in_process = self.checked_out.len();
        if self.terminated {
            return (in_process == 0).then_some(FrontierState::Finish);
        }
        match self.target {
            FrontierState::Run => Some(if self.counters.queued == 0 {
                FrontierState::Empty
            } else {
                FrontierState::Run
            }),
            FrontierState::Pause | FrontierState::Hold => {
                (in_process == 0).then_some(self.target)
            }
            FrontierState::Empty | FrontierState::Finish => None,
        }
    }
}

/// Serialized frontier state inside a checkpoint
#[derive(Serialize, Deserialize)]
struct FrontierSnapshot {
    counters: FrontierCounters,
    groups: Vec<(String, GroupStats)>,
    in_process: Vec<CrawlUri>,
    store_file: String,
}

/// The URI frontier
pub struct Frontier {
    config: FrontierConfig,
    /// Shared with blocking tasks that snapshot the queue store
    inner: Arc<Mutex<FrontierInner>>,
    work_changed: Notify,
    gate: DispositionGate,
    reached: watch::Sender<FrontierState>,
    listeners: RwLock<Vec<Arc<dyn DispositionListener>>>,
}

impl Frontier {
    /// Creates a frontier over the given queue store
    ///
    /// The frontier starts with PAUSE as its target; nothing is handed out
    /// until [`Frontier::unpause`] is called.
    pub fn new(config: FrontierConfig, store: Box<dyn QueueStore>) -> Self {
        let (reached, _) = watch::channel(FrontierState::Pause);
        Self {
            config,
            inner: Arc::new(Mutex::new(FrontierInner {
                store,
                groups: HashMap::new(),
                ready: VecDeque::new(),
                snoozed: BinaryHeap::new(),
                checked_out: HashMap::new(),
                target: FrontierState::Pause,
                terminated: false,
                counters: FrontierCounters::default(),
            })),
            work_changed: Notify::new(),
            gate: DispositionGate::new(),
            reached,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Creates a frontier with the queue store named in the configuration
    pub fn open(config: FrontierConfig) -> StorageResult<Self> {
        let store = open_queue_store(config.queue_store.as_deref().map(Path::new))?;
        Ok(Self::new(config, store))
    }

    fn lock(&self) -> MutexGuard<'_, FrontierInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a listener notified on every disposition
    pub fn add_listener(&self, listener: Arc<dyn DispositionListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Schedules a URI unless an equivalent URI was already scheduled
    ///
    /// URIs with the [`SchedulingDirective::Forced`] directive bypass the
    /// already-seen check.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The URI was enqueued
    /// * `Ok(false)` - The URI was already seen and dropped
    /// * `Err(StorageError)` - The queue store failed
    pub fn schedule(&self, uri: CrawlUri) -> StorageResult<bool> {
        {
            let mut inner = self.lock();
            let first_sighting = inner.store.mark_seen(&uri.canonical())?;
            if !first_sighting && uri.directive != SchedulingDirective::Forced {
                tracing::trace!("Already seen: {}", uri.url);
                return Ok(false);
            }
            self.enqueue(&mut inner, uri)?;
        }
        self.work_changed.notify_waiters();
        Ok(true)
    }

    /// Schedules a URI without consulting the already-seen set
    pub fn schedule_always(&self, uri: CrawlUri) -> StorageResult<()> {
        {
            let mut inner = self.lock();
            inner.store.mark_seen(&uri.canonical())?;
            self.enqueue(&mut inner, uri)?;
        }
        self.work_changed.notify_waiters();
        Ok(())
    }

    fn enqueue(&self, inner: &mut FrontierInner, mut uri: CrawlUri) -> StorageResult<()> {
        uri.ordinal = inner.counters.next_ordinal;
        inner
            .store
            .push(&uri.class_key, uri.directive.precedence(), &uri)?;

        inner.counters.next_ordinal += 1;
        inner.counters.discovered += 1;
        inner.counters.queued += 1;
        inner.add_pending(&uri.class_key, Instant::now());

        tracing::trace!("Scheduled #{} {}", uri.ordinal, uri.url);
        self.publish(inner);
        Ok(())
    }

    /// Takes the next URI to process
    ///
    /// Suspends until some group has an eligible URI. Returns `None` once the
    /// frontier has been terminated; every later call returns `None` too.
    /// Dropping the returned future before it completes loses nothing.
    pub async fn next(&self) -> Option<CrawlUri> {
        loop {
            let notified = self.work_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake = {
                let mut inner = self.lock();
                if inner.terminated {
                    return None;
                }
                if inner.target.hands_out_work() {
                    let now = Instant::now();
                    match inner.take_ready(now) {
                        Ok(Some(uri)) => {
                            tracing::trace!("Handing out #{} {}", uri.ordinal, uri.url);
                            self.publish(&inner);
                            return Some(uri);
                        }
                        Ok(None) => inner.next_wake(),
                        Err(e) => {
                            tracing::error!("Queue store failed, pausing frontier: {}", e);
                            inner.target = FrontierState::Pause;
                            self.publish(&inner);
                            None
                        }
                    }
                } else {
                    None
                }
            };

            match wake {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Returns a checked-out URI to the frontier with its outcome recorded
    ///
    /// Retryable failures go back to the head of their group; everything
    /// else is tallied as succeeded, failed or disregarded. The group is
    /// released and snoozed for the politeness (or retry) delay.
    pub fn finished(&self, uri: CrawlUri) {
        let now = Instant::now();
        let disposition = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            inner.checked_out.remove(&uri.ordinal);
            let key = uri.class_key.clone();

            let mut disposition = None;
            let mut delay = Duration::ZERO;

            if self.needs_retrying(&uri) {
                match inner.store.push(&key, HEAD_PRECEDENCE, &uri) {
                    Ok(()) => {
                        inner.counters.deferred += 1;
                        delay = self.retry_delay_for(&uri);
                        disposition = Some(Disposition::DeferredForRetry);
                    }
                    Err(e) => {
                        tracing::error!("Could not requeue {}: {}; pausing frontier", uri.url, e);
                        inner.target = FrontierState::Pause;
                    }
                }
            }

            let disposition = match disposition {
                Some(disposition) => {
                    inner.add_pending(&key, now);
                    disposition
                }
                None => {
                    let success = uri.is_success();
                    let disregarded = status::is_disregarded(uri.fetch_status);
                    let group = inner
                        .groups
                        .entry(key.clone())
                        .or_insert_with(|| FrontierGroup::new(key.as_str()));
                    group.record_outcome(success, disregarded, uri.content_size);

                    inner.counters.queued = inner.counters.queued.saturating_sub(1);
                    if disregarded {
                        inner.counters.disregarded += 1;
                        Disposition::Disregarded
                    } else if success {
                        inner.counters.succeeded += 1;
                        inner.counters.total_bytes += uri.content_size;
                        delay = self.politeness_delay_for(&uri);
                        Disposition::Succeeded
                    } else {
                        inner.counters.failed += 1;
                        delay = self.politeness_delay_for(&uri);
                        Disposition::Failed
                    }
                }
            };

            let group = inner
                .groups
                .entry(key.clone())
                .or_insert_with(|| FrontierGroup::new(key.as_str()));
            group.check_in(now, delay);
            inner.enqueue_group(&key, now);

            self.publish(inner);
            disposition
        };

        tracing::debug!("{} {}", disposition, uri);
        self.work_changed.notify_waiters();

        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener.uri_disposed(disposition, &uri);
        }
    }

    /// Opens the disposition bracket for worker `serial`
    ///
    /// Waits while a checkpoint is in progress.
    pub async fn begin_disposition(&self, serial: u32) {
        self.gate.enter(serial).await;
    }

    /// Closes the disposition bracket for worker `serial`; idempotent
    pub fn end_disposition(&self, serial: u32) -> bool {
        self.gate.leave(serial)
    }

    /// Number of workers inside a disposition bracket
    pub fn dispositions_in_progress(&self) -> usize {
        self.gate.in_flight()
    }

    /// Returns true if no URI is pending or in progress
    pub fn is_empty(&self) -> bool {
        self.lock().counters.queued == 0
    }

    /// URIs pending or in progress
    pub fn queued_count(&self) -> u64 {
        self.lock().counters.queued
    }

    /// URIs currently checked out by workers
    pub fn in_process_count(&self) -> usize {
        self.lock().checked_out.len()
    }

    pub fn counters(&self) -> FrontierCounters {
        self.lock().counters.clone()
    }

    /// Number of groups ever created
    pub fn group_count(&self) -> usize {
        self.lock().groups.len()
    }

    /// Statistics of the group for `key`, if it exists
    pub fn group_stats(&self, key: &str) -> Option<GroupStats> {
        self.lock().groups.get(key).map(|group| group.stats.clone())
    }

    /// Stops handing out URIs; queued state is kept
    pub fn pause(&self) {
        self.request_state(FrontierState::Pause);
    }

    /// Resumes handing out URIs
    pub fn unpause(&self) {
        self.request_state(FrontierState::Run);
    }

    /// Terminates the frontier permanently
    ///
    /// Every current and future caller of [`Frontier::next`] receives `None`.
    pub fn terminate(&self) {
        {
            let mut inner = self.lock();
            if !inner.terminated {
                tracing::info!("Frontier terminating");
            }
            inner.terminated = true;
            inner.target = FrontierState::Finish;
            self.publish(&inner);
        }
        self.work_changed.notify_waiters();
    }

    /// Asks the frontier to move toward `target`
    ///
    /// Arrival is reported through [`Frontier::subscribe`], not by this call.
    /// EMPTY is not a valid target; requests after termination are ignored.
    pub fn request_state(&self, target: FrontierState) {
        match target {
            FrontierState::Finish => return self.terminate(),
            FrontierState::Empty => {
                tracing::debug!("Ignoring request for frontier state {}", target);
                return;
            }
            _ => {}
        }
        {
            let mut inner = self.lock();
            if inner.terminated {
                return;
            }
            if inner.target != target {
                tracing::debug!("Frontier target {} -> {}", inner.target, target);
            }
            inner.target = target;
            self.publish(&inner);
        }
        self.work_changed.notify_waiters();
    }

    pub fn is_terminated(&self) -> bool {
        self.lock().terminated
    }

    /// The state most recently reached
    pub fn reached_state(&self) -> FrontierState {
        *self.reached.borrow()
    }

    /// Subscribes to reached-state changes
    pub fn subscribe(&self) -> watch::Receiver<FrontierState> {
        self.reached.subscribe()
    }

    fn publish(&self, inner: &FrontierInner) {
        let Some(state) = inner.evaluate() else {
            return;
        };
        self.reached.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::info!("Frontier reached {}", state);
            *current = state;
            true
        });
    }

    /// Delay to impose on a group after one of its URIs was fetched
    ///
    /// The last fetch duration times the delay factor, clamped to the
    /// configured bounds. URIs without a recorded fetch get the minimum.
    pub fn politeness_delay_for(&self, uri: &CrawlUri) -> Duration {
        let min = self.config.min_delay_ms;
        let max = self.config.max_delay_ms;
        let millis = match uri.fetch_duration_ms {
            Some(duration) => {
                let scaled = (self.config.delay_factor * duration as f64) as u64;
                scaled.clamp(min, max.max(min))
            }
            None => min,
        };
        Duration::from_millis(millis)
    }

    /// Delay before a retried URI's group becomes eligible again
    pub fn retry_delay_for(&self, uri: &CrawlUri) -> Duration {
        if status::is_connection_failure(uri.fetch_status) {
            Duration::from_secs(self.config.retry_delay_secs)
        } else {
            Duration::ZERO
        }
    }

    fn needs_retrying(&self, uri: &CrawlUri) -> bool {
        uri.fetch_attempts < self.config.max_retries && status::is_retryable(uri.fetch_status)
    }

    /// Single-line summary of frontier state
    pub fn one_line_report(&self) -> String {
        let inner = self.lock();
        let now = Instant::now();
        let busy = inner.groups.values().filter(|g| g.busy).count();
        let snoozed = inner
            .snoozed
            .iter()
            .filter(|Reverse((wake, _))| *wake > now)
            .count();
        format!(
            "{} queued, {} in-process, {} succeeded, {} failed, {} disregarded; \
             {} groups ({} ready, {} busy, {} snoozed); reached {}",
            inner.counters.queued,
            inner.checked_out.len(),
            inner.counters.succeeded,
            inner.counters.failed,
            inner.counters.disregarded,
            inner.groups.len(),
            inner.ready.len() + inner.snoozed.len() - snoozed,
            busy,
            snoozed,
            self.reached_state()
        )
    }
}

#[async_trait]
impl Checkpointable for Frontier {
    fn checkpoint_name(&self) -> &str {
        "frontier"
    }

    async fn start_checkpoint(&self, _checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.gate.close().await;
        Ok(())
    }

    async fn do_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let shared = self.inner.clone();
        let component = self.checkpoint_name().to_string();
        let target = checkpoint.clone();

        // the store snapshot is blocking file I/O
        let snapshot = tokio::task::spawn_blocking(move || {
            let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
            let inner = &mut *guard;
            let store_file = inner.store.snapshot_file_name().to_string();
            let path = target.component_path(&component, Some(store_file.as_str()));
            inner.store.checkpoint(&path)?;

            let mut groups: Vec<(String, GroupStats)> = inner
                .groups
                .iter()
                .map(|(key, group)| (key.clone(), group.stats.clone()))
                .collect();
            groups.sort_by(|a, b| a.0.cmp(&b.0));

            let mut in_process: Vec<CrawlUri> = inner.checked_out.values().cloned().collect();
            in_process.sort_by_key(|uri| uri.ordinal);

            Ok::<_, CheckpointError>(FrontierSnapshot {
                counters: inner.counters.clone(),
                groups,
                in_process,
                store_file,
            })
        })
        .await
        .map_err(|e| CheckpointError::Component {
            component: self.checkpoint_name().to_string(),
            message: e.to_string(),
        })??;

        checkpoint.save_json(self.checkpoint_name(), &snapshot)?;
        tracing::info!(
            "Frontier checkpointed: {} queued, {} groups",
            snapshot.counters.queued,
            snapshot.groups.len()
        );
        Ok(())
    }

    async fn finish_checkpoint(&self, _checkpoint: &Checkpoint) {
        self.gate.open();
    }

    async fn set_recovery_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let snapshot: FrontierSnapshot = checkpoint.load_json(self.checkpoint_name())?;
        {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let path =
                checkpoint.component_path(self.checkpoint_name(), Some(snapshot.store_file.as_str()));
            inner.store.recover(&path)?;

            inner.groups.clear();
            inner.ready.clear();
            inner.snoozed.clear();
            inner.checked_out.clear();
            let now = Instant::now();
            for (key, pending) in inner.store.queues()? {
                let mut group = FrontierGroup::new(key.as_str());
                group.pending = pending;
                inner.groups.insert(key.clone(), group);
                inner.enqueue_group(&key, now);
            }
            for (key, stats) in snapshot.groups {
                inner
                    .groups
                    .entry(key.clone())
                    .or_insert_with(|| FrontierGroup::new(key))
                    .stats = stats;
            }

            // URIs that were checked out go back to the head of their groups
            for uri in &snapshot.in_process {
                inner.store.push(&uri.class_key, HEAD_PRECEDENCE, uri)?;
                inner.add_pending(&uri.class_key, now);
            }

            inner.counters = snapshot.counters;
            inner.counters.queued = inner.groups.values().map(|g| g.pending as u64).sum();
            self.publish(inner);

            tracing::info!(
                "Frontier recovered from {}: {} queued in {} groups, {} re-offered",
                checkpoint.name(),
                inner.counters.queued,
                inner.groups.len(),
                snapshot.in_process.len()
            );
        }
        self.work_changed.notify_waiters();
        Ok(())
    }
}
