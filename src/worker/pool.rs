use super::reserve::MemoryReserve;
use super::status::{Step, WorkerStatus};
use super::toe::{Worker, WorkerSignal};
use crate::frontier::Frontier;
use crate::pipeline::Pipeline;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct WorkerEntry {
    status: Arc<Mutex<WorkerStatus>>,
    retire: CancellationToken,
    kill: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// State shared between the pool handle and its workers
pub(super) struct PoolShared {
    pub(super) frontier: Arc<Frontier>,
    pub(super) pipeline: Pipeline,
    pub(super) signals: mpsc::UnboundedSender<WorkerSignal>,
    pub(super) reserve: MemoryReserve,
    /// Parent of every worker's kill token
    pub(super) shutdown: CancellationToken,
    pub(super) active: AtomicUsize,
    workers: Mutex<BTreeMap<u32, WorkerEntry>>,
    next_serial: AtomicU32,
    spawned: AtomicUsize,
    started: AtomicUsize,
    live: AtomicUsize,
    changed: Notify,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<u32, WorkerEntry>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn mark_started(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    pub(super) fn deregister(&self, serial: u32) {
        if self.lock().remove(&serial).is_some() {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
        self.changed.notify_waiters();
    }

    /// Multi-line report of every worker
    pub(super) fn report(&self) -> String {
        let now = Utc::now();
        let statuses = self.statuses();
        let active = statuses.iter().filter(|s| s.is_active()).count();
        let mut report = format!("{} workers, {} active\n", statuses.len(), active);
        for status in statuses {
            report.push_str("  ");
            report.push_str(&status.report_line(now));
            report.push('\n');
        }
        report
    }

    fn statuses(&self) -> Vec<WorkerStatus> {
        self.lock()
            .values()
            .map(|entry| {
                entry
                    .status
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
            })
            .collect()
    }
}

/// Pool of crawl workers
///
/// Cloning the pool yields another handle to the same workers.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    /// Creates an empty pool
    ///
    /// # Arguments
    ///
    /// * `frontier` - The frontier workers take URIs from
    /// * `pipeline` - Processor chains every URI is run through
    /// * `signals` - Channel on which workers report severe errors
    /// * `reserve` - Emergency memory released on severe errors
    pub fn new(
        frontier: Arc<Frontier>,
        pipeline: Pipeline,
        signals: mpsc::UnboundedSender<WorkerSignal>,
        reserve: MemoryReserve,
    ) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                frontier,
                pipeline,
                signals,
                reserve,
                shutdown: CancellationToken::new(),
                active: AtomicUsize::new(0),
                workers: Mutex::new(BTreeMap::new()),
                next_serial: AtomicU32::new(0),
                spawned: AtomicUsize::new(0),
                started: AtomicUsize::new(0),
                live: AtomicUsize::new(0),
                changed: Notify::new(),
            }),
        }
    }

    /// Grows or shrinks the pool to `size` workers
    ///
    /// Growing starts new workers. Shrinking retires the most recently
    /// created workers; each finishes its current URI before exiting.
    pub fn set_size(&self, size: usize) {
        let mut workers = self.shared.lock();
        let serving: Vec<u32> = workers
            .iter()
            .filter(|(_, entry)| !entry.retire.is_cancelled() && !entry.kill.is_cancelled())
            .map(|(serial, _)| *serial)
            .collect();

        if size > serving.len() {
            let count = size - serving.len();
            tracing::info!("Starting {} worker(s)", count);
            for _ in 0..count {
                self.spawn(&mut workers);
            }
        } else if size < serving.len() {
            let excess = &serving[size..];
            tracing::info!("Retiring {} worker(s)", excess.len());
            for serial in excess {
                if let Some(entry) = workers.get(serial) {
                    entry.retire.cancel();
                }
            }
        }
    }

    fn spawn(&self, workers: &mut BTreeMap<u32, WorkerEntry>) {
        if self.shared.shutdown.is_cancelled() {
            tracing::debug!("Pool shut down; not starting a worker");
            return;
        }

        let serial = self.shared.next_serial.fetch_add(1, Ordering::SeqCst);
        let status = Arc::new(Mutex::new(WorkerStatus::new(serial)));
        let retire = CancellationToken::new();
        let kill = self.shared.shutdown.child_token();

        let worker = Worker {
            serial,
            status: status.clone(),
            retire: retire.clone(),
            kill: kill.clone(),
            shared: self.shared.clone(),
        };

        // registered before the task runs so its exit always finds the entry
        workers.insert(
            serial,
            WorkerEntry {
                status,
                retire,
                kill,
                handle: None,
            },
        );
        self.shared.live.fetch_add(1, Ordering::SeqCst);
        self.shared.spawned.fetch_add(1, Ordering::SeqCst);

        let handle = tokio::spawn(worker.run());
        if let Some(entry) = workers.get_mut(&serial) {
            entry.handle = Some(handle);
        }
    }

    /// Forcibly interrupts worker `serial`
    ///
    /// A URI the worker held is returned to the frontier marked as killed.
    /// Waits for the worker to exit, then starts a replacement if `replace`
    /// is set.
    ///
    /// # Returns
    ///
    /// * `true` - The worker existed and has exited
    /// * `false` - No live worker has that serial
    pub async fn kill(&self, serial: u32, replace: bool) -> bool {
        let handle = {
            let mut workers = self.shared.lock();
            let Some(entry) = workers.get_mut(&serial) else {
                tracing::warn!("No worker #{} to kill", serial);
                return false;
            };
            tracing::warn!("Killing worker #{}", serial);
            entry.kill.cancel();
            entry.handle.take()
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Worker #{} ended abnormally: {}", serial, e);
                self.shared.deregister(serial);
            }
        }

        if replace {
            let mut workers = self.shared.lock();
            self.spawn(&mut workers);
        }
        true
    }

    /// Waits until every worker created so far has started its loop
    pub async fn wait_for_all(&self) {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let spawned = self.shared.spawned.load(Ordering::SeqCst);
            let started = self.shared.started.load(Ordering::SeqCst);
            if started >= spawned {
                tracing::debug!("All {} worker(s) started", spawned);
                return;
            }
            notified.await;
        }
    }

    /// Waits until no worker is left
    pub async fn wait_for_exit(&self) {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Interrupts every worker, including those blocked waiting for work
    pub fn cleanup(&self) {
        tracing::info!("Interrupting {} worker(s)", self.count());
        self.shared.shutdown.cancel();
    }

    /// Number of live workers, including retiring ones
    pub fn count(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Number of workers currently holding a URI
    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Serials of live workers, oldest first
    pub fn serials(&self) -> Vec<u32> {
        self.shared.lock().keys().copied().collect()
    }

    /// Snapshot of worker `serial`'s state
    pub fn status(&self, serial: u32) -> Option<WorkerStatus> {
        self.shared.lock().get(&serial).map(|entry| {
            entry
                .status
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
    }

    /// Restores the emergency memory reserve
    pub fn replenish_reserve(&self) {
        self.shared.reserve.replenish();
    }

    /// Multi-line report with one line per worker
    pub fn report(&self) -> String {
        self.shared.report()
    }

    /// Single-line summary of worker steps, e.g.
    /// `5 threads: 3 ABOUT_TO_GET_URI, 2 ABOUT_TO_BEGIN_PROCESSOR`
    pub fn compact_report(&self) -> String {
        let statuses = self.shared.statuses();
        let mut steps: HashMap<Step, usize> = HashMap::new();
        for status in &statuses {
            *steps.entry(status.step).or_default() += 1;
        }
        let mut steps: Vec<(Step, usize)> = steps.into_iter().collect();
        steps.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));

        let parts: Vec<String> = steps
            .iter()
            .map(|(step, count)| format!("{} {}", count, step))
            .collect();
        format!("{} threads: {}", statuses.len(), parts.join(", "))
    }
}
