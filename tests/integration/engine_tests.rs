//! Integration tests for the worker pool and crawl controller
//!
//! These tests wire a frontier, a controller and scripted processor chains
//! together and drive full crawl lifecycles.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use sumi_engine::config::{ControllerConfig, FrontierConfig};
use sumi_engine::controller::CrawlStateListener;
use sumi_engine::pipeline::NoopChain;
use sumi_engine::frontier::FrontierState;
use sumi_engine::storage::MemoryQueueStore;
use sumi_engine::uri::status;
use sumi_engine::worker::Step;
use sumi_engine::{
    CrawlController, CrawlState, CrawlStatus, CrawlUri, Frontier, Pipeline, ProcessError,
    ProcessorChain, WorkerContext,
};
use tokio::sync::mpsc;

fn frontier() -> Arc<Frontier> {
    let config = FrontierConfig {
        min_delay_ms: 0,
        ..FrontierConfig::default()
    };
    Arc::new(Frontier::new(config, Box::new(MemoryQueueStore::new())))
}

fn controller_config(workers: usize) -> ControllerConfig {
    ControllerConfig {
        max_workers: workers,
        reserve_blocks: 1,
        reserve_block_bytes: 1024,
        ..ControllerConfig::default()
    }
}

fn schedule(frontier: &Frontier, uri: &str) {
    frontier.schedule(CrawlUri::new(uri).unwrap()).unwrap();
}

async fn finished(controller: &CrawlController) {
    tokio::time::timeout(Duration::from_secs(5), controller.wait_until_finished())
        .await
        .expect("crawl did not finish");
}

/// Counts calls and marks every URI fetched
#[derive(Default)]
struct CountingFetch {
    calls: AtomicUsize,
}

#[async_trait]
impl ProcessorChain for CountingFetch {
    async fn process(&self, uri: &mut CrawlUri, _ctx: &WorkerContext) -> Result<(), ProcessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        uri.fetch_status = 200;
        Ok(())
    }
}

/// What a blocking chain saw when it received a URI
#[derive(Debug)]
struct Seen {
    serial: u32,
    status: i32,
    attempts: u32,
    annotations: Vec<String>,
}

/// Reports each URI it receives, then never returns
struct BlockingFetch {
    seen: mpsc::UnboundedSender<Seen>,
}

#[async_trait]
impl ProcessorChain for BlockingFetch {
    async fn process(&self, uri: &mut CrawlUri, ctx: &WorkerContext) -> Result<(), ProcessError> {
        let _ = self.seen.send(Seen {
            serial: ctx.serial(),
            status: uri.fetch_status,
            attempts: uri.fetch_attempts,
            annotations: uri.annotations.clone(),
        });
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Fails or panics depending on the URL path
struct ScriptedFetch;

#[async_trait]
impl ProcessorChain for ScriptedFetch {
    async fn process(&self, uri: &mut CrawlUri, _ctx: &WorkerContext) -> Result<(), ProcessError> {
        match uri.url.path() {
            "/panic" => panic!("scripted panic"),
            "/bad" => Err(ProcessError::Recoverable("scripted failure".to_string())),
            "/severe" => Err(ProcessError::Severe("out of memory".to_string())),
            _ => {
                uri.fetch_status = 200;
                Ok(())
            }
        }
    }
}

#[derive(Default)]
struct StateLog {
    states: Mutex<Vec<CrawlState>>,
}

impl CrawlStateListener for StateLog {
    fn crawl_state_changed(&self, _previous: CrawlState, state: CrawlState) {
        self.states.lock().unwrap().push(state);
    }
}

/// Asks for a pause as soon as the crawl starts preparing
#[derive(Default)]
struct PauseWhilePreparing {
    controller: OnceLock<CrawlController>,
}

impl CrawlStateListener for PauseWhilePreparing {
    fn crawl_state_changed(&self, _previous: CrawlState, state: CrawlState) {
        if state == CrawlState::Preparing {
            if let Some(controller) = self.controller.get() {
                controller.request_crawl_pause();
            }
        }
    }
}

#[tokio::test]
async fn test_pause_at_start_with_idle_workers() {
    let frontier = frontier();
    schedule(&frontier, "https://a/");
    let fetch = Arc::new(CountingFetch::default());
    let controller = CrawlController::new(
        ControllerConfig {
            pause_at_start: true,
            ..controller_config(5)
        },
        frontier.clone(),
        Pipeline::new(fetch.clone(), Arc::new(NoopChain)),
    );

    controller.request_crawl_start().await;

    assert!(controller.is_paused());
    assert_eq!(controller.worker_count(), 5);
    assert_eq!(controller.active_worker_count(), 0);
    assert_eq!(fetch.calls.load(Ordering::SeqCst), 0);

    controller.request_crawl_resume();
    finished(&controller).await;
    assert_eq!(fetch.calls.load(Ordering::SeqCst), 1);
    assert_eq!(controller.exit_status(), CrawlStatus::Finished);
}

#[tokio::test]
async fn test_pool_resize() {
    let frontier = frontier();
    let controller = CrawlController::new(
        ControllerConfig {
            pause_at_start: true,
            ..controller_config(5)
        },
        frontier,
        Pipeline::default(),
    );
    controller.request_crawl_start().await;
    let pool = controller.pool();

    pool.set_size(8);
    pool.wait_for_all().await;
    assert_eq!(pool.count(), 8);

    pool.set_size(3);
    tokio::time::timeout(Duration::from_secs(2), async {
        while pool.count() != 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    // the oldest workers are kept
    assert_eq!(pool.serials(), vec![0, 1, 2]);

    pool.set_size(0);
    tokio::time::timeout(Duration::from_secs(2), pool.wait_for_exit())
        .await
        .unwrap();
    assert_eq!(pool.count(), 0);

    controller.request_crawl_stop();
    finished(&controller).await;
}

#[tokio::test]
async fn test_kill_returns_held_uri() {
    let frontier = frontier();
    schedule(&frontier, "https://x/");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let controller = CrawlController::new(
        controller_config(4),
        frontier.clone(),
        Pipeline::new(Arc::new(BlockingFetch { seen: tx }), Arc::new(NoopChain)),
    );
    controller.request_crawl_start().await;

    let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.attempts, 1);
    assert_eq!(controller.active_worker_count(), 1);

    // the chain never names a processor, the worker still reports its step
    let holder = controller.pool().status(first.serial).unwrap();
    assert_eq!(holder.step, Step::AboutToBeginProcessor);
    assert_eq!(holder.current_uri.as_deref(), Some("https://x/"));

    assert!(controller.kill_worker(first.serial, false).await);
    assert_eq!(controller.worker_count(), 3);

    // the same URI is offered again, to another worker, marked as killed
    let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_ne!(second.serial, first.serial);
    assert_eq!(second.status, status::S_PROCESSING_THREAD_KILLED);
    assert_eq!(second.attempts, 2);
    assert!(second.annotations.contains(&"err=killed".to_string()));
    assert_eq!(frontier.counters().deferred, 1);
    assert_eq!(frontier.queued_count(), 1);

    // stop escalates to interrupting the blocked worker
    controller.request_crawl_stop();
    assert_eq!(controller.state(), CrawlState::Stopping);
    controller.request_crawl_stop();
    finished(&controller).await;

    assert_eq!(controller.exit_status(), CrawlStatus::Aborted);
    assert_eq!(controller.worker_count(), 0);
    assert_eq!(frontier.dispositions_in_progress(), 0);
}

#[tokio::test]
async fn test_item_failures_do_not_kill_workers() {
    let frontier = frontier();
    for uri in ["https://a/panic", "https://b/bad", "https://c/ok"] {
        schedule(&frontier, uri);
    }
    let controller = CrawlController::new(
        controller_config(1),
        frontier.clone(),
        Pipeline::new(Arc::new(ScriptedFetch), Arc::new(NoopChain)),
    );

    controller.request_crawl_start().await;
    finished(&controller).await;

    let counters = frontier.counters();
    assert_eq!(counters.succeeded, 1);
    assert_eq!(counters.failed, 2);
    assert_eq!(controller.exit_status(), CrawlStatus::Finished);
    assert_eq!(frontier.dispositions_in_progress(), 0);
}

#[tokio::test]
async fn test_serious_error_pauses_crawl() {
    let frontier = frontier();
    schedule(&frontier, "https://a/severe");
    let controller = CrawlController::new(
        ControllerConfig {
            run_while_empty: true,
            ..controller_config(2)
        },
        frontier.clone(),
        Pipeline::new(Arc::new(ScriptedFetch), Arc::new(NoopChain)),
    );

    controller.request_crawl_start().await;
    assert!(
        controller
            .wait_for_state(CrawlState::Paused, Duration::from_secs(2))
            .await
    );
    assert_eq!(frontier.counters().failed, 1);
    assert_eq!(controller.exit_status(), CrawlStatus::Paused);

    controller.request_crawl_stop();
    finished(&controller).await;
}

#[tokio::test]
async fn test_duplicate_requests_notify_once() {
    let frontier = frontier();
    let log = Arc::new(StateLog::default());
    let controller = CrawlController::new(
        ControllerConfig {
            pause_at_start: true,
            ..controller_config(1)
        },
        frontier,
        Pipeline::default(),
    );
    controller.add_listener(log.clone());

    controller.request_crawl_start().await;
    controller.request_crawl_start().await;
    controller.request_crawl_pause();

    // no work queued: resuming lets the frontier drain and the crawl stop
    controller.request_crawl_resume();
    controller.request_crawl_resume();
    finished(&controller).await;
    controller.request_crawl_stop();

    let states = log.states.lock().unwrap().clone();
    assert_eq!(
        states,
        vec![
            CrawlState::Preparing,
            CrawlState::Pausing,
            CrawlState::Paused,
            CrawlState::Running,
            CrawlState::Stopping,
            CrawlState::Finished,
        ]
    );
    assert!(controller.is_stop_complete());
}

#[tokio::test]
async fn test_pause_during_preparing_holds_work() {
    let frontier = frontier();
    schedule(&frontier, "https://a/");
    let fetch = Arc::new(CountingFetch::default());
    let controller = CrawlController::new(
        ControllerConfig {
            run_while_empty: true,
            ..controller_config(2)
        },
        frontier.clone(),
        Pipeline::new(fetch.clone(), Arc::new(NoopChain)),
    );
    let pauser = Arc::new(PauseWhilePreparing::default());
    let _ = pauser.controller.set(controller.clone());
    controller.add_listener(pauser);

    controller.request_crawl_start().await;
    assert!(controller.is_paused());
    assert_eq!(frontier.reached_state(), FrontierState::Pause);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fetch.calls.load(Ordering::SeqCst), 0);
    assert!(controller.is_paused());

    controller.request_crawl_resume();
    assert!(
        controller
            .wait_for_state(CrawlState::Empty, Duration::from_secs(2))
            .await
    );
    assert_eq!(fetch.calls.load(Ordering::SeqCst), 1);

    controller.request_crawl_stop();
    finished(&controller).await;
}
