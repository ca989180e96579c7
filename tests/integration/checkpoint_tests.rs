//! Integration tests for checkpointing and recovery
//!
//! Each test runs a real controller over an in-memory frontier and writes
//! checkpoints into a temporary directory.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use sumi_engine::checkpoint::{CheckpointError, VALIDITY_STAMP};
use sumi_engine::config::{CheckpointConfig, ControllerConfig, FrontierConfig};
use sumi_engine::pipeline::NoopChain;
use sumi_engine::storage::MemoryQueueStore;
use sumi_engine::{
    Checkpoint, CheckpointService, Checkpointable, CrawlController, CrawlState, CrawlUri, Frontier,
    Pipeline, ProcessError, ProcessorChain, StatisticsTracker, WorkerContext,
};
use tempfile::TempDir;
use tokio::sync::{mpsc, Semaphore};

struct Crawl {
    frontier: Arc<Frontier>,
    controller: CrawlController,
    service: Arc<CheckpointService>,
}

fn checkpoint_config(dir: &TempDir) -> CheckpointConfig {
    CheckpointConfig {
        checkpoints_dir: dir.path().join("checkpoints").to_string_lossy().into_owned(),
        ..CheckpointConfig::default()
    }
}

fn crawl(controller_config: ControllerConfig, checkpoints: CheckpointConfig, pipeline: Pipeline) -> Crawl {
    let frontier = Arc::new(Frontier::new(
        FrontierConfig {
            min_delay_ms: 0,
            ..FrontierConfig::default()
        },
        Box::new(MemoryQueueStore::new()),
    ));
    let stats = Arc::new(StatisticsTracker::new());
    frontier.add_listener(stats.clone());
    let controller = CrawlController::new(
        ControllerConfig {
            reserve_blocks: 0,
            ..controller_config
        },
        frontier.clone(),
        pipeline,
    );
    let service = Arc::new(CheckpointService::new(checkpoints, controller.clone(), stats));
    Crawl {
        frontier,
        controller,
        service,
    }
}

fn paused_at_start(workers: usize) -> ControllerConfig {
    ControllerConfig {
        max_workers: workers,
        pause_at_start: true,
        ..ControllerConfig::default()
    }
}

async fn stop(controller: &CrawlController) {
    controller.request_crawl_stop();
    tokio::time::timeout(Duration::from_secs(5), controller.wait_until_finished())
        .await
        .expect("crawl did not finish");
}

struct Fetched;

#[async_trait]
impl ProcessorChain for Fetched {
    async fn process(&self, uri: &mut CrawlUri, _ctx: &WorkerContext) -> Result<(), ProcessError> {
        uri.fetch_status = 200;
        Ok(())
    }
}

/// Disposition chain that holds each URI until a permit is released
struct GatedDisposition {
    entered: mpsc::UnboundedSender<String>,
    permits: Arc<Semaphore>,
}

#[async_trait]
impl ProcessorChain for GatedDisposition {
    async fn process(&self, uri: &mut CrawlUri, _ctx: &WorkerContext) -> Result<(), ProcessError> {
        let _ = self.entered.send(uri.url.to_string());
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ProcessError::Recoverable(e.to_string()))?;
        permit.forget();
        Ok(())
    }
}

/// A component that cannot be written
struct Broken;

#[async_trait]
impl Checkpointable for Broken {
    fn checkpoint_name(&self) -> &str {
        "broken"
    }

    async fn start_checkpoint(&self, _checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        Ok(())
    }

    async fn do_checkpoint(&self, _checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        Err(CheckpointError::Io(std::io::Error::other("disk full")))
    }

    async fn finish_checkpoint(&self, _checkpoint: &Checkpoint) {}

    async fn set_recovery_checkpoint(&self, _checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        Ok(())
    }
}

/// A component whose checkpoint start waits for a permit
struct Stalled {
    entered: mpsc::UnboundedSender<()>,
    permits: Arc<Semaphore>,
}

#[async_trait]
impl Checkpointable for Stalled {
    fn checkpoint_name(&self) -> &str {
        "stalled"
    }

    async fn start_checkpoint(&self, _checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let _ = self.entered.send(());
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| CheckpointError::Io(std::io::Error::other(e.to_string())))?;
        permit.forget();
        Ok(())
    }

    async fn do_checkpoint(&self, _checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        Ok(())
    }

    async fn finish_checkpoint(&self, _checkpoint: &Checkpoint) {}

    async fn set_recovery_checkpoint(&self, _checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_checkpoint_waits_for_dispositions() {
    let dir = TempDir::new().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let permits = Arc::new(Semaphore::new(0));
    let crawl = crawl(
        ControllerConfig {
            max_workers: 2,
            run_while_empty: true,
            ..ControllerConfig::default()
        },
        checkpoint_config(&dir),
        Pipeline::new(
            Arc::new(Fetched),
            Arc::new(GatedDisposition {
                entered: tx,
                permits: permits.clone(),
            }),
        ),
    );
    crawl.frontier.schedule(CrawlUri::new("https://a/").unwrap()).unwrap();
    crawl.frontier.schedule(CrawlUri::new("https://b/").unwrap()).unwrap();
    crawl.controller.request_crawl_start().await;

    for _ in 0..2 {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
    }
    assert_eq!(crawl.frontier.dispositions_in_progress(), 2);

    let service = crawl.service.clone();
    let request = tokio::spawn(async move { service.request_checkpoint().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!request.is_finished());
    assert_eq!(crawl.controller.state(), CrawlState::Pausing);

    permits.add_permits(2);
    let name = tokio::time::timeout(Duration::from_secs(5), request)
        .await
        .unwrap()
        .unwrap()
        .expect("checkpoint failed");

    assert!(name.starts_with("cp00001-"));
    let checkpoint_dir = crawl.service.checkpoints_dir().join(&name);
    let stamp = std::fs::read_to_string(checkpoint_dir.join(VALIDITY_STAMP)).unwrap();
    assert!(stamp.contains("2 finished"));
    assert!(checkpoint_dir.join("frontier.json").is_file());
    assert!(checkpoint_dir.join("statistics.json").is_file());

    // the crawl was running before the checkpoint, so it runs again after
    assert!(
        crawl
            .controller
            .wait_for_state(CrawlState::Empty, Duration::from_secs(2))
            .await
    );
    stop(&crawl.controller).await;
}

#[tokio::test]
async fn test_failed_component_leaves_no_stamp() {
    let dir = TempDir::new().unwrap();
    let crawl = crawl(
        ControllerConfig {
            max_workers: 1,
            run_while_empty: true,
            ..ControllerConfig::default()
        },
        checkpoint_config(&dir),
        Pipeline::default(),
    );
    crawl.service.register(Arc::new(Broken));
    crawl.controller.request_crawl_start().await;
    assert!(
        crawl
            .controller
            .wait_for_state(CrawlState::Empty, Duration::from_secs(2))
            .await
    );

    assert_eq!(crawl.service.request_checkpoint().await, None);
    let attempt = crawl.service.last_attempt().unwrap();
    assert!(!attempt.success);
    assert_eq!(attempt.name, "cp00001");
    assert!(attempt.error.unwrap().contains("broken"));
    assert!(crawl.service.find_available_checkpoints().is_empty());
    assert_eq!(crawl.service.last_checkpoint(), None);

    // failed attempts still consume a number
    assert_eq!(crawl.service.next_checkpoint_number(), 2);
    assert!(
        crawl
            .controller
            .wait_for_state(CrawlState::Empty, Duration::from_secs(2))
            .await
    );
    stop(&crawl.controller).await;
}

#[tokio::test]
async fn test_no_checkpoint_before_start() {
    let dir = TempDir::new().unwrap();
    let crawl = crawl(paused_at_start(1), checkpoint_config(&dir), Pipeline::default());

    assert_eq!(crawl.service.request_checkpoint().await, None);
    assert_eq!(crawl.service.next_checkpoint_number(), 1);
    assert!(!dir.path().join("checkpoints").exists());
}

#[tokio::test]
async fn test_recover_continues_numbering() {
    let dir = TempDir::new().unwrap();

    let first = crawl(paused_at_start(2), checkpoint_config(&dir), Pipeline::default());
    for uri in ["https://a/1", "https://a/2", "https://b/1"] {
        first.frontier.schedule(CrawlUri::new(uri).unwrap()).unwrap();
    }
    first.controller.request_crawl_start().await;
    let one = first.service.request_checkpoint().await.unwrap();
    let two = first.service.request_checkpoint().await.unwrap();
    assert!(one.starts_with("cp00001-"));
    assert!(two.starts_with("cp00002-"));
    // a paused crawl stays paused
    assert!(first.controller.is_paused());
    stop(&first.controller).await;

    let second = crawl(
        paused_at_start(2),
        checkpoint_config(&dir),
        Pipeline::new(Arc::new(Fetched), Arc::new(NoopChain)),
    );
    assert!(second.service.has_available_checkpoints());
    assert_eq!(second.service.find_available_checkpoints()[0].name(), two);

    second
        .service
        .set_recovery_checkpoint_by_name(&two)
        .await
        .unwrap();
    assert_eq!(second.service.recovery_checkpoint(), Some(two.clone()));
    assert_eq!(second.service.next_checkpoint_number(), 3);
    assert!(!second.service.has_available_checkpoints());
    assert_eq!(second.frontier.queued_count(), 3);
    assert_eq!(second.frontier.group_count(), 2);

    second.controller.request_crawl_start().await;
    let three = second.service.request_checkpoint().await.unwrap();
    assert!(three.starts_with("rcp00003-"));

    let late = second.service.set_recovery_checkpoint_by_name(&two).await;
    assert!(matches!(late, Err(CheckpointError::AfterLaunch)));

    second.controller.request_crawl_resume();
    tokio::time::timeout(Duration::from_secs(5), second.controller.wait_until_finished())
        .await
        .unwrap();
    assert_eq!(second.frontier.counters().succeeded, 3);
}

#[tokio::test]
async fn test_recover_unknown_checkpoint() {
    let dir = TempDir::new().unwrap();
    let crawl = crawl(paused_at_start(1), checkpoint_config(&dir), Pipeline::default());

    let result = crawl
        .service
        .set_recovery_checkpoint_by_name("cp00009-20240101000000")
        .await;
    assert!(matches!(result, Err(CheckpointError::NotFound(_))));
    assert_eq!(crawl.service.recovery_checkpoint(), None);
}

#[tokio::test]
async fn test_forget_all_but_latest() {
    let dir = TempDir::new().unwrap();
    let crawl = crawl(
        paused_at_start(1),
        CheckpointConfig {
            forget_all_but_latest: true,
            ..checkpoint_config(&dir)
        },
        Pipeline::default(),
    );
    crawl.controller.request_crawl_start().await;

    let one = crawl.service.request_checkpoint().await.unwrap();
    let two = crawl.service.request_checkpoint().await.unwrap();

    let root = crawl.service.checkpoints_dir();
    assert!(!root.join(&one).exists());
    assert!(root.join(&two).join(VALIDITY_STAMP).is_file());
    assert_eq!(crawl.service.last_checkpoint(), Some(two));
    stop(&crawl.controller).await;
}

#[tokio::test]
async fn test_paused_without_progress_skips_timed_checkpoint() {
    let dir = TempDir::new().unwrap();
    let crawl = crawl(paused_at_start(1), checkpoint_config(&dir), Pipeline::default());
    crawl.frontier.schedule(CrawlUri::new("https://a/").unwrap()).unwrap();
    crawl.controller.request_crawl_start().await;

    let one = crawl.service.request_checkpoint().await.unwrap();
    assert!(one.starts_with("cp00001-"));
    assert_eq!(crawl.service.next_checkpoint_number(), 2);

    // nothing has moved since the last checkpoint
    assert_eq!(crawl.service.auto_checkpoint().await, None);
    assert_eq!(crawl.service.next_checkpoint_number(), 2);
    assert_eq!(crawl.service.last_checkpoint(), Some(one));

    // an operator request in the same state is still honored
    let two = crawl.service.request_checkpoint().await.unwrap();
    assert!(two.starts_with("cp00002-"));
    assert!(crawl
        .service
        .checkpoints_dir()
        .join(&two)
        .join(VALIDITY_STAMP)
        .is_file());
    assert!(crawl.controller.is_paused());
    stop(&crawl.controller).await;
}

#[tokio::test]
async fn test_timed_checkpoint_skips_while_another_runs() {
    let dir = TempDir::new().unwrap();
    let crawl = crawl(paused_at_start(1), checkpoint_config(&dir), Pipeline::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let permits = Arc::new(Semaphore::new(0));
    crawl.service.register(Arc::new(Stalled {
        entered: tx,
        permits: permits.clone(),
    }));
    crawl.controller.request_crawl_start().await;

    let service = crawl.service.clone();
    let request = tokio::spawn(async move { service.request_checkpoint().await });
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(crawl.service.auto_checkpoint().await, None);
    assert_eq!(crawl.service.next_checkpoint_number(), 2);

    permits.add_permits(1);
    let name = tokio::time::timeout(Duration::from_secs(5), request)
        .await
        .unwrap()
        .unwrap()
        .expect("checkpoint failed");
    assert!(name.starts_with("cp00001-"));
    stop(&crawl.controller).await;
}

#[tokio::test]
async fn test_checkpoint_timer_ends_with_crawl() {
    let dir = TempDir::new().unwrap();
    let idle = crawl(paused_at_start(1), checkpoint_config(&dir), Pipeline::default());
    assert!(idle.service.start_auto_checkpoints().is_none());

    let crawl = crawl(
        paused_at_start(1),
        CheckpointConfig {
            interval_minutes: 1,
            ..checkpoint_config(&dir)
        },
        Pipeline::default(),
    );
    crawl.controller.request_crawl_start().await;
    let timer = crawl.service.start_auto_checkpoints().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!timer.is_finished());

    stop(&crawl.controller).await;
    tokio::time::timeout(Duration::from_secs(2), timer)
        .await
        .expect("timer outlived the crawl")
        .unwrap();
    assert_eq!(crawl.service.next_checkpoint_number(), 1);
}
