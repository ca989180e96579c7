//! Integration tests for the frontier
//!
//! These tests drive the frontier directly from several tasks and check the
//! politeness and accounting guarantees.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sumi_engine::config::FrontierConfig;
use sumi_engine::frontier::FrontierState;
use sumi_engine::storage::{MemoryQueueStore, SqliteQueueStore};
use sumi_engine::uri::status;
use sumi_engine::{Checkpoint, Checkpointable, CrawlUri, Frontier};
use tempfile::TempDir;

fn test_config() -> FrontierConfig {
    FrontierConfig {
        min_delay_ms: 0,
        max_delay_ms: 100,
        delay_factor: 1.0,
        retry_delay_secs: 0,
        max_retries: 2,
        queue_store: None,
    }
}

fn memory_frontier() -> Arc<Frontier> {
    Arc::new(Frontier::new(test_config(), Box::new(MemoryQueueStore::new())))
}

async fn take(frontier: &Frontier) -> CrawlUri {
    tokio::time::timeout(Duration::from_secs(2), frontier.next())
        .await
        .expect("next() timed out")
        .expect("frontier terminated")
}

#[tokio::test]
async fn test_single_host_one_at_a_time() {
    let frontier = memory_frontier();
    for i in 0..3 {
        frontier
            .schedule(CrawlUri::new(&format!("https://a/{}", i)).unwrap())
            .unwrap();
    }
    frontier.unpause();

    let mut first = take(&frontier).await;
    assert_eq!(frontier.in_process_count(), 1);

    // the other two stay queued while the first is out
    let second = tokio::time::timeout(Duration::from_millis(100), frontier.next()).await;
    assert!(second.is_err());
    assert_eq!(frontier.queued_count(), 3);

    first.fetch_status = 200;
    frontier.finished(first);

    let second = take(&frontier).await;
    assert_eq!(second.url.path(), "/1");
    assert_eq!(frontier.queued_count(), 2);
}

#[tokio::test]
async fn test_concurrent_consumers_respect_politeness() {
    let frontier = memory_frontier();
    for host in ["a", "b", "c"] {
        for i in 0..5 {
            frontier
                .schedule(CrawlUri::new(&format!("https://{}/{}", host, i)).unwrap())
                .unwrap();
        }
    }
    frontier.unpause();

    let in_flight: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));
    let violations = Arc::new(Mutex::new(0usize));

    let mut consumers = Vec::new();
    for _ in 0..6 {
        let frontier = frontier.clone();
        let in_flight = in_flight.clone();
        let violations = violations.clone();
        consumers.push(tokio::spawn(async move {
            while let Some(mut uri) = frontier.next().await {
                {
                    let mut map = in_flight.lock().unwrap();
                    let count = map.entry(uri.class_key.clone()).or_default();
                    *count += 1;
                    if *count > 1 {
                        *violations.lock().unwrap() += 1;
                    }
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
                *in_flight.lock().unwrap().get_mut(&uri.class_key).unwrap() -= 1;

                uri.fetch_status = 200;
                frontier.finished(uri);
            }
        }));
    }

    let mut reached = frontier.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        reached.wait_for(|state| *state == FrontierState::Empty),
    )
    .await
    .unwrap()
    .unwrap();

    frontier.terminate();
    for consumer in consumers {
        consumer.await.unwrap();
    }

    assert_eq!(*violations.lock().unwrap(), 0);
    assert_eq!(frontier.counters().succeeded, 15);
    assert_eq!(frontier.reached_state(), FrontierState::Finish);
}

#[tokio::test]
async fn test_retry_until_exhausted() {
    let frontier = memory_frontier();
    frontier
        .schedule(CrawlUri::new("https://flaky/").unwrap())
        .unwrap();
    frontier.unpause();

    // attempts 1 and 2 are retried up to max_retries = 2
    let mut attempts = 0;
    loop {
        let mut uri = take(&frontier).await;
        uri.fetch_attempts += 1;
        attempts += 1;
        uri.fetch_status = status::S_CONNECT_LOST;
        frontier.finished(uri);
        if frontier.is_empty() {
            break;
        }
    }

    assert_eq!(attempts, 2);
    let counters = frontier.counters();
    assert_eq!(counters.deferred, 1);
    assert_eq!(counters.failed, 1);
}

#[tokio::test]
async fn test_hold_hands_out_nothing() {
    let frontier = memory_frontier();
    frontier
        .schedule(CrawlUri::new("https://a/").unwrap())
        .unwrap();
    frontier.request_state(FrontierState::Hold);
    assert_eq!(frontier.reached_state(), FrontierState::Hold);

    let next = tokio::time::timeout(Duration::from_millis(50), frontier.next()).await;
    assert!(next.is_err());

    frontier.unpause();
    assert_eq!(take(&frontier).await.class_key, "a");
}

#[tokio::test]
async fn test_sqlite_store_survives_checkpoint() {
    let dir = TempDir::new().unwrap();
    let checkpoint = Checkpoint::generate(&dir.path().join("checkpoints"), 1, false).unwrap();

    let store = SqliteQueueStore::new(&dir.path().join("queues.db")).unwrap();
    let frontier = Frontier::new(test_config(), Box::new(store));
    frontier
        .schedule(CrawlUri::new("https://a/1").unwrap())
        .unwrap();
    frontier
        .schedule(CrawlUri::new("https://b/1").unwrap())
        .unwrap();

    frontier.start_checkpoint(&checkpoint).await.unwrap();
    frontier.do_checkpoint(&checkpoint).await.unwrap();
    frontier.finish_checkpoint(&checkpoint).await;
    assert!(checkpoint.dir().join("frontier-queues.db").is_file());
    assert!(checkpoint.dir().join("frontier.json").is_file());

    let fresh = SqliteQueueStore::new(&dir.path().join("fresh.db")).unwrap();
    let recovered = Frontier::new(test_config(), Box::new(fresh));
    recovered.set_recovery_checkpoint(&checkpoint).await.unwrap();
    assert_eq!(recovered.queued_count(), 2);
    assert_eq!(recovered.group_count(), 2);

    recovered.unpause();
    let mut keys = vec![take(&recovered).await.class_key, take(&recovered).await.class_key];
    keys.sort();
    assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
}
