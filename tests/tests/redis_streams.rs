//! Consumer-group semantics over a real Redis server.
//!
//! Needs Docker, or `PIPELINE_TEST_REDIS_URL` pointing at a server.

use std::sync::Arc;
use std::time::Duration;

use integration_tests::containers::RedisContext;
use integration_tests::fixtures::record;
use integration_tests::mocks::RecordingHandler;
use job_queue::{QueueStore, RedisStreamsStore};
use pipeline_core::Stage;
use tokio_util::sync::CancellationToken;
use worker::{
    RetryCoordinator, StageWorker, StageWorkerConfig, WorkerOutcome, WorkerPoolLauncher,
};

#[tokio::test]
async fn test_ensure_group_tolerates_existing_group() {
    let ctx = RedisContext::start().await;
    let group = ctx.group("phase1", "phase1-workers");

    assert!(!group.exists().await.unwrap());
    group.ensure().await.unwrap();
    group.ensure().await.unwrap();
    assert!(group.exists().await.unwrap());
}

#[tokio::test]
async fn test_missing_group_reports_nothing_pending() {
    let ctx = RedisContext::start().await;
    let queue = ctx.name("never-created");

    assert_eq!(ctx.store.pending_count(&queue, "nobody").await.unwrap(), 0);
    assert!(ctx.store.pending(&queue, "nobody", 10).await.unwrap().is_empty());
    assert!(!ctx.store.group_exists(&queue, "nobody").await.unwrap());
}

#[tokio::test]
async fn test_ack_is_idempotent_and_deletes_entry() {
    let ctx = RedisContext::start().await;
    let queue = ctx.queue("phase1", 1000);
    let group = ctx.group("phase1", "phase1-workers");
    group.ensure().await.unwrap();

    let id = queue.enqueue(&record(Stage::Phase1, "a")).await.unwrap();
    let delivery = group.read("c1", 1, Duration::ZERO).await.unwrap().remove(0);
    assert_eq!(delivery.id, id);
    assert_eq!(delivery.record().unwrap().payload["unit"], "a");
    assert_eq!(group.pending_count().await.unwrap(), 1);

    assert!(group.ack(&id).await.unwrap());
    assert!(!group.ack(&id).await.unwrap());
    assert_eq!(group.pending_count().await.unwrap(), 0);
    assert_eq!(queue.length().await.unwrap(), 0);
}

#[tokio::test]
async fn test_ack_of_undelivered_entry_keeps_it() {
    let ctx = RedisContext::start().await;
    let queue = ctx.queue("phase2", 1000);
    let group = ctx.group("phase2", "phase2-workers");
    group.ensure().await.unwrap();

    let id = queue.enqueue(&record(Stage::Phase2, "u")).await.unwrap();
    assert!(!group.ack(&id).await.unwrap());
    assert_eq!(queue.length().await.unwrap(), 1);

    let batch = group.read("c1", 10, Duration::ZERO).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, id);
}

#[tokio::test]
async fn test_each_entry_delivered_to_one_consumer() {
    let ctx = RedisContext::start().await;
    let queue = ctx.queue("phase1", 1000);
    let group = ctx.group("phase1", "phase1-workers");
    group.ensure().await.unwrap();
    for unit in ["a", "b", "c"] {
        queue.enqueue(&record(Stage::Phase1, unit)).await.unwrap();
    }

    let first = group.read("c1", 2, Duration::ZERO).await.unwrap();
    let second = group.read("c2", 2, Duration::ZERO).await.unwrap();
    let third = group.read("c3", 2, Duration::ZERO).await.unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 1);
    assert!(third.is_empty());
    assert!(first.iter().all(|d| d.id != second[0].id));
}

#[tokio::test]
async fn test_blocking_read_wakes_on_enqueue() {
    let ctx = RedisContext::start().await;
    let queue = ctx.queue("phase1", 1000);
    let group = ctx.group("phase1", "phase1-workers");
    group.ensure().await.unwrap();

    let reader = {
        let group = group.clone();
        tokio::spawn(async move { group.read("c1", 1, Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    queue.enqueue(&record(Stage::Phase1, "late")).await.unwrap();

    let batch = reader.await.unwrap().unwrap();
    assert_eq!(batch.len(), 1);
}

#[tokio::test]
async fn test_reclaim_moves_idle_entries_and_counts_delivery() {
    let ctx = RedisContext::start().await;
    let queue = ctx.queue("phase1", 1000);
    let group = ctx.group("phase1", "phase1-workers");
    group.ensure().await.unwrap();
    let id = queue.enqueue(&record(Stage::Phase1, "stuck")).await.unwrap();

    group.read("crashed", 1, Duration::ZERO).await.unwrap();
    assert!(group
        .reclaim("rescuer", Duration::from_secs(60))
        .await
        .unwrap()
        .is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let claimed = group.reclaim("rescuer", Duration::from_millis(20)).await.unwrap();
    assert_eq!(claimed, vec![id.clone()]);

    let pending = group.pending(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);
    assert_eq!(pending[0].consumer, "rescuer");
    assert_eq!(pending[0].delivery_count, 2);
}

#[tokio::test]
async fn test_pool_timeout_leaves_jobs_pending() {
    let ctx = RedisContext::start().await;
    let queue = ctx.queue("phase1", 1000);
    let group = ctx.group("phase1", "phase1-workers");
    group.ensure().await.unwrap();
    queue.enqueue(&record(Stage::Phase1, "slow")).await.unwrap();

    let handler = RecordingHandler::with_delay(Duration::from_secs(30));
    let worker = Arc::new(StageWorker::new(
        Stage::Phase1,
        queue.clone(),
        group.clone(),
        RetryCoordinator::new(group.clone(), queue.dead_letter(), Default::default()),
        Arc::new(handler.clone()),
        StageWorkerConfig {
            batch_size: 1,
            block_timeout: Duration::from_millis(20),
            idle_poll: Duration::from_millis(10),
        },
        CancellationToken::new(),
    ));

    let report = WorkerPoolLauncher::new("phase1-worker")
        .run_batch(
            move |id| {
                let worker = worker.clone();
                async move { worker.run(&id).await }
            },
            2,
            Duration::from_millis(300),
        )
        .await;

    assert!(report
        .workers
        .iter()
        .all(|w| w.outcome == WorkerOutcome::Timeout));
    assert_eq!(handler.call_count(), 0);
    assert_eq!(group.pending_count().await.unwrap(), 1);
    assert_eq!(queue.length().await.unwrap(), 1);
}

#[tokio::test]
async fn test_max_len_trims_approximately() {
    let ctx = RedisContext::start().await;
    let queue = ctx.queue("bounded", 10);
    for i in 0..500 {
        queue.enqueue(&record(Stage::Phase1, &i.to_string())).await.unwrap();
    }

    // `MAXLEN ~` trims whole stream nodes, so only bound it loosely.
    let length = queue.length().await.unwrap();
    assert!(length >= 10, "trimmed below the cap: {length}");
    assert!(length < 500, "never trimmed: {length}");

    queue.clear().await.unwrap();
    assert_eq!(queue.length().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unreachable_server_is_connectivity_error() {
    // Port 1 is never a Redis server.
    let err = match RedisStreamsStore::connect("redis://127.0.0.1:1/0").await {
        Ok(_) => panic!("connected to a closed port"),
        Err(e) => e,
    };
    assert_eq!(err.code(), "QUEUE_001");
    assert!(err.is_connectivity());
}

#[tokio::test]
async fn test_invalid_url_is_config_error() {
    let err = match RedisStreamsStore::connect("not a url").await {
        Ok(_) => panic!("accepted an invalid url"),
        Err(e) => e,
    };
    assert_eq!(err.code(), "CONFIG_001");
}
