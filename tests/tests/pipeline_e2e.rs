//! End-to-end tests for worker pools and full pipeline runs.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use integration_tests::fixtures::{fast_backoff, org_units, record, test_pipeline_config, user_units};
use integration_tests::mocks::{FailingHandler, RecordingHandler, RecordingMerge, StaticSource};
use integration_tests::setup::{TestContext, TestPipeline};
use pipeline_core::Stage;
use tokio_util::sync::CancellationToken;
use worker::{
    Collaborators, PipelineScheduler, RetryCoordinator, SharedHandler, StageWorker,
    StageWorkerConfig, WorkerOutcome, WorkerPoolLauncher,
};

fn stage_worker(ctx: &TestContext, stage: Stage, handler: SharedHandler) -> Arc<StageWorker> {
    let queue = ctx.queue(stage);
    let group = ctx.group(stage);
    let coordinator = RetryCoordinator::new(group.clone(), queue.dead_letter(), fast_backoff(3));
    Arc::new(StageWorker::new(
        stage,
        queue,
        group,
        coordinator,
        handler,
        StageWorkerConfig {
            batch_size: 1,
            block_timeout: Duration::from_millis(20),
            idle_poll: Duration::from_millis(10),
        },
        CancellationToken::new(),
    ))
}

/// 5 jobs, 2 workers, handler always succeeds.
#[tokio::test]
async fn test_two_workers_drain_five_jobs() {
    let ctx = TestContext::new();
    let queue = ctx.queue(Stage::Phase1);
    let group = ctx.group(Stage::Phase1);
    group.ensure().await.unwrap();

    let records: Vec<_> = (0..5).map(|i| record(Stage::Phase1, &i.to_string())).collect();
    let ids = queue.enqueue_all(&records).await.unwrap();

    let handler = RecordingHandler::with_delay(Duration::from_millis(20));
    let worker = stage_worker(&ctx, Stage::Phase1, Arc::new(handler.clone()));

    let report = WorkerPoolLauncher::new("phase1-worker")
        .run_batch(
            move |id| {
                let worker = worker.clone();
                async move { worker.run(&id).await }
            },
            2,
            Duration::from_secs(10),
        )
        .await;

    assert!(report.all_succeeded());
    assert_eq!(report.total(), 2);
    assert_eq!(report.processed(), 5);

    assert_eq!(queue.length().await.unwrap(), 0);
    assert_eq!(group.pending_count().await.unwrap(), 0);
    assert_eq!(queue.dead_letter().length().await.unwrap(), 0);

    let handled: HashSet<_> = handler.job_ids().into_iter().collect();
    let enqueued: HashSet<_> = ids.into_iter().collect();
    assert_eq!(handler.call_count(), 5);
    assert_eq!(handled, enqueued);
}

#[tokio::test]
async fn test_failing_job_does_not_block_others() {
    let ctx = TestContext::new();
    let queue = ctx.queue(Stage::Phase2);
    ctx.group(Stage::Phase2).ensure().await.unwrap();
    for i in 0..3 {
        queue.enqueue(&record(Stage::Phase2, &i.to_string())).await.unwrap();
    }

    let worker = stage_worker(&ctx, Stage::Phase2, Arc::new(FailingHandler::always()));
    let summary = worker.run("phase2-worker-1").await.unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.dead_lettered, 3);
    assert_eq!(queue.length().await.unwrap(), 0);
    assert_eq!(queue.dead_letter().length().await.unwrap(), 3);
}

#[tokio::test]
async fn test_run_once_processes_both_phases_in_one_window() {
    let pipeline = TestPipeline::new(
        StaticSource {
            phase1: org_units(4),
            phase2: user_units(3),
            fail: false,
        },
        2,
    );

    let report = pipeline
        .orchestrator
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(report.phase1.enqueued, 4);
    assert_eq!(report.phase2.enqueued, 3);
    assert!(report.phase1.drained && report.phase2.drained);
    assert_eq!(pipeline.phase1.call_count(), 4);
    assert_eq!(pipeline.phase2.call_count(), 3);

    // Every job of both stages carries the run's window.
    let records = pipeline.phase1.records().into_iter().chain(pipeline.phase2.records());
    for r in records {
        assert_eq!(r.window_id, report.window_id);
    }
    assert!(pipeline.phase1.records().iter().all(|r| r.stage == Stage::Phase1));
    assert!(pipeline.phase2.records().iter().all(|r| r.stage == Stage::Phase2));

    assert_eq!(pipeline.merge.windows(), vec![report.window_id.clone()]);
    let (start, end) = report.window_id.split_once("..").unwrap();
    assert!(start < end);

    for stage in Stage::ALL {
        assert_eq!(pipeline.ctx.queue(stage).length().await.unwrap(), 0);
        assert_eq!(pipeline.ctx.group(stage).pending_count().await.unwrap(), 0);
    }
}

#[tokio::test]
async fn test_merge_runs_even_when_phase1_jobs_dead_letter() {
    let ctx = TestContext::new();
    let merge = RecordingMerge::default();
    let phase2 = RecordingHandler::new();

    let orchestrator = ctx.orchestrator(
        test_pipeline_config(1, 1),
        Collaborators {
            source: Arc::new(StaticSource {
                phase1: org_units(2),
                phase2: user_units(1),
                fail: false,
            }),
            phase1: Arc::new(FailingHandler::always()),
            phase2: Arc::new(phase2.clone()),
            merge: Arc::new(merge.clone()),
        },
    );

    let report = orchestrator.run_once(&CancellationToken::new()).await.unwrap();

    assert_eq!(merge.windows().len(), 1);
    assert_eq!(phase2.call_count(), 1);
    assert_eq!(ctx.queue(Stage::Phase1).dead_letter().length().await.unwrap(), 2);
    match &report.phase1.pool.workers[0].outcome {
        WorkerOutcome::Success(summary) => assert_eq!(summary.dead_lettered, 2),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn test_work_source_failure_aborts_run() {
    let pipeline = TestPipeline::new(
        StaticSource {
            fail: true,
            ..Default::default()
        },
        1,
    );

    let err = pipeline
        .orchestrator
        .run_once(&CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "INTERNAL_001");
    assert!(pipeline.merge.windows().is_empty());
    assert_eq!(pipeline.ctx.queue(Stage::Phase1).length().await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancelled_run_stops_before_merge() {
    let pipeline = TestPipeline::new(
        StaticSource {
            phase1: org_units(3),
            phase2: user_units(3),
            fail: false,
        },
        2,
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(pipeline.orchestrator.run_once(&cancel).await.is_err());

    assert_eq!(pipeline.phase1.call_count(), 0);
    assert!(pipeline.merge.windows().is_empty());
    // Enqueued jobs stay in the queue for the next run.
    assert_eq!(pipeline.ctx.queue(Stage::Phase1).length().await.unwrap(), 3);
}

#[tokio::test]
async fn test_overlapping_trigger_is_dropped() {
    let pipeline = TestPipeline::build(
        StaticSource {
            phase1: org_units(1),
            phase2: user_units(1),
            fail: false,
        },
        test_pipeline_config(1, 1),
        RecordingMerge {
            delay: Duration::from_millis(300),
            ..Default::default()
        },
    );
    let scheduler = Arc::new(PipelineScheduler::new(pipeline.orchestrator.clone()).unwrap());
    let cancel = CancellationToken::new();

    let first = {
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.trigger(&cancel).await })
    };

    // Wait until the first run holds the slot.
    while !scheduler.is_running() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(scheduler.trigger(&cancel).await.is_none());

    let report = first.await.unwrap().expect("first trigger runs").unwrap();
    assert!(report.succeeded());
    assert!(!scheduler.is_running());
    assert_eq!(pipeline.merge.windows().len(), 1);

    // The slot is free again.
    assert!(scheduler.trigger(&cancel).await.is_some());
}
