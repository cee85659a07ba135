//! Common test setup functions.

use std::sync::Arc;

use api::{router, AppState};
use axum::Router;
use job_queue::{ConsumerGroup, JobQueue, MemoryStore, QueueConfig, SharedStore};
use pipeline_core::Stage;
use worker::{Collaborators, PipelineConfig, PipelineOrchestrator};

use crate::fixtures::{test_pipeline_config, test_queue_config};
use crate::mocks::{RecordingHandler, RecordingMerge, StaticSource};

/// Stage queues over a fresh in-memory store, plus the status router.
pub struct TestContext {
    pub store: SharedStore,
    pub queues: QueueConfig,
    pub router: Router,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: SharedStore) -> Self {
        let queues = test_queue_config();
        let router = router(AppState::new(store.clone(), queues.clone()));
        Self {
            store,
            queues,
            router,
        }
    }

    pub fn queue(&self, stage: Stage) -> JobQueue {
        let names = self.queues.stage(stage);
        JobQueue::new(self.store.clone(), &names.queue, self.queues.max_len)
    }

    pub fn group(&self, stage: Stage) -> ConsumerGroup {
        let names = self.queues.stage(stage);
        ConsumerGroup::new(self.store.clone(), &names.queue, &names.group)
    }

    pub fn orchestrator(
        &self,
        config: PipelineConfig,
        collaborators: Collaborators,
    ) -> Arc<PipelineOrchestrator> {
        Arc::new(
            PipelineOrchestrator::new(self.store.clone(), self.queues.clone(), config, collaborators)
                .expect("valid pipeline config"),
        )
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Recording collaborators wired into an orchestrator.
pub struct TestPipeline {
    pub ctx: TestContext,
    pub phase1: RecordingHandler,
    pub phase2: RecordingHandler,
    pub merge: RecordingMerge,
    pub orchestrator: Arc<PipelineOrchestrator>,
}

impl TestPipeline {
    pub fn new(source: StaticSource, workers: usize) -> Self {
        Self::build(source, test_pipeline_config(workers, workers), RecordingMerge::default())
    }

    pub fn build(source: StaticSource, config: PipelineConfig, merge: RecordingMerge) -> Self {
        let ctx = TestContext::new();
        let phase1 = RecordingHandler::new();
        let phase2 = RecordingHandler::new();

        let orchestrator = ctx.orchestrator(
            config,
            Collaborators {
                source: Arc::new(source),
                phase1: Arc::new(phase1.clone()),
                phase2: Arc::new(phase2.clone()),
                merge: Arc::new(merge.clone()),
            },
        );

        Self {
            ctx,
            phase1,
            phase2,
            merge,
            orchestrator,
        }
    }
}
