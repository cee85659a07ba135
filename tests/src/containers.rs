//! Testcontainer setup for Redis.
//!
//! Set `PIPELINE_TEST_REDIS_URL` to run against an existing server instead
//! of starting a container. Every context namespaces its queues, so a shared
//! server is fine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use job_queue::{ConsumerGroup, JobQueue, QueueStore, RedisStreamsStore};
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage,
};

static NEXT_NAMESPACE: AtomicUsize = AtomicUsize::new(0);

/// A Redis-backed store plus the container keeping it alive.
pub struct RedisContext {
    #[allow(dead_code)]
    redis: Option<ContainerAsync<GenericImage>>,
    pub redis_url: String,
    pub store: Arc<RedisStreamsStore>,
    namespace: String,
}

impl RedisContext {
    /// Start Redis (or use the override URL) and connect a store.
    pub async fn start() -> Self {
        let (redis, redis_url) = match std::env::var("PIPELINE_TEST_REDIS_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            Some(url) => (None, url),
            None => {
                let (container, url) = start_redis().await;
                (Some(container), url)
            }
        };

        let store = Arc::new(connect_when_ready(&redis_url, Duration::from_secs(30)).await);
        let namespace = format!(
            "it-{}-{}-{}",
            std::process::id(),
            NEXT_NAMESPACE.fetch_add(1, Ordering::Relaxed),
            chrono::Utc::now().timestamp_micros()
        );

        Self {
            redis,
            redis_url,
            store,
            namespace,
        }
    }

    /// A queue name unique to this context.
    pub fn name(&self, queue: &str) -> String {
        format!("{}:{queue}", self.namespace)
    }

    pub fn queue(&self, queue: &str, max_len: usize) -> JobQueue {
        JobQueue::new(self.store.clone(), self.name(queue), max_len)
    }

    pub fn group(&self, queue: &str, group: &str) -> ConsumerGroup {
        ConsumerGroup::new(self.store.clone(), self.name(queue), group)
    }
}

/// Start a Redis container, return container and connection URL.
pub async fn start_redis() -> (ContainerAsync<GenericImage>, String) {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));

    let container = image.start().await.expect("Failed to start Redis");

    let port = container.get_host_port_ipv4(6379).await.unwrap();
    let url = format!("redis://127.0.0.1:{}/0", port);

    (container, url)
}

/// Retry connecting until the server answers PING.
async fn connect_when_ready(url: &str, timeout: Duration) -> RedisStreamsStore {
    let start = std::time::Instant::now();

    while start.elapsed() < timeout {
        if let Ok(store) = RedisStreamsStore::connect(url).await {
            if store.ping().await.is_ok() {
                return store;
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    panic!("Redis at {} not ready after {:?}", url, timeout);
}
