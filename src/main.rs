//! Stage Pipeline
//!
//! Scheduled two-phase batch pipeline:
//! - Window-tagged jobs fanned out through consumer-group queues
//! - Worker pools with in-place retry and dead-letter quarantine
//! - Drain barrier and merge step between phases
//! - Read-only HTTP status surface

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use api::{router, AppState};
use job_queue::{open_store, QueueBackend, QueueConfig, QueueStore};
use telemetry::{health, init_tracing_from_env};
use worker::artifact::{ArtifactHandler, ArtifactMerge, StaticWorkSource};
use worker::{Collaborators, PipelineConfig, PipelineOrchestrator, PipelineScheduler, WorkConfig};

/// Application configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Config {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,

    #[serde(default)]
    queue: QueueConfig,

    #[serde(default)]
    pipeline: PipelineConfig,

    #[serde(default)]
    work: WorkConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            queue: QueueConfig::default(),
            pipeline: PipelineConfig::default(),
            work: WorkConfig::default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing_from_env();

    info!("Starting Stage Pipeline v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;

    info!(
        backend = ?config.queue.backend,
        phase1_queue = %config.queue.phase1.queue,
        phase2_queue = %config.queue.phase2.queue,
        phase1_workers = config.pipeline.phase1_workers,
        phase2_workers = config.pipeline.phase2_workers,
        cron = %config.pipeline.cron_spec,
        "Loaded pipeline config"
    );

    let store = open_store(&config.queue)
        .await
        .context("Failed to open queue store")?;

    check_health(store.as_ref()).await;

    let collaborators = Collaborators {
        source: Arc::new(StaticWorkSource::new(config.work.clone())),
        phase1: Arc::new(ArtifactHandler::new(
            &config.work.output_dir,
            &config.work.phase1_key,
        )),
        phase2: Arc::new(ArtifactHandler::new(
            &config.work.output_dir,
            &config.work.phase2_key,
        )),
        merge: Arc::new(ArtifactMerge::new(&config.work.output_dir)),
    };

    let orchestrator = Arc::new(
        PipelineOrchestrator::new(
            store.clone(),
            config.queue.clone(),
            config.pipeline.clone(),
            collaborators,
        )
        .context("Invalid pipeline configuration")?,
    );

    if config.pipeline.clear_queues_on_start {
        warn!("Clearing stage queues before start");
        orchestrator
            .clear_queues()
            .await
            .context("Failed to clear stage queues")?;
    }

    let scheduler = Arc::new(
        PipelineScheduler::new(orchestrator.clone()).context("Invalid scheduler configuration")?,
    );

    let shutdown = CancellationToken::new();
    let scheduler_handle = tokio::spawn(scheduler.clone().run(shutdown.clone()));

    let app = router(AppState::new(store.clone(), config.queue.clone()));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid server address")?;

    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    // Run server with graceful shutdown
    let token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            token.cancel();
        })
        .await
        .context("Server error")?;

    info!("Shutting down...");
    shutdown.cancel();

    if let Err(e) = scheduler_handle.await {
        error!("Scheduler task failed: {}", e);
    }

    // An in-flight run sees the same token: workers finish their current job.
    while scheduler.is_running() {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&Config::default())?)
        // Load from config file if exists
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("PIPELINE")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let mut config: Config = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    // Flat overrides; nested parsing is unreliable with underscored field names
    if let Ok(url) = std::env::var("PIPELINE_REDIS_URL") {
        config.queue.redis_url = url;
    }
    if let Ok(backend) = std::env::var("PIPELINE_QUEUE_BACKEND") {
        config.queue.backend = match backend.to_lowercase().as_str() {
            "redis" => QueueBackend::Redis,
            "memory" => QueueBackend::Memory,
            other => anyhow::bail!("Unknown queue backend: {other}"),
        };
    }
    if let Ok(spec) = std::env::var("PIPELINE_CRON_SPEC") {
        config.pipeline.cron_spec = spec;
    }
    if let Ok(workers) = std::env::var("PIPELINE_PHASE1_WORKERS") {
        config.pipeline.phase1_workers = workers
            .parse()
            .context("PIPELINE_PHASE1_WORKERS must be a positive integer")?;
    }
    if let Ok(workers) = std::env::var("PIPELINE_PHASE2_WORKERS") {
        config.pipeline.phase2_workers = workers
            .parse()
            .context("PIPELINE_PHASE2_WORKERS must be a positive integer")?;
    }
    if let Ok(count) = std::env::var("PIPELINE_BATCH_COUNT") {
        config.queue.batch_size = count
            .parse()
            .context("PIPELINE_BATCH_COUNT must be a positive integer")?;
    }

    Ok(config)
}

/// Check component health on startup.
async fn check_health(store: &dyn QueueStore) {
    if job_queue::health::check_connection(store).await {
        health().queue_store.set_healthy();
        info!("Queue store connection: healthy");
    } else {
        health().queue_store.set_unhealthy("Connection failed");
        error!("Queue store connection: unhealthy");
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
