//! Structured logging for pipeline runs.
//!
//! Run-scoped context (`run_id`, `window_id`) travels on spans, so every
//! worker log line emitted inside a run carries it. Span close events are
//! off by default; turning them on logs per-run and per-stage durations.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Directives applied when neither `RUST_LOG` nor a filter is given.
pub const DEFAULT_FILTER: &str = "info,tower_http=warn";

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// EnvFilter directives (e.g. "info", "worker=debug,job_queue=debug")
    pub filter: String,
    pub json: bool,
    /// Emit span close events with their busy/idle timings
    pub span_timings: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            json: false,
            span_timings: false,
        }
    }
}

impl TracingConfig {
    /// Reads `RUST_LOG`, `PIPELINE_LOG_JSON` and `PIPELINE_LOG_SPANS`.
    pub fn from_env() -> Self {
        Self {
            filter: std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
            json: env_flag("PIPELINE_LOG_JSON"),
            span_timings: env_flag("PIPELINE_LOG_SPANS"),
        }
    }

    fn span_events(&self) -> FmtSpan {
        if self.span_timings {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| parse_flag(&v))
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Installs the global subscriber. Returns `false` if one was already set.
pub fn init_tracing(config: TracingConfig) -> bool {
    let env_filter =
        EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let installed = if config.json {
        let fmt_layer = fmt::layer()
            .json()
            .with_span_events(config.span_events())
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_thread_ids(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .is_ok()
    } else {
        let fmt_layer = fmt::layer()
            .with_span_events(config.span_events())
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::info!(filter = %config.filter, json = config.json, "Logging initialized");
    }
    installed
}

/// Initialize logging from environment variables.
pub fn init_tracing_from_env() -> bool {
    init_tracing(TracingConfig::from_env())
}
