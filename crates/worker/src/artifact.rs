//! File artifacts and the built-in collaborators that produce them.
//!
//! Layout under the output directory:
//!
//! ```text
//! <output>/<window>/phase1_<unit>.json
//! <output>/<window>/phase1_MERGED.json
//! <output>/<window>/phase2_<unit>.json
//! ```
//!
//! Every write goes to `<path>.tmp` first and is renamed into place, so a
//! crashed worker never leaves a partial artifact under its final name and
//! a redelivered job simply replaces the previous file.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use pipeline_core::{JobId, JobRecord, Payload, Stage, Window};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::WorkConfig;
use crate::handler::{JobHandler, MergeStep, WorkSource};

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_\-T:.]").expect("invalid file name pattern"));

/// Suffix of the merged phase-1 artifact.
pub const MERGED_SUFFIX: &str = "MERGED";

/// Replaces characters that are unsafe in file names with `-`.
pub fn sanitize_file_component(raw: &str) -> String {
    UNSAFE_CHARS.replace_all(raw, "-").into_owned()
}

/// Writes `bytes` to `<path>.tmp`, then renames it over `path`.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Directory holding all artifacts of one window.
pub fn window_dir(output_dir: &Path, window_id: &str) -> PathBuf {
    output_dir.join(sanitize_file_component(window_id))
}

/// Contents of one per-job artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobArtifact {
    pub job_id: JobId,
    pub window_id: String,
    pub stage: Stage,
    pub unit: String,
    pub payload: Payload,
    pub retry_count: u32,
    pub processed_at: chrono::DateTime<Utc>,
}

/// Writes one JSON artifact per job, named after the job's unit.
pub struct ArtifactHandler {
    output_dir: PathBuf,
    unit_key: String,
}

impl ArtifactHandler {
    pub fn new(output_dir: impl Into<PathBuf>, unit_key: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            unit_key: unit_key.into(),
        }
    }

    pub fn artifact_path(&self, record: &JobRecord, unit: &str) -> PathBuf {
        window_dir(&self.output_dir, &record.window_id).join(format!(
            "{}_{}.json",
            record.stage,
            sanitize_file_component(unit)
        ))
    }
}

#[async_trait]
impl JobHandler for ArtifactHandler {
    async fn handle(&self, job_id: &JobId, record: &JobRecord) -> anyhow::Result<()> {
        let unit = record
            .get(&self.unit_key)
            .with_context(|| format!("payload is missing '{}'", self.unit_key))?;

        let artifact = JobArtifact {
            job_id: job_id.clone(),
            window_id: record.window_id.clone(),
            stage: record.stage,
            unit: unit.to_string(),
            payload: record.payload.clone(),
            retry_count: record.retry_count,
            processed_at: Utc::now(),
        };

        let path = self.artifact_path(record, unit);
        write_atomic(&path, &serde_json::to_vec_pretty(&artifact)?)
            .await
            .with_context(|| format!("writing {}", path.display()))?;

        debug!(job_id = %job_id, path = %path.display(), "Wrote artifact");
        Ok(())
    }
}

/// Combines every phase-1 artifact of a window into one file.
pub struct ArtifactMerge {
    output_dir: PathBuf,
}

impl ArtifactMerge {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn merged_path(&self, window_id: &str) -> PathBuf {
        window_dir(&self.output_dir, window_id).join(format!("{}_{MERGED_SUFFIX}.json", Stage::Phase1))
    }
}

#[async_trait]
impl MergeStep for ArtifactMerge {
    async fn merge(&self, window: &Window) -> anyhow::Result<()> {
        let dir = window_dir(&self.output_dir, &window.id);
        let merged_path = self.merged_path(&window.id);
        let prefix = format!("{}_", Stage::Phase1);

        let mut parts: Vec<(String, JobArtifact)> = Vec::new();
        if tokio::fs::try_exists(&dir).await? {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if !name.starts_with(&prefix) || !name.ends_with(".json") || path == merged_path {
                    continue;
                }

                let bytes = tokio::fs::read(&path).await?;
                let artifact: JobArtifact = serde_json::from_slice(&bytes)
                    .with_context(|| format!("parsing {}", path.display()))?;
                parts.push((name.to_string(), artifact));
            }
        }

        parts.sort_by(|a, b| a.0.cmp(&b.0));
        let artifacts: Vec<JobArtifact> = parts.into_iter().map(|(_, a)| a).collect();

        write_atomic(&merged_path, &serde_json::to_vec_pretty(&artifacts)?).await?;
        info!(
            window_id = %window.id,
            parts = artifacts.len(),
            path = %merged_path.display(),
            "Merged phase1 artifacts"
        );
        Ok(())
    }
}

/// Work source backed by fixed unit lists.
pub struct StaticWorkSource {
    config: WorkConfig,
}

impl StaticWorkSource {
    pub fn new(config: WorkConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl WorkSource for StaticWorkSource {
    async fn work_units(&self, stage: Stage) -> anyhow::Result<Vec<Payload>> {
        let units = match stage {
            Stage::Phase1 => &self.config.phase1_units,
            Stage::Phase2 => &self.config.phase2_units,
        };
        let key = self.config.key(stage);

        Ok(units
            .iter()
            .map(|unit| Payload::from([(key.to_string(), unit.clone())]))
            .collect())
    }
}
