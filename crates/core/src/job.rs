//! Job records and their flat wire encoding.
//!
//! Records travel through the backing store as flat string maps so that any
//! stream-like log can carry them:
//!
//! | field         | value                              |
//! |---------------|------------------------------------|
//! | `window_id`   | window correlation tag             |
//! | `stage`       | `phase1` / `phase2`                |
//! | `created_at`  | RFC 3339 timestamp                 |
//! | `retry_count` | integer, owned by the retry layer  |
//! | `payload`     | JSON object of string values       |

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Flat field map stored per queue entry.
pub type Fields = BTreeMap<String, String>;

/// Domain payload of a job (e.g. `org_id` or `user_id`).
pub type Payload = BTreeMap<String, String>;

/// Value written to `retry_count` on dead-lettered records.
pub const MAX_EXCEEDED: &str = "max_exceeded";

/// Pipeline stage a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Phase1,
    Phase2,
}

impl Stage {
    pub const ALL: [Stage; 2] = [Stage::Phase1, Stage::Phase2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phase1 => "phase1",
            Self::Phase2 => "phase2",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "phase1" => Ok(Self::Phase1),
            "phase2" => Ok(Self::Phase2),
            other => Err(Error::invalid_record(format!("unknown stage: {other}"))),
        }
    }
}

/// Queue-assigned job identifier, `"<millis>-<seq>"`.
///
/// Opaque to callers; ordering compares the numeric parts so ids sort in
/// enqueue order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_parts(millis: u64, seq: u64) -> Self {
        Self(format!("{millis}-{seq}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric `(millis, seq)` parts, if the id is well formed.
    pub fn parts(&self) -> Option<(u64, u64)> {
        let (millis, seq) = self.0.split_once('-')?;
        Some((millis.parse().ok()?, seq.parse().ok()?))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialOrd for JobId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for JobId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.parts(), other.parts()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => self.0.cmp(&other.0),
        }
    }
}

/// A unit of work tagged with the pipeline run it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub window_id: String,
    pub stage: Stage,
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
    /// Starts at 0; only the retry layer changes it.
    pub retry_count: u32,
}

impl JobRecord {
    pub fn new(stage: Stage, window_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            window_id: window_id.into(),
            stage,
            payload,
            created_at: Utc::now(),
            retry_count: 0,
        }
    }

    /// Convenience accessor for a payload value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }

    /// Encodes the record as a flat field map.
    pub fn to_fields(&self) -> Result<Fields> {
        let mut fields = Fields::new();
        fields.insert("window_id".into(), self.window_id.clone());
        fields.insert("stage".into(), self.stage.as_str().into());
        fields.insert("created_at".into(), self.created_at.to_rfc3339());
        fields.insert("retry_count".into(), self.retry_count.to_string());
        fields.insert("payload".into(), serde_json::to_string(&self.payload)?);
        Ok(fields)
    }

    /// Decodes a record from a flat field map.
    pub fn from_fields(fields: &Fields) -> Result<Self> {
        let field = |name: &str| {
            fields
                .get(name)
                .ok_or_else(|| Error::invalid_record(format!("missing field: {name}")))
        };

        let created_at = DateTime::parse_from_rfc3339(field("created_at")?)
            .map_err(|e| Error::invalid_record(format!("bad created_at: {e}")))?
            .with_timezone(&Utc);

        // DLQ copies carry "max_exceeded" here; treat anything non-numeric as 0.
        let retry_count = fields
            .get("retry_count")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let payload = match fields.get("payload") {
            Some(raw) => serde_json::from_str(raw)?,
            None => Payload::new(),
        };

        Ok(Self {
            window_id: field("window_id")?.clone(),
            stage: field("stage")?.parse()?,
            payload,
            created_at,
            retry_count,
        })
    }
}

/// Quarantined job written when the retry budget is exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterRecord {
    pub original: JobRecord,
    pub original_job_id: JobId,
    pub error_message: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(original: JobRecord, original_job_id: JobId, error_message: impl Into<String>) -> Self {
        Self {
            original,
            original_job_id,
            error_message: error_message.into(),
            failed_at: Utc::now(),
        }
    }

    /// Original fields plus failure metadata, with `retry_count = "max_exceeded"`.
    pub fn to_fields(&self) -> Result<Fields> {
        let mut fields = self.original.to_fields()?;
        fields.insert("original_job_id".into(), self.original_job_id.to_string());
        fields.insert("error_message".into(), self.error_message.clone());
        fields.insert("failed_at".into(), self.failed_at.to_rfc3339());
        fields.insert("retry_count".into(), MAX_EXCEEDED.into());
        Ok(fields)
    }

    /// Dead-letters raw fields that never decoded into a record.
    pub fn raw_fields(
        fields: &Fields,
        original_job_id: &JobId,
        error_message: &str,
    ) -> Fields {
        let mut out = fields.clone();
        out.insert("original_job_id".into(), original_job_id.to_string());
        out.insert("error_message".into(), error_message.to_string());
        out.insert("failed_at".into(), Utc::now().to_rfc3339());
        out.insert("retry_count".into(), MAX_EXCEEDED.into());
        out
    }
}
