//! Unified error types for the stage pipeline.
//!
//! Error codes:
//! - QUEUE_001-004: Backing store and record errors
//! - CONFIG_001: Configuration errors
//! - SER_001: Serialization errors
//! - INTERNAL_001: Everything else

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Queue error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueErrorCode {
    /// QUEUE_001: Backing store unreachable
    Connectivity,
    /// QUEUE_002: Consumer group could not be created
    GroupCreation,
    /// QUEUE_003: Backing store rejected a command
    Command,
    /// QUEUE_004: Stored entry is not a valid job record
    InvalidRecord,
}

impl QueueErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connectivity => "QUEUE_001",
            Self::GroupCreation => "QUEUE_002",
            Self::Command => "QUEUE_003",
            Self::InvalidRecord => "QUEUE_004",
        }
    }
}

/// Unified error type for the stage pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// The backing store could not be reached. Never retried inside the queue layer.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// Consumer group creation failed for a reason other than "already exists".
    #[error("group creation error: {0}")]
    GroupCreation(String),

    #[error("store command error: {0}")]
    Command(String),

    #[error("invalid job record: {0}")]
    InvalidRecord(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn connectivity(msg: impl Into<String>) -> Self {
        Self::Connectivity(msg.into())
    }

    pub fn group_creation(msg: impl Into<String>) -> Self {
        Self::GroupCreation(msg.into())
    }

    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connectivity(_) => QueueErrorCode::Connectivity.code(),
            Self::GroupCreation(_) => QueueErrorCode::GroupCreation.code(),
            Self::Command(_) => QueueErrorCode::Command.code(),
            Self::InvalidRecord(_) => QueueErrorCode::InvalidRecord.code(),
            Self::Config(_) => "CONFIG_001",
            Self::Serialization(_) => "SER_001",
            Self::Internal(_) => "INTERNAL_001",
        }
    }

    /// Whether the error means the backing store is unreachable.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}
