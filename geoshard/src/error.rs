//! Shard routing error types

use crate::types::Region;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while routing or executing shard operations
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum ShardError {
    /// A key could not be resolved to a shard. With a correctly built ring
    /// this is a programming error, not an operational condition.
    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Shard {shard_id} unavailable: {reason}")]
    ShardUnavailable { shard_id: String, reason: String },

    #[error("Operation timed out on shard {shard_id} after {seconds}s")]
    Timeout { shard_id: String, seconds: u64 },

    /// One side of a redundant cross-shard write succeeded and the other
    /// failed. Requires reconciliation tooling; never treated as success.
    #[error("Relationship {source_id}->{target_id} partially applied: written on {applied_on}, failed on {failed_on}: {reason}")]
    PartialRelationship {
        applied_on: String,
        failed_on: String,
        source_id: String,
        target_id: String,
        reason: String,
    },

    /// Both sides of a redundant cross-shard write failed.
    #[error("Relationship write failed on {source_shard} and {target_shard}: {reason}")]
    RelationshipFailed {
        source_shard: String,
        target_shard: String,
        reason: String,
    },

    #[error("Shard not found: {0}")]
    ShardNotFound(String),

    #[error("Region not enabled: {0}")]
    RegionNotEnabled(Region),

    #[error("Shard {shard_id} still holds {pending_rows} rows; migrate before removal")]
    MigrationRequired { shard_id: String, pending_rows: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ShardError {
    /// Get the error type as a string for metrics labeling
    pub fn error_type(&self) -> &'static str {
        match self {
            ShardError::Routing(_) => "routing",
            ShardError::ShardUnavailable { .. } => "shard_unavailable",
            ShardError::Timeout { .. } => "timeout",
            ShardError::PartialRelationship { .. } => "partial_relationship",
            ShardError::RelationshipFailed { .. } => "relationship_failed",
            ShardError::ShardNotFound(_) => "shard_not_found",
            ShardError::RegionNotEnabled(_) => "region_not_enabled",
            ShardError::MigrationRequired { .. } => "migration_required",
            ShardError::Config(_) => "config",
            ShardError::Backend(_) => "backend",
            ShardError::Serialization(_) => "serialization",
        }
    }

    /// Whether a caller-side retry can reasonably succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ShardError::ShardUnavailable { .. } | ShardError::Timeout { .. }
        )
    }
}

impl From<rusqlite::Error> for ShardError {
    fn from(err: rusqlite::Error) -> Self {
        ShardError::Backend(err.to_string())
    }
}

impl From<std::io::Error> for ShardError {
    fn from(err: std::io::Error) -> Self {
        ShardError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for ShardError {
    fn from(err: serde_json::Error) -> Self {
        ShardError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ShardError>;
