//! Configuration error types.

use thiserror::Error;

/// Result type alias for config loading and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors detected while loading or validating agent group configs.
///
/// Any of these rejects the whole config; callers keep running on the
/// previously loaded one.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("agent group #{index} has an empty identifier")]
    EmptyIdentifier { index: usize },

    #[error("agent group {identifier} has an empty role pattern")]
    EmptyRolePattern { identifier: String },

    #[error("agent group {identifier} has node_count 0")]
    ZeroNodeCount { identifier: String },

    #[error("agent group {identifier} has an invalid role pattern: {source}")]
    InvalidRolePattern {
        identifier: String,
        source: regex::Error,
    },

    #[error("agent group {identifier} has a non-positive oversell factor for {resource}")]
    InvalidOversellFactor {
        identifier: String,
        resource: String,
    },

    #[error("duplicate agent group identifier: {0}")]
    DuplicateGroup(String),

    #[error("global agent group has an empty global_id")]
    EmptyGlobalId,

    #[error("duplicate global agent group: {0}")]
    DuplicateGlobalGroup(String),

    #[error("flexible scale target not found: {global_id}.{group_id}")]
    FlexibleTargetNotFound { global_id: String, group_id: String },

    #[error(
        "flexible scale target {global_id}.{group_id} also sets flexible_idle_agent_count"
    )]
    FlexibleIdleConflict { global_id: String, group_id: String },

    #[error("flexible scale target {global_id}.{group_id} has an invalid node range: {reason}")]
    InvalidNodeRange {
        global_id: String,
        group_id: String,
        reason: String,
    },

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
