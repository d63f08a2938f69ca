//! Maintainer error types.

use thiserror::Error;

use agentgrid_core::ConfigError;
use agentgrid_state::StateError;

/// Result type alias for maintainer operations.
pub type MaintainerResult<T> = Result<T, MaintainerError>;

/// Errors that fail a tick, an initialization, or a config change.
///
/// Placement outcomes (no eligible agent, admission rejection) are never
/// errors; they show up in the schedule counters.
#[derive(Debug, Error)]
pub enum MaintainerError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("failed to serialize assignment: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("unknown flexible target: {0}")]
    UnknownFlexibleTarget(String),
}
