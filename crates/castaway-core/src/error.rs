// Error kinds surfaced to callers of the engine.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::EpisodeId;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no authenticated caller")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("prediction deadline passed at {deadline}")]
    DeadlinePassed { deadline: DateTime<Utc> },

    #[error("episode {episode_id} is already scored")]
    AlreadyScored { episode_id: EpisodeId },

    #[error("insufficient budget: requested {requested}, remaining {remaining}")]
    InsufficientBudget { requested: u32, remaining: u32 },

    #[error("no free invite code after {attempts} attempts")]
    AllocationExhausted { attempts: u32 },

    #[error("conflict: {0}")]
    Conflict(String),

    /// Failure inside the persistence layer.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::ValidationError(message.into())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
