use thiserror::Error;

/// Errors from the Strategy Oracle.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("duplicate outcome update for action {action_id}")]
    DuplicateUpdate { action_id: String },
}

pub type Result<T> = std::result::Result<T, StrategyError>;
