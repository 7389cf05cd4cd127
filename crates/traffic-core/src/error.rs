use thiserror::Error;

use crate::types::ErrorKind;

/// Shared error type for the engine's ambient concerns (config, persistence,
/// serialization). Component crates layer their own error enums over this
/// one via `#[from]` where they wrap a repository or transport.
#[derive(Debug, Error)]
pub enum TrafficError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("account not found: {id}")]
    AccountNotFound { id: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl TrafficError {
    /// Maps an ambient error onto the closed `ErrorKind` taxonomy, for
    /// places that need to log or count errors uniformly with transport
    /// failures.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrafficError::Config(_) => ErrorKind::ConfigError,
            TrafficError::Database(_) => ErrorKind::PersistenceError,
            TrafficError::Serialization(_) => ErrorKind::PersistenceError,
            TrafficError::Io(_) => ErrorKind::TransientNetwork,
            TrafficError::AccountNotFound { .. } => ErrorKind::PeerNotAccessible,
            TrafficError::Internal(_) => ErrorKind::PersistenceError,
        }
    }
}

pub type Result<T> = std::result::Result<T, TrafficError>;
