use thiserror::Error;

use traffic_telegram::TransportError;

/// Errors that can occur while mediating Telegram calls through the registry.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session is on file for this account.
    #[error("no session for account: {account_id}")]
    NotFound { account_id: String },

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The transport reported a flood-wait beyond the registry's ceiling;
    /// the account should be parked rather than retried.
    #[error("flood wait exceeded ceiling: {seconds}s")]
    FloodExceeded { seconds: u64 },

    /// The underlying transport call failed for a reason other than a
    /// bounded flood-wait.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
