use thiserror::Error;

/// Errors from the Funnel & Invite Manager.
#[derive(Debug, Error)]
pub enum FunnelError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("session registry error: {0}")]
    Session(#[from] traffic_sessions::SessionError),

    #[error("invite link not found: {id}")]
    NotFound { id: String },
}

pub type Result<T> = std::result::Result<T, FunnelError>;
