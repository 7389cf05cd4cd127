use thiserror::Error;

/// Errors from the Account State Store.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("account not found: {id}")]
    NotFound { id: String },

    #[error("account {id} cannot transition {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, AccountError>;
