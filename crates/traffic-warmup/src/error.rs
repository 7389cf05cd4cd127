use thiserror::Error;

#[derive(Debug, Error)]
pub enum WarmupError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("account store error: {0}")]
    Account(#[from] traffic_accounts::AccountError),
}

pub type Result<T> = std::result::Result<T, WarmupError>;
