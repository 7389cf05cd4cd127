use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("proxy not found: {endpoint}")]
    NotFound { endpoint: String },
}

pub type Result<T> = std::result::Result<T, ProxyError>;
