use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("ledger write retries exhausted for account {account_id}/{kind}")]
    RetriesExhausted { account_id: String, kind: String },
}

pub type Result<T> = std::result::Result<T, LedgerError>;
