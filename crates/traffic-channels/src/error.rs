use thiserror::Error;

/// Errors from the Channel Monitor.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("transport error polling channel: {0}")]
    Transport(#[from] traffic_telegram::TransportError),

    #[error("no reader account configured for the monitor")]
    NoReaderAccount,
}

pub type Result<T> = std::result::Result<T, ChannelError>;
