use thiserror::Error;

/// Errors from the Action Dispatcher, Reply Poller, and supervisor. Wraps
/// every collaborator's own error type so dispatcher code can use `?` across
/// crate boundaries without manual mapping at each call site.
#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("account store error: {0}")]
    Account(#[from] traffic_accounts::AccountError),

    #[error("warmup planner error: {0}")]
    Warmup(#[from] traffic_warmup::WarmupError),

    #[error("rate ledger error: {0}")]
    Ledger(#[from] traffic_ledger::LedgerError),

    #[error("proxy pool error: {0}")]
    Proxy(#[from] traffic_proxy::ProxyError),

    #[error("channel monitor error: {0}")]
    Channel(#[from] traffic_channels::ChannelError),

    #[error("strategy oracle error: {0}")]
    Strategy(#[from] traffic_strategy::StrategyError),

    #[error("session registry error: {0}")]
    Session(#[from] traffic_sessions::SessionError),

    #[error("no eligible target for action kind")]
    NoTarget,
}

pub type Result<T> = std::result::Result<T, DispatcherError>;
