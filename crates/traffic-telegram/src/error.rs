use thiserror::Error;

use traffic_core::types::ErrorKind;

/// Errors surfaced by a `TelegramClient` implementation.
///
/// `classify()` maps each variant onto the closed error taxonomy
/// so the dispatcher and session registry can decide local recovery vs.
/// surfacing without matching on transport-specific types.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transient network error: {0}")]
    Network(String),

    /// Flood-wait below the registry's ceiling — caller should sleep and retry once.
    #[error("flood wait: {seconds}s")]
    FloodWait { seconds: u64 },

    /// Flood-wait above the ceiling — caller parks the account in cooldown.
    #[error("flood wait exceeded ceiling: {seconds}s")]
    FloodExceeded { seconds: u64 },

    #[error("peer not accessible: {0}")]
    PeerNotAccessible(String),

    #[error("content rejected: {0}")]
    ContentRejected(String),

    #[error("authentication error: {0}")]
    AuthError(String),

    #[error("account banned: {0}")]
    Banned(String),

    #[error("MTProto invocation failed: {0}")]
    Invocation(String),
}

impl TransportError {
    pub fn classify(&self) -> ErrorKind {
        match self {
            TransportError::Network(_) | TransportError::Invocation(_) => {
                ErrorKind::TransientNetwork
            }
            TransportError::FloodWait { .. } => ErrorKind::FloodWaitShort,
            TransportError::FloodExceeded { .. } => ErrorKind::FloodWaitLong,
            TransportError::PeerNotAccessible(_) => ErrorKind::PeerNotAccessible,
            TransportError::ContentRejected(_) => ErrorKind::ContentRejected,
            TransportError::AuthError(_) => ErrorKind::AuthError,
            TransportError::Banned(_) => ErrorKind::Banned,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
