use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport kind for a proxy endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyKind {
    Socks5,
    Mtproto,
    Http,
}

impl std::fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ProxyKind::Socks5 => "socks5",
            ProxyKind::Mtproto => "mtproto",
            ProxyKind::Http => "http",
        })
    }
}

impl std::str::FromStr for ProxyKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "socks5" => Ok(ProxyKind::Socks5),
            "mtproto" => Ok(ProxyKind::Mtproto),
            "http" => Ok(ProxyKind::Http),
            other => Err(format!("unknown proxy kind: {other}")),
        }
    }
}

/// A single proxy endpoint row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proxy {
    pub endpoint: String,
    pub kind: ProxyKind,
    pub credentials: Option<String>,
    pub in_use_by: Option<String>,
    pub consecutive_failures: u32,
    /// Incremented each time a cooldown is imposed; drives the exponential
    /// backoff multiplier. Reset to 0 on the next successful report.
    pub cooldown_strikes: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Outcome reported back to the pool after using a proxy for a transport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    Success,
    /// A transport error attributable to the proxy itself (connect/read
    /// error, TLS handshake failure) rather than to Telegram's own limits.
    Failure,
}
