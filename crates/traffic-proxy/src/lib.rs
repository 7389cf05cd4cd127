pub mod db;
pub mod error;
pub mod pool;
pub mod types;

pub use error::{ProxyError, Result};
pub use pool::ProxyPool;
pub use types::{Proxy, ProxyKind, ProxyOutcome};
