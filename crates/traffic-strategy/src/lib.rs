pub mod db;
pub mod error;
pub mod features;
pub mod model;
pub mod oracle;
pub mod types;

pub use error::{Result, StrategyError};
pub use oracle::StrategyOracle;
pub use types::{Context, EffectivenessEntry};
