//! Funnel & Invite Manager: publishes time-limited invite
//! teasers to public channels, sweeps expired links and auto-deletes their
//! posts, and attributes VIP-channel joins back to the invite link that
//! produced them.

pub mod attribution;
pub mod db;
pub mod error;
pub mod publisher;
pub mod store;
pub mod sweeper;
pub mod types;

pub use attribution::JoinAttributor;
pub use error::{FunnelError, Result};
pub use publisher::InvitePublisher;
pub use store::InviteLinkStore;
pub use sweeper::InviteSweeper;
pub use types::{FunnelConversion, InviteLink};
