pub mod client;
pub mod error;
pub mod grammers_impl;
pub mod text;

pub use client::{ChannelPost, InviteHandle, JoinEvent, Reply, TelegramClient};
pub use error::{Result, TransportError};
pub use grammers_impl::{ApiCredentials, GrammersTelegramClient};
