//! Action Dispatcher and Reply Poller.
//!
//! [`worker::DispatcherWorker`] is the per-account fiber: it loads the day's
//! Action Budget from the Warmup Planner, picks an eligible action kind,
//! resolves a target, clears it through the Rate Ledger, executes it through
//! the Session Registry, and appends an `ActionRecord`. [`supervisor::Supervisor`]
//! runs one such fiber per eligible account and restarts it with exponential
//! backoff if it panics.
//!
//! [`reply_poller::ReplyPoller`] is the separate scheduled worker that drains
//! `OutcomePending` rows and attributes reward back to the Strategy Oracle.

pub mod content;
pub mod db;
pub mod error;
pub mod outcome;
pub mod records;
pub mod reply_poller;
pub mod spam_checker;
pub mod supervisor;
pub mod targets;
pub mod text;
pub mod types;
pub mod worker;

pub use content::ContentQueue;
pub use error::{DispatcherError, Result};
pub use outcome::OutcomePendingStore;
pub use records::ActionRecordStore;
pub use reply_poller::ReplyPoller;
pub use spam_checker::SpamChecker;
pub use supervisor::Supervisor;
pub use targets::TargetSource;
pub use types::{ActionRecord, ContentItem, OutcomePending, Target};
pub use worker::DispatcherWorker;
