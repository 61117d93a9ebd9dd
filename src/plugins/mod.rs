//! Forum subsystems built on the core store.

pub mod agents;
pub mod boards;
pub mod content;
pub mod export;
pub mod fanout;
pub mod feed;
pub mod import;
pub mod notifications;
pub mod ratelimit;
pub mod search;
pub mod stats;
pub mod thread;
pub mod webhooks;
