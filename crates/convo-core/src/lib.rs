//! # convo-core
//!
//! Foundation types for the convo chat client:
//!
//! - Branded ID newtypes (`EventId`, `ThreadId`, `MessageId`, ...)
//! - Customer and agent identities
//! - Chat threads and messages (the in-memory domain model)
//! - Connection and thread lifecycle enums
//! - Reconnect backoff configuration and delay math

#![deny(unsafe_code)]

pub mod ids;
pub mod identity;
pub mod message;
pub mod retry;
pub mod state;
pub mod thread;

pub use ids::{CustomerId, EventId, MessageId, ThreadId, VisitorId};
pub use identity::{AgentIdentity, CustomerIdentity};
pub use message::{
    Attachment, Message, MessageContent, MessageDirection, ReplyAction, UserStatistics,
};
pub use retry::{RetryConfig, backoff_delay, backoff_delay_with_random};
pub use state::ConnectionState;
pub use thread::{ChatThread, ThreadState, ThreadSummary};
