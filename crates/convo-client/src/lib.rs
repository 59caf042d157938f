//! Realtime chat client: one persistent socket session to the chat gateway.
//!
//! The pieces, leaves first:
//!
//! - [`transport`] owns the socket: connect, a writer queue, an inbound event
//!   stream, and heartbeat-based liveness.
//! - [`Correlator`] matches each outbound command's correlation id against the
//!   response frame that echoes it, resolving every command exactly once with
//!   a payload, an application error, or a timeout.
//! - [`ThreadStore`] is the authoritative in-memory view of chat threads,
//!   mutated only through idempotent merge operations so duplicate or
//!   out-of-order delivery cannot corrupt it.
//! - [`Dispatcher`] fans decoded push events out to registered observers.
//! - [`SessionController`] ties it together: the connection lifecycle,
//!   handshake and bootstrap, the token gate with single-flight refresh, and
//!   reconnection with exponential backoff.

#![deny(unsafe_code)]

mod config;
mod correlator;
mod dispatch;
mod errors;
mod session;
mod threads;
pub mod transport;

pub use config::{
    ChannelMode, ClientConfig, ConfigError, Environment, SocketConfig, load_config,
    load_config_from_path,
};
pub use dispatch::{Dispatcher, ObserverHandle};
pub use errors::ClientError;
pub use session::{SessionController, SessionNotification};
pub use threads::{LoadOutcome, ThreadStore};

pub use convo_auth::{AccessToken, FileTokenStorage, MemoryTokenStorage, StorageError, TokenStorage};
pub use convo_core::{
    AgentIdentity, Attachment, ChatThread, ConnectionState, CustomerId, CustomerIdentity,
    EventId, Message, MessageContent, MessageId, RetryConfig, ThreadId, ThreadState,
    ThreadSummary, VisitorId,
};
pub use convo_wire::{ErrorCode, EventKind, InboundEvent, OperationError, ServerError};

pub(crate) use correlator::Correlator;
