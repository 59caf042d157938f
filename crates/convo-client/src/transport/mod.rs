//! Socket transport: the seam between the session and the wire.
//!
//! [`Transport`] hides the WebSocket details behind a small async interface so
//! the session logic can be driven by a scripted fake in tests. The production
//! implementation is [`WebSocketTransport`].

mod heartbeat;
mod websocket;

pub use heartbeat::{HeartbeatOutcome, run_heartbeat};
pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Failure at the socket layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket URL could not be parsed.
    #[error("invalid socket url: {0}")]
    InvalidUrl(String),

    /// Establishing the connection failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// A frame was submitted while no connection is open.
    #[error("transport is not connected")]
    NotConnected,
}

/// Why a connection stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// We closed it deliberately.
    Local,
    /// The server closed it.
    Remote,
    /// No liveness signal arrived within the heartbeat budget.
    HeartbeatTimeout,
    /// An I/O error tore the connection down.
    Error(String),
}

impl CloseReason {
    /// Whether the session should try to reconnect after this close.
    #[must_use]
    pub fn is_unexpected(&self) -> bool {
        !matches!(self, Self::Local)
    }
}

/// What the transport reports upward.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame arrived.
    Frame(String),
    /// The connection ended. Emitted exactly once per connection.
    Closed {
        /// Why it ended.
        reason: CloseReason,
    },
}

/// A bidirectional frame pipe to the gateway.
///
/// One logical connection at a time: `connect` replaces any previous one.
/// Inbound traffic is surfaced through the receiver from [`take_events`];
/// exactly one [`TransportEvent::Closed`] terminates each connection's stream.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a connection to `url`.
    async fn connect(&self, url: &str) -> Result<(), TransportError>;

    /// Queues a text frame for sending. Non-blocking; delivery is best-effort
    /// once the connection drops.
    fn send(&self, frame: String) -> Result<(), TransportError>;

    /// Closes the current connection, emitting `Closed { reason: Local }`.
    async fn close(&self);

    /// Takes the inbound event stream. Returns `None` once taken until the
    /// next `connect`.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Whether a connection is currently open.
    fn is_open(&self) -> bool;
}
