//! Client-level error taxonomy.

use thiserror::Error;

use convo_auth::StorageError;
use convo_core::ConnectionState;
use convo_wire::{DecodeError, ErrorCode, OperationError, ServerError};

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Any failure a session operation can surface.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client configuration cannot describe a usable session.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The socket layer failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An inbound frame could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// An outbound command could not be serialized.
    #[error("failed to encode outbound command: {0}")]
    Encode(#[source] serde_json::Error),

    /// The server rejected a specific command.
    #[error(transparent)]
    Operation(#[from] OperationError),

    /// The server reported a bare failure message.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Credential storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// No response arrived within the command deadline.
    #[error("no response within {timeout_ms} ms: {context}")]
    Timeout {
        /// The deadline that elapsed.
        timeout_ms: u64,
        /// The command that went unanswered.
        context: String,
    },

    /// The session is not connected.
    #[error("session is not connected")]
    NotConnected,

    /// The token refresh round-trip failed. Terminal: callers should sign out.
    #[error("access token refresh failed")]
    TokenRefreshFailed,

    /// An operation needs a customer identity and the session has none.
    #[error("no customer identity; prepare the session first")]
    MissingIdentity,

    /// The requested lifecycle transition is not allowed.
    #[error("invalid connection state transition: {from} -> {to}")]
    InvalidStateTransition {
        /// Current state.
        from: ConnectionState,
        /// Rejected target state.
        to: ConnectionState,
    },

    /// An inbound event references state this session does not hold.
    #[error("inconsistent session state: {context}")]
    InconsistentState {
        /// What was referenced but missing.
        context: String,
    },
}

impl ClientError {
    /// Terminal failures: retrying will not help, the caller should sign out
    /// or rebuild the session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::TokenRefreshFailed => true,
            Self::Operation(e) => matches!(
                e.error_code,
                ErrorCode::CustomerAuthorizationFailed | ErrorCode::TokenRefreshingFailed
            ),
            _ => false,
        }
    }

    /// Soft failures are reported but do not abort the enclosing flow.
    #[must_use]
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::Operation(e) if e.error_code.is_soft())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn operation(code: ErrorCode) -> ClientError {
        ClientError::Operation(OperationError {
            error_code: code,
            event_id: None,
        })
    }

    #[test]
    fn auth_failures_are_fatal() {
        assert!(operation(ErrorCode::CustomerAuthorizationFailed).is_fatal());
        assert!(operation(ErrorCode::TokenRefreshingFailed).is_fatal());
        assert!(ClientError::TokenRefreshFailed.is_fatal());
    }

    #[test]
    fn retryable_failures_are_not_fatal() {
        assert!(!ClientError::NotConnected.is_fatal());
        assert!(!operation(ErrorCode::CustomerReconnectFailed).is_fatal());
        assert!(!operation(ErrorCode::RecoveringThreadFailed).is_fatal());
        assert!(
            !ClientError::Timeout {
                timeout_ms: 30_000,
                context: "RecoverThread".to_owned(),
            }
            .is_fatal()
        );
    }

    #[test]
    fn only_thread_recovery_is_soft() {
        assert!(operation(ErrorCode::RecoveringThreadFailed).is_soft());
        assert!(!operation(ErrorCode::RecoveringLivechatFailed).is_soft());
        assert!(!ClientError::NotConnected.is_soft());
    }
}
