//! Server-reported error shapes and decode failures.
//!
//! Two reserved inbound shapes short-circuit normal event decoding (see
//! [`crate::codec::decode_frame`]): a bare [`ServerError`] (`{message}`) and
//! an [`OperationError`] (`{errorCode, eventId}`).

use serde::{Deserialize, Serialize};
use std::fmt;

use convo_core::EventId;

/// Known operation error codes, with unrecognized codes preserved verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorCode {
    /// Customer authorization (handshake) was rejected.
    CustomerAuthorizationFailed,
    /// Reconnecting an existing customer failed; refresh the token and retry.
    CustomerReconnectFailed,
    /// The token refresh round-trip failed. Fatal for the session.
    TokenRefreshingFailed,
    /// Thread recovery failed. Soft when the customer simply has no threads.
    RecoveringThreadFailed,
    /// Live-chat recovery failed; the channel is effectively offline.
    RecoveringLivechatFailed,
    /// The server considers the referenced state inconsistent.
    InconsistentData,
    /// A code this client does not know.
    Other(String),
}

impl ErrorCode {
    /// The wire string for this code.
    #[must_use]
    pub fn as_wire(&self) -> &str {
        match self {
            Self::CustomerAuthorizationFailed => "CustomerAuthorizationFailed",
            Self::CustomerReconnectFailed => "CustomerReconnectFailed",
            Self::TokenRefreshingFailed => "TokenRefreshingFailed",
            Self::RecoveringThreadFailed => "RecoveringThreadFailed",
            Self::RecoveringLivechatFailed => "RecoveringLivechatFailed",
            Self::InconsistentData => "InconsistentData",
            Self::Other(code) => code,
        }
    }

    /// Soft codes are reported but do not fail the enclosing operation.
    ///
    /// A failed thread recovery is expected for fresh visitors with no
    /// history, so it never aborts a connect/reconnect pass.
    #[must_use]
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::RecoveringThreadFailed)
    }
}

impl From<String> for ErrorCode {
    fn from(s: String) -> Self {
        match s.as_str() {
            "CustomerAuthorizationFailed" => Self::CustomerAuthorizationFailed,
            "CustomerReconnectFailed" => Self::CustomerReconnectFailed,
            "TokenRefreshingFailed" => Self::TokenRefreshingFailed,
            "RecoveringThreadFailed" => Self::RecoveringThreadFailed,
            "RecoveringLivechatFailed" => Self::RecoveringLivechatFailed,
            "InconsistentData" => Self::InconsistentData,
            _ => Self::Other(s),
        }
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        code.as_wire().to_owned()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Bare server error: `{ "message": "..." }`.
///
/// A non-empty message means the frame is a failure regardless of any other
/// fields present.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("server error: {message}")]
pub struct ServerError {
    /// Human-readable failure description from the backend.
    pub message: String,
}

/// Operation error: `{ "errorCode": "...", "eventId": "..." }`.
///
/// `event_id` echoes the correlation id of the command that failed; it can be
/// absent on errors the server cannot attribute to a command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("operation failed: {error_code}")]
pub struct OperationError {
    /// Failure classification.
    pub error_code: ErrorCode,
    /// Correlation id of the failed command, when attributable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
}

/// Failure to decode an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame is not a JSON object with a resolvable shape.
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// Neither the flat shape nor the postback wrapper names an event kind.
    #[error("envelope names no event kind")]
    MissingKind,

    /// The kind was recognized but its body did not parse.
    #[error("unparseable {kind} body: {source}")]
    EventBody {
        /// The recognized event kind.
        kind: crate::events::EventKind,
        /// The underlying serde failure.
        #[source]
        source: serde_json::Error,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_roundtrips_known_values() {
        let codes = [
            ErrorCode::CustomerAuthorizationFailed,
            ErrorCode::CustomerReconnectFailed,
            ErrorCode::TokenRefreshingFailed,
            ErrorCode::RecoveringThreadFailed,
            ErrorCode::RecoveringLivechatFailed,
            ErrorCode::InconsistentData,
        ];
        for code in codes {
            let json = serde_json::to_string(&code).unwrap();
            let back: ErrorCode = serde_json::from_str(&json).unwrap();
            assert_eq!(back, code, "roundtrip failed for {code}");
        }
    }

    #[test]
    fn unknown_code_is_preserved() {
        let code: ErrorCode = serde_json::from_str("\"SomethingNew\"").unwrap();
        assert_eq!(code, ErrorCode::Other("SomethingNew".to_owned()));
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"SomethingNew\"");
    }

    #[test]
    fn only_thread_recovery_is_soft() {
        assert!(ErrorCode::RecoveringThreadFailed.is_soft());
        assert!(!ErrorCode::RecoveringLivechatFailed.is_soft());
        assert!(!ErrorCode::TokenRefreshingFailed.is_soft());
        assert!(!ErrorCode::Other("X".to_owned()).is_soft());
    }

    #[test]
    fn operation_error_decodes_wire_shape() {
        let err: OperationError = serde_json::from_str(
            r#"{"errorCode":"TokenRefreshingFailed","eventId":"E2"}"#,
        )
        .unwrap();
        assert_eq!(err.error_code, ErrorCode::TokenRefreshingFailed);
        assert_eq!(err.event_id.unwrap().as_str(), "E2");
    }

    #[test]
    fn operation_error_without_event_id() {
        let err: OperationError =
            serde_json::from_str(r#"{"errorCode":"InconsistentData"}"#).unwrap();
        assert_eq!(err.error_code, ErrorCode::InconsistentData);
        assert!(err.event_id.is_none());
    }

    #[test]
    fn operation_error_display() {
        let err = OperationError {
            error_code: ErrorCode::RecoveringThreadFailed,
            event_id: None,
        };
        assert_eq!(err.to_string(), "operation failed: RecoveringThreadFailed");
    }

    #[test]
    fn server_error_display() {
        let err = ServerError {
            message: "boom".to_owned(),
        };
        assert_eq!(err.to_string(), "server error: boom");
    }
}
