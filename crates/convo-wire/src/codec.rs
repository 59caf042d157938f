//! Inbound frame decoding.
//!
//! Decode order:
//!
//! 1. Parse the frame as JSON.
//! 2. Check the two reserved error shapes — a bare `{message}` server error
//!    and an `{errorCode, eventId}` operation error — which short-circuit
//!    regardless of any event kind also present.
//! 3. Resolve the event kind, flat shape over legacy `postback` nesting.
//! 4. Dispatch to the kind's typed decoder; unrecognized kinds decode into
//!    [`InboundEvent::Unknown`] for forward compatibility.

use serde_json::Value;
use std::str::FromStr;

use convo_core::EventId;

use crate::envelope::InboundEnvelope;
use crate::errors::{DecodeError, OperationError, ServerError};
use crate::events::{EventKind, InboundEvent};

/// One decoded inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedFrame {
    /// A regular event, with the correlation id it echoes (if any).
    Event {
        /// Correlation id echoed from the originating command.
        event_id: Option<EventId>,
        /// The decoded event.
        event: InboundEvent,
    },
    /// Reserved shape: `{errorCode, eventId}`.
    OperationError(OperationError),
    /// Reserved shape: `{message}` with a non-empty message.
    ServerError(ServerError),
}

/// Decode one inbound text frame.
pub fn decode_frame(raw: &str) -> Result<DecodedFrame, DecodeError> {
    let value: Value = serde_json::from_str(raw).map_err(DecodeError::Envelope)?;

    // Reserved error shapes win over kind dispatch.
    if let Some(message) = value.get("message").and_then(Value::as_str) {
        if !message.is_empty() {
            return Ok(DecodedFrame::ServerError(ServerError {
                message: message.to_owned(),
            }));
        }
    }
    if value.get("errorCode").is_some() {
        let error: OperationError =
            serde_json::from_value(value).map_err(DecodeError::Envelope)?;
        return Ok(DecodedFrame::OperationError(error));
    }

    let envelope: InboundEnvelope =
        serde_json::from_value(value).map_err(DecodeError::Envelope)?;
    let event_id = envelope.event_id.clone();
    let Some((kind, data)) = envelope.resolve() else {
        return Err(DecodeError::MissingKind);
    };

    let event = match EventKind::from_str(&kind) {
        Ok(known) => InboundEvent::decode(known, data)?,
        Err(_) => InboundEvent::Unknown { kind, data },
    };
    Ok(DecodedFrame::Event { event_id, event })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
