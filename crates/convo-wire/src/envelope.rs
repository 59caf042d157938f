//! Envelope shapes: outbound command wrapper and the dual-shape inbound
//! envelope.
//!
//! Outbound: `{ eventId, action, payload: { eventType, brand, channel,
//! consumerIdentity, data } }`. Inbound: either `{ eventId, eventType, data }`
//! or the legacy nested `{ eventId, postback: { eventType, data } }` — both
//! shapes must be checked, and the top-level kind takes precedence.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use convo_core::{CustomerIdentity, EventId};

/// Action category on the outbound envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventAction {
    /// Customer registration / handshake commands.
    #[serde(rename = "register")]
    Register,
    /// Window-scoped commands (the bulk of the protocol).
    #[serde(rename = "chatWindowEvent")]
    ChatWindowEvent,
    /// Message publication.
    #[serde(rename = "outbound")]
    Outbound,
    /// Liveness probe.
    #[serde(rename = "heartbeat")]
    Heartbeat,
}

/// Brand reference: `{ "id": <numeric> }`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandRef {
    /// Numeric brand id.
    pub id: i32,
}

/// Channel reference: `{ "id": "<channel id>" }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRef {
    /// Channel id string.
    pub id: String,
}

/// Inner payload of an outbound envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundPayload {
    /// The command kind's wire string.
    pub event_type: String,
    /// Brand the session belongs to.
    pub brand: BrandRef,
    /// Channel the session belongs to.
    pub channel: ChannelRef,
    /// The sending customer.
    pub consumer_identity: CustomerIdentity,
    /// Kind-specific body; omitted when null.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

/// One outbound command wrapped for the wire.
///
/// The `event_id` is the correlation id: freshly generated per command and
/// echoed by the eventual response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEnvelope {
    /// Correlation id, unique per command.
    pub event_id: EventId,
    /// Action category.
    pub action: EventAction,
    /// The command payload.
    pub payload: OutboundPayload,
}

impl OutboundEnvelope {
    /// Serialize to the wire string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// The minimal heartbeat frame.
#[must_use]
pub fn heartbeat_frame() -> String {
    r#"{"action":"heartbeat"}"#.to_owned()
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Raw inbound envelope before kind dispatch, accepting both wire shapes.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEnvelope {
    /// Correlation id echoed from the originating command, if any.
    #[serde(default)]
    pub event_id: Option<EventId>,
    /// Flat-shape event kind.
    #[serde(default)]
    pub event_type: Option<String>,
    /// Flat-shape body.
    #[serde(default)]
    pub data: Option<Value>,
    /// Legacy nested wrapper.
    #[serde(default)]
    pub postback: Option<PostbackEnvelope>,
}

/// The legacy `postback` wrapper carrying the kind one level down.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostbackEnvelope {
    /// Nested-shape event kind.
    #[serde(default)]
    pub event_type: Option<String>,
    /// Nested-shape body.
    #[serde(default)]
    pub data: Option<Value>,
}

impl InboundEnvelope {
    /// Resolve the event kind and its body.
    ///
    /// The top-level kind wins when both shapes are present; the body always
    /// comes from the same level as the kind. Returns `None` when neither
    /// level names a kind.
    #[must_use]
    pub fn resolve(self) -> Option<(String, Value)> {
        if let Some(kind) = self.event_type {
            return Some((kind, self.data.unwrap_or(Value::Null)));
        }
        let postback = self.postback?;
        let kind = postback.event_type?;
        Some((kind, postback.data.unwrap_or(Value::Null)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
