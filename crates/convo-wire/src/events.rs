//! Typed inbound events.
//!
//! [`EventKind`] enumerates every kind this client decodes; each variant
//! serializes to the exact wire string the backend sends. Frames carrying any
//! other kind decode into [`InboundEvent::Unknown`] so new server-side events
//! never break an old client.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use convo_core::{AgentIdentity, CustomerIdentity, Message, ThreadSummary};

use crate::errors::DecodeError;

/// All inbound event kinds this client understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Handshake acknowledged; the customer is authorized.
    #[serde(rename = "ConsumerAuthorized")]
    ConsumerAuthorized,
    /// A token refresh round-trip succeeded.
    #[serde(rename = "TokenRefreshed")]
    TokenRefreshed,
    /// Snapshot of one recovered thread.
    #[serde(rename = "ThreadRecovered")]
    ThreadRecovered,
    /// Snapshot of one recovered live-chat thread.
    #[serde(rename = "LivechatRecovered")]
    LivechatRecovered,
    /// The customer's thread list.
    #[serde(rename = "ThreadListFetched")]
    ThreadListFetched,
    /// Metadata for one thread (last message, owner).
    #[serde(rename = "ThreadMetadataLoaded")]
    ThreadMetadataLoaded,
    /// An older page of messages.
    #[serde(rename = "MoreMessagesLoaded")]
    MoreMessagesLoaded,
    /// A message was posted to a thread.
    #[serde(rename = "MessageCreated")]
    MessageCreated,
    /// Read/seen statistics changed for a message.
    #[serde(rename = "MessageReadChanged")]
    MessageReadChanged,
    /// An agent started typing.
    #[serde(rename = "AgentTypingStarted")]
    AgentTypingStarted,
    /// An agent stopped typing.
    #[serde(rename = "AgentTypingEnded")]
    AgentTypingEnded,
    /// The assigned agent changed.
    #[serde(rename = "ContactInboxAssigneeChanged")]
    ContactInboxAssigneeChanged,
    /// Queue position update while waiting for an agent.
    #[serde(rename = "SetPositionInQueue")]
    SetPositionInQueue,
    /// A thread was archived.
    #[serde(rename = "ThreadArchived")]
    ThreadArchived,
}

/// All event kinds, for exhaustive serde tests.
pub const ALL_EVENT_KINDS: &[EventKind] = &[
    EventKind::ConsumerAuthorized,
    EventKind::TokenRefreshed,
    EventKind::ThreadRecovered,
    EventKind::LivechatRecovered,
    EventKind::ThreadListFetched,
    EventKind::ThreadMetadataLoaded,
    EventKind::MoreMessagesLoaded,
    EventKind::MessageCreated,
    EventKind::MessageReadChanged,
    EventKind::AgentTypingStarted,
    EventKind::AgentTypingEnded,
    EventKind::ContactInboxAssigneeChanged,
    EventKind::SetPositionInQueue,
    EventKind::ThreadArchived,
];

impl EventKind {
    /// The canonical wire string (e.g. `"MessageCreated"`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConsumerAuthorized => "ConsumerAuthorized",
            Self::TokenRefreshed => "TokenRefreshed",
            Self::ThreadRecovered => "ThreadRecovered",
            Self::LivechatRecovered => "LivechatRecovered",
            Self::ThreadListFetched => "ThreadListFetched",
            Self::ThreadMetadataLoaded => "ThreadMetadataLoaded",
            Self::MoreMessagesLoaded => "MoreMessagesLoaded",
            Self::MessageCreated => "MessageCreated",
            Self::MessageReadChanged => "MessageReadChanged",
            Self::AgentTypingStarted => "AgentTypingStarted",
            Self::AgentTypingEnded => "AgentTypingEnded",
            Self::ContactInboxAssigneeChanged => "ContactInboxAssigneeChanged",
            Self::SetPositionInQueue => "SetPositionInQueue",
            Self::ThreadArchived => "ThreadArchived",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        // Serde parse — the `#[serde(rename)]` attributes are the source of truth.
        serde_json::from_value(Value::String(s.to_owned()))
            .map_err(|_| format!("unknown event kind: {s}"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Access token as carried on the wire: the bearer string plus a TTL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenPayload {
    /// The bearer token.
    pub token: String,
    /// Seconds until expiry, relative to receipt.
    pub expires_in: i64,
}

/// Body of [`EventKind::ConsumerAuthorized`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerAuthorizedData {
    /// The identity the backend authorized.
    pub consumer_identity: CustomerIdentity,
    /// Fresh token, present on OAuth-style channels only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<AccessTokenPayload>,
}

/// Body of [`EventKind::TokenRefreshed`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRefreshedData {
    /// The replacement token.
    pub access_token: AccessTokenPayload,
}

/// Body of [`EventKind::ThreadRecovered`] and [`EventKind::LivechatRecovered`].
///
/// One server snapshot of a thread: a message subset, assignment, and the
/// pagination cursor for older history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadRecoveredData {
    /// The thread's descriptor (id, name, open/closed flag).
    pub thread: ThreadSummary,
    /// Message subset in this snapshot, ascending by creation time.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Currently assigned agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbox_assignee: Option<AgentIdentity>,
    /// Previously assigned agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_inbox_assignee: Option<AgentIdentity>,
    /// Cursor for loading history older than this snapshot.
    #[serde(default)]
    pub messages_scroll_token: String,
}

/// Body of [`EventKind::ThreadListFetched`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadListFetchedData {
    /// Every thread the customer owns on this channel.
    #[serde(default)]
    pub threads: Vec<ThreadSummary>,
}

/// Body of [`EventKind::ThreadMetadataLoaded`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadMetadataLoadedData {
    /// Newest message of the thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    /// Agent owning the thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_assignee: Option<AgentIdentity>,
}

/// Body of [`EventKind::MoreMessagesLoaded`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoreMessagesLoadedData {
    /// The older page, ascending by creation time. Empty = no more history.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Replacement cursor; empty = no more history.
    #[serde(default)]
    pub scroll_token: String,
}

/// Body of [`EventKind::MessageCreated`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCreatedData {
    /// The new message.
    pub message: Message,
    /// Descriptor of the thread it was posted to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadSummary>,
}

/// Body of [`EventKind::MessageReadChanged`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReadChangedData {
    /// The message with updated statistics.
    pub message: Message,
}

/// Body of [`EventKind::AgentTypingStarted`] / [`EventKind::AgentTypingEnded`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTypingData {
    /// The thread the agent is typing in.
    pub thread: ThreadSummary,
    /// The typing agent, when the backend identifies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<AgentIdentity>,
}

/// Body of [`EventKind::ContactInboxAssigneeChanged`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxAssigneeChangedData {
    /// New assignee; `None` when the thread went back to the queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbox_assignee: Option<AgentIdentity>,
    /// Assignee before this change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_inbox_assignee: Option<AgentIdentity>,
    /// The affected thread.
    pub thread: ThreadSummary,
}

/// Body of [`EventKind::SetPositionInQueue`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePositionData {
    /// 1-based position in the waiting queue.
    pub position_in_queue: u32,
    /// The queued thread; absent on channels with a single live thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadSummary>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Event union
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded inbound event.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundEvent {
    /// Handshake acknowledged.
    ConsumerAuthorized(ConsumerAuthorizedData),
    /// Token refresh succeeded.
    TokenRefreshed(TokenRefreshedData),
    /// One recovered thread snapshot.
    ThreadRecovered(ThreadRecoveredData),
    /// One recovered live-chat snapshot.
    LivechatRecovered(ThreadRecoveredData),
    /// The customer's thread list.
    ThreadListFetched(ThreadListFetchedData),
    /// Metadata for one thread.
    ThreadMetadataLoaded(ThreadMetadataLoadedData),
    /// An older page of messages.
    MoreMessagesLoaded(MoreMessagesLoadedData),
    /// A message was posted.
    MessageCreated(MessageCreatedData),
    /// Read statistics changed.
    MessageReadChanged(MessageReadChangedData),
    /// Agent started typing.
    AgentTypingStarted(AgentTypingData),
    /// Agent stopped typing.
    AgentTypingEnded(AgentTypingData),
    /// Assignment changed.
    ContactInboxAssigneeChanged(InboxAssigneeChangedData),
    /// Queue position update.
    SetPositionInQueue(QueuePositionData),
    /// Archive acknowledgement.
    ThreadArchived,
    /// A kind this client does not know; payload kept raw.
    Unknown {
        /// The unrecognized wire kind.
        kind: String,
        /// The undecoded body.
        data: Value,
    },
}

impl InboundEvent {
    /// Decode a recognized kind's body into its typed variant.
    pub fn decode(kind: EventKind, data: Value) -> Result<Self, DecodeError> {
        fn typed<T: serde::de::DeserializeOwned>(
            kind: EventKind,
            data: Value,
        ) -> Result<T, DecodeError> {
            serde_json::from_value(data).map_err(|source| DecodeError::EventBody { kind, source })
        }

        let event = match kind {
            EventKind::ConsumerAuthorized => Self::ConsumerAuthorized(typed(kind, data)?),
            EventKind::TokenRefreshed => Self::TokenRefreshed(typed(kind, data)?),
            EventKind::ThreadRecovered => Self::ThreadRecovered(typed(kind, data)?),
            EventKind::LivechatRecovered => Self::LivechatRecovered(typed(kind, data)?),
            EventKind::ThreadListFetched => Self::ThreadListFetched(typed(kind, data)?),
            EventKind::ThreadMetadataLoaded => Self::ThreadMetadataLoaded(typed(kind, data)?),
            EventKind::MoreMessagesLoaded => Self::MoreMessagesLoaded(typed(kind, data)?),
            EventKind::MessageCreated => Self::MessageCreated(typed(kind, data)?),
            EventKind::MessageReadChanged => Self::MessageReadChanged(typed(kind, data)?),
            EventKind::AgentTypingStarted => Self::AgentTypingStarted(typed(kind, data)?),
            EventKind::AgentTypingEnded => Self::AgentTypingEnded(typed(kind, data)?),
            EventKind::ContactInboxAssigneeChanged => {
                Self::ContactInboxAssigneeChanged(typed(kind, data)?)
            }
            EventKind::SetPositionInQueue => Self::SetPositionInQueue(typed(kind, data)?),
            // Ack-only event, no body to parse.
            EventKind::ThreadArchived => Self::ThreadArchived,
        };
        Ok(event)
    }

    /// The typed kind, or `None` for [`InboundEvent::Unknown`].
    #[must_use]
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            Self::ConsumerAuthorized(_) => Some(EventKind::ConsumerAuthorized),
            Self::TokenRefreshed(_) => Some(EventKind::TokenRefreshed),
            Self::ThreadRecovered(_) => Some(EventKind::ThreadRecovered),
            Self::LivechatRecovered(_) => Some(EventKind::LivechatRecovered),
            Self::ThreadListFetched(_) => Some(EventKind::ThreadListFetched),
            Self::ThreadMetadataLoaded(_) => Some(EventKind::ThreadMetadataLoaded),
            Self::MoreMessagesLoaded(_) => Some(EventKind::MoreMessagesLoaded),
            Self::MessageCreated(_) => Some(EventKind::MessageCreated),
            Self::MessageReadChanged(_) => Some(EventKind::MessageReadChanged),
            Self::AgentTypingStarted(_) => Some(EventKind::AgentTypingStarted),
            Self::AgentTypingEnded(_) => Some(EventKind::AgentTypingEnded),
            Self::ContactInboxAssigneeChanged(_) => {
                Some(EventKind::ContactInboxAssigneeChanged)
            }
            Self::SetPositionInQueue(_) => Some(EventKind::SetPositionInQueue),
            Self::ThreadArchived => Some(EventKind::ThreadArchived),
            Self::Unknown { .. } => None,
        }
    }

    /// The wire kind string, including unrecognized ones.
    #[must_use]
    pub fn raw_kind(&self) -> &str {
        match self {
            Self::Unknown { kind, .. } => kind,
            other => other.kind().map_or("", EventKind::as_str),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
