//! Chat messages and their typed content variants.
//!
//! A [`Message`] is immutable once created; read/seen statistics arrive as a
//! replacement message on the wire rather than a patch. Content is a tagged
//! union keyed by the wire `type` discriminator with an [`MessageContent::Unknown`]
//! fallback so new server-side content types never break decoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{AgentIdentity, CustomerIdentity};
use crate::ids::{MessageId, ThreadId};

/// Which way a message travelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageDirection {
    /// Sent by the customer, towards the brand's agents.
    #[serde(rename = "inbound")]
    ToAgent,
    /// Sent by an agent (or automation), towards the customer.
    #[serde(rename = "outbound")]
    ToClient,
}

/// Typed message body, tagged by the wire `type` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum MessageContent {
    /// Plain text.
    #[serde(rename = "TEXT")]
    Text {
        /// The message text.
        text: String,
    },
    /// A link card with a title.
    #[serde(rename = "RICH_LINK")]
    RichLink {
        /// Card title.
        title: String,
        /// Link target.
        url: String,
    },
    /// A prompt with a fixed set of tappable replies.
    #[serde(rename = "QUICK_REPLIES")]
    QuickReplies {
        /// Prompt text shown above the replies.
        text: String,
        /// The offered replies, in display order.
        #[serde(default)]
        actions: Vec<ReplyAction>,
    },
    /// Brand-defined plugin content, passed through undecoded.
    #[serde(rename = "PLUGIN")]
    Plugin(serde_json::Value),
    /// Any content type this client does not know; payload is dropped.
    #[serde(other)]
    Unknown,
}

/// One tappable reply inside [`MessageContent::QuickReplies`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyAction {
    /// Visible label.
    pub text: String,
    /// Value echoed back to the backend when tapped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postback: Option<String>,
}

/// A file attached to a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Name shown to the user.
    pub friendly_name: String,
    /// Download URL.
    pub url: String,
    /// MIME type as reported by the backend.
    #[serde(default)]
    pub mime_type: String,
}

/// Delivery/read statistics for one message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatistics {
    /// When the counterparty first saw the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seen_at: Option<DateTime<Utc>>,
    /// When the counterparty read the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

/// One chat message. Immutable once created.
///
/// Author fields are mutually exclusive by direction: `author_user` is set for
/// agent-sent messages, `author_end_user_identity` for customer-sent ones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message id.
    pub id: MessageId,
    /// The thread this message belongs to.
    pub thread_id_on_external_platform: ThreadId,
    /// Typed body.
    pub message_content: MessageContent,
    /// Creation timestamp; the sort key within a thread.
    pub created_at: DateTime<Utc>,
    /// Attached files, possibly empty.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Travel direction.
    pub direction: MessageDirection,
    /// Read/seen statistics.
    #[serde(default)]
    pub user_statistics: UserStatistics,
    /// Sending agent, for [`MessageDirection::ToClient`] messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_user: Option<AgentIdentity>,
    /// Sending customer, for [`MessageDirection::ToAgent`] messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_end_user_identity: Option<CustomerIdentity>,
}

impl Message {
    /// Build a customer-authored text message with a fresh id, timestamped now.
    ///
    /// Used for the optimistic local insert before the server echo arrives;
    /// the echoed copy merges by id so the tentative entry is never duplicated.
    #[must_use]
    pub fn outbound_text(
        thread_id: ThreadId,
        text: impl Into<String>,
        author: CustomerIdentity,
    ) -> Self {
        Self {
            id: MessageId::new(),
            thread_id_on_external_platform: thread_id,
            message_content: MessageContent::Text { text: text.into() },
            created_at: Utc::now(),
            attachments: Vec::new(),
            direction: MessageDirection::ToAgent,
            user_statistics: UserStatistics::default(),
            author_user: None,
            author_end_user_identity: Some(author),
        }
    }

    /// The plain-text body, if this message has one.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.message_content {
            MessageContent::Text { text } => Some(text),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
