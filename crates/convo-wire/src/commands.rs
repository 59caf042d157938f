//! Outbound commands and their envelope construction.
//!
//! Each command knows its wire kind, its action category, and how to build
//! its kind-specific `data` body. [`OutboundCommand::envelope`] wraps all of
//! that with a fresh correlation id.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use convo_core::{
    Attachment, CustomerIdentity, EventId, MessageContent, MessageId, ThreadId,
};

use crate::envelope::{BrandRef, ChannelRef, EventAction, OutboundEnvelope, OutboundPayload};

/// One outbound protocol command.
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundCommand {
    /// First handshake for a customer without a held token.
    AuthorizeConsumer {
        /// OAuth authorization code, on channels that use one.
        authorization_code: Option<String>,
    },
    /// Handshake for a returning customer holding a token.
    ReconnectConsumer {
        /// The held bearer token.
        access_token: String,
    },
    /// Exchange an expiring token for a fresh one.
    RefreshToken {
        /// The expiring bearer token.
        access_token: String,
    },
    /// Post a message to a thread.
    SendMessage {
        /// Target thread.
        thread_id: ThreadId,
        /// Thread display name, sent when known.
        thread_name: Option<String>,
        /// Client-minted message id (stable across the server echo).
        message_id: MessageId,
        /// The message body.
        content: MessageContent,
        /// Previously uploaded attachments.
        attachments: Vec<Attachment>,
    },
    /// Request an older page of history.
    LoadMoreMessages {
        /// Target thread.
        thread_id: ThreadId,
        /// Cursor from the previous page or recovery snapshot.
        scroll_token: String,
        /// Timestamp of the oldest message already held, when known.
        oldest_message_datetime: Option<DateTime<Utc>>,
    },
    /// Recover one thread's snapshot.
    RecoverThread {
        /// Specific thread, or `None` for the channel's active thread.
        thread_id: Option<ThreadId>,
    },
    /// Recover the live-chat thread's snapshot.
    RecoverLivechat {
        /// Specific thread, or `None` for the channel's active thread.
        thread_id: Option<ThreadId>,
    },
    /// Fetch the customer's thread list.
    FetchThreadList,
    /// Load one thread's metadata (last message, owner).
    LoadThreadMetadata {
        /// Target thread.
        thread_id: ThreadId,
    },
    /// Archive a thread.
    ArchiveThread {
        /// Target thread.
        thread_id: ThreadId,
    },
    /// Rename a thread.
    UpdateThread {
        /// Target thread.
        thread_id: ThreadId,
        /// New display name.
        thread_name: String,
    },
    /// Mark the thread's agent messages as read by the customer.
    MessageSeenByConsumer {
        /// Target thread.
        thread_id: ThreadId,
    },
    /// The customer started typing.
    SenderTypingStarted {
        /// Target thread.
        thread_id: ThreadId,
    },
    /// The customer stopped typing.
    SenderTypingEnded {
        /// Target thread.
        thread_id: ThreadId,
    },
}

impl OutboundCommand {
    /// The wire `eventType` string.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthorizeConsumer { .. } => "AuthorizeConsumer",
            Self::ReconnectConsumer { .. } => "ReconnectConsumer",
            Self::RefreshToken { .. } => "RefreshToken",
            Self::SendMessage { .. } => "SendMessage",
            Self::LoadMoreMessages { .. } => "LoadMoreMessages",
            Self::RecoverThread { .. } => "RecoverThread",
            Self::RecoverLivechat { .. } => "RecoverLivechat",
            Self::FetchThreadList => "FetchThreadList",
            Self::LoadThreadMetadata { .. } => "LoadThreadMetadata",
            Self::ArchiveThread { .. } => "ArchiveThread",
            Self::UpdateThread { .. } => "UpdateThread",
            Self::MessageSeenByConsumer { .. } => "MessageSeenByConsumer",
            Self::SenderTypingStarted { .. } => "SenderTypingStarted",
            Self::SenderTypingEnded { .. } => "SenderTypingEnded",
        }
    }

    /// The envelope action category for this command.
    #[must_use]
    pub fn action(&self) -> EventAction {
        match self {
            Self::AuthorizeConsumer { .. } | Self::ReconnectConsumer { .. } => {
                EventAction::Register
            }
            Self::SendMessage { .. } => EventAction::Outbound,
            _ => EventAction::ChatWindowEvent,
        }
    }

    /// Build the kind-specific `data` body.
    pub fn data(&self) -> serde_json::Result<Value> {
        let data = match self {
            Self::AuthorizeConsumer { authorization_code } => match authorization_code {
                Some(code) => json!({"authorization": {"authorizationCode": code}}),
                None => Value::Null,
            },
            Self::ReconnectConsumer { access_token } | Self::RefreshToken { access_token } => {
                json!({"accessToken": {"token": access_token}})
            }
            Self::SendMessage {
                thread_id,
                thread_name,
                message_id,
                content,
                attachments,
            } => json!({
                "thread": thread_ref(thread_id, thread_name.as_deref()),
                "idOnExternalPlatform": message_id,
                "messageContent": serde_json::to_value(content)?,
                "attachments": serde_json::to_value(attachments)?,
            }),
            Self::LoadMoreMessages {
                thread_id,
                scroll_token,
                oldest_message_datetime,
            } => {
                let mut data = json!({
                    "thread": thread_ref(thread_id, None),
                    "scrollToken": scroll_token,
                });
                if let Some(oldest) = oldest_message_datetime {
                    data["oldestMessageDatetime"] = serde_json::to_value(oldest)?;
                }
                data
            }
            Self::RecoverThread { thread_id } | Self::RecoverLivechat { thread_id } => {
                match thread_id {
                    Some(id) => json!({"thread": thread_ref(id, None)}),
                    None => Value::Null,
                }
            }
            Self::FetchThreadList => Value::Null,
            Self::LoadThreadMetadata { thread_id }
            | Self::ArchiveThread { thread_id }
            | Self::MessageSeenByConsumer { thread_id }
            | Self::SenderTypingStarted { thread_id }
            | Self::SenderTypingEnded { thread_id } => {
                json!({"thread": thread_ref(thread_id, None)})
            }
            Self::UpdateThread {
                thread_id,
                thread_name,
            } => json!({"thread": thread_ref(thread_id, Some(thread_name))}),
        };
        Ok(data)
    }

    /// Wrap this command in an envelope with a fresh correlation id.
    pub fn envelope(
        &self,
        brand: BrandRef,
        channel: ChannelRef,
        consumer_identity: CustomerIdentity,
    ) -> serde_json::Result<OutboundEnvelope> {
        Ok(OutboundEnvelope {
            event_id: EventId::new(),
            action: self.action(),
            payload: OutboundPayload {
                event_type: self.kind().to_owned(),
                brand,
                channel,
                consumer_identity,
                data: self.data()?,
            },
        })
    }
}

fn thread_ref(id: &ThreadId, name: Option<&str>) -> Value {
    match name {
        Some(name) => json!({"idOnExternalPlatform": id, "threadName": name}),
        None => json!({"idOnExternalPlatform": id}),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
