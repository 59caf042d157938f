//! # convo-wire
//!
//! Wire protocol for the convo chat client:
//!
//! - [`envelope`]: outbound envelope shape and the dual-shape inbound envelope
//!   (flat vs. legacy `postback`-nested)
//! - [`events`]: typed inbound event kinds and payloads
//! - [`commands`]: outbound command constructors
//! - [`codec`]: frame decoding with error-shape short-circuiting
//! - [`errors`]: server/operation error shapes and decode failures

#![deny(unsafe_code)]

pub mod codec;
pub mod commands;
pub mod envelope;
pub mod errors;
pub mod events;

pub use codec::{decode_frame, DecodedFrame};
pub use commands::OutboundCommand;
pub use envelope::{
    heartbeat_frame, BrandRef, ChannelRef, EventAction, OutboundEnvelope, OutboundPayload,
};
pub use errors::{DecodeError, ErrorCode, OperationError, ServerError};
pub use events::{
    AccessTokenPayload, AgentTypingData, ConsumerAuthorizedData, EventKind, InboundEvent,
    InboxAssigneeChangedData, MessageCreatedData, MessageReadChangedData, MoreMessagesLoadedData,
    QueuePositionData, ThreadListFetchedData, ThreadMetadataLoadedData, ThreadRecoveredData,
    TokenRefreshedData,
};
