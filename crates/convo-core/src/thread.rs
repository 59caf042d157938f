//! Chat threads: the per-conversation unit of state.

use serde::{Deserialize, Serialize};

use crate::identity::AgentIdentity;
use crate::ids::ThreadId;
use crate::message::Message;

/// Lifecycle of a single thread, strictly forward-moving.
///
/// `pending → received → loaded → ready → closed`. Merges may only advance
/// this state; see [`ChatThread::advance_state`].
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum ThreadState {
    /// Created locally, nothing confirmed by the server yet.
    Pending,
    /// The server has acknowledged the thread exists.
    Received,
    /// Metadata (name, assignee) is known; messages may still be partial.
    Loaded,
    /// Fully recovered and accepting new messages.
    Ready,
    /// Archived or otherwise closed to new messages. Terminal.
    Closed,
}

/// All thread states, for exhaustive serde tests.
pub const ALL_THREAD_STATES: [ThreadState; 5] = [
    ThreadState::Pending,
    ThreadState::Received,
    ThreadState::Loaded,
    ThreadState::Ready,
    ThreadState::Closed,
];

/// Compact thread descriptor as sent inside event payloads and thread lists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    /// Externally-visible thread id.
    pub id_on_external_platform: ThreadId,
    /// Display name, when one has been set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_name: Option<String>,
    /// Channel the thread lives on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Whether the thread still accepts messages.
    #[serde(default = "default_true")]
    pub can_add_more_messages: bool,
}

fn default_true() -> bool {
    true
}

/// One conversation: ordered messages plus assignment and paging state.
///
/// Threads are never deleted; a closed thread stays in the store with
/// [`ThreadState::Closed`]. All mutation goes through the thread store so
/// read-modify-write sequences stay atomic.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatThread {
    /// Externally-visible id, stable across reconnects.
    pub id: ThreadId,
    /// Display name, when set by either side.
    pub thread_name: Option<String>,
    /// Messages unique by id, sorted ascending by creation timestamp.
    pub messages: Vec<Message>,
    /// Currently assigned agent.
    pub assigned_agent: Option<AgentIdentity>,
    /// Agent assigned before the current one.
    pub last_assigned_agent: Option<AgentIdentity>,
    /// Lifecycle state, strictly forward-moving.
    pub state: ThreadState,
    /// Opaque cursor for loading older history; empty = no more history.
    pub scroll_token: String,
    /// Position in the waiting queue, for queued live chats.
    pub position_in_queue: Option<u32>,
}

impl ChatThread {
    /// Fresh local thread in [`ThreadState::Pending`] with no history.
    #[must_use]
    pub fn new(id: ThreadId) -> Self {
        Self {
            id,
            thread_name: None,
            messages: Vec::new(),
            assigned_agent: None,
            last_assigned_agent: None,
            state: ThreadState::Pending,
            scroll_token: String::new(),
            position_in_queue: None,
        }
    }

    /// Whether an older history page can still be requested.
    #[must_use]
    pub fn has_more_messages_to_load(&self) -> bool {
        !self.scroll_token.is_empty()
    }

    /// The newest message, if any.
    #[must_use]
    pub fn latest_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Advance the lifecycle state, ignoring backward moves.
    ///
    /// Returns `true` when the state actually changed.
    pub fn advance_state(&mut self, next: ThreadState) -> bool {
        if next > self.state {
            self.state = next;
            true
        } else {
            false
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
