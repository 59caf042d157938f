//! Local thread state, merged from server snapshots and live pushes.
//!
//! The store is the single place thread data mutates. Snapshots (recovery,
//! history pages) and live pushes (new messages, read receipts, assignee
//! changes) all funnel through here, each applied under one write guard so
//! concurrent events cannot interleave half-applied.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tracing::debug;

use convo_core::{
    AgentIdentity, ChatThread, Message, ThreadId, ThreadState, ThreadSummary,
};
use convo_wire::{ThreadMetadataLoadedData, ThreadRecoveredData};

use crate::errors::ClientError;

/// What a history page load produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Older messages were added; more pages may remain.
    Loaded {
        /// How many messages were new to the store.
        added: usize,
    },
    /// The server returned an empty page; history is exhausted.
    EndOfHistory,
}

/// All threads known to the session, keyed by thread id.
#[derive(Default)]
pub struct ThreadStore {
    threads: RwLock<HashMap<ThreadId, ChatThread>>,
}

impl ThreadStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ── snapshot application ────────────────────────────────────────

    /// Applies a recovery snapshot for one thread.
    ///
    /// Incoming messages are unioned into the thread by id, so re-delivering
    /// a snapshot is a no-op. The pagination cursor only moves when the merge
    /// actually added messages; a duplicate push cannot regress it. Thread
    /// state derives from the `canAddMoreMessages` flag and never moves
    /// backward.
    pub fn merge(&self, snapshot: &ThreadRecoveredData) -> ThreadId {
        let thread_id = snapshot.thread.id_on_external_platform.clone();
        let mut threads = self.threads.write();
        let thread = threads
            .entry(thread_id.clone())
            .or_insert_with(|| ChatThread::new(thread_id.clone()));

        let added = union_messages(&mut thread.messages, &snapshot.messages, false);
        if added > 0 {
            thread.scroll_token = snapshot.messages_scroll_token.clone();
        }

        if snapshot.thread.thread_name.is_some() {
            thread.thread_name = snapshot.thread.thread_name.clone();
        }
        if thread.assigned_agent.is_none() && snapshot.inbox_assignee.is_some() {
            // An agent picked the thread up; the queue no longer applies.
            thread.position_in_queue = None;
        }
        if snapshot.inbox_assignee.is_some() {
            thread.assigned_agent = snapshot.inbox_assignee.clone();
        }
        if snapshot.previous_inbox_assignee.is_some() {
            thread.last_assigned_agent = snapshot.previous_inbox_assignee.clone();
        }

        let next = if snapshot.thread.can_add_more_messages {
            ThreadState::Ready
        } else {
            ThreadState::Closed
        };
        let _ = thread.advance_state(next);

        thread_id
    }

    /// Appends one live-pushed message to its thread.
    ///
    /// The thread must already exist; a push for an unknown thread means the
    /// local model and the server disagree, which the caller surfaces rather
    /// than papering over. Returns whether the message was new. A duplicate
    /// id replaces the stored copy (the server echo of an optimistic local
    /// insert carries the authoritative timestamps).
    pub fn append_live(&self, message: &Message) -> Result<bool, ClientError> {
        let mut threads = self.threads.write();
        let thread_id = &message.thread_id_on_external_platform;
        let Some(thread) = threads.get_mut(thread_id) else {
            return Err(ClientError::InconsistentState {
                context: format!("message for unknown thread {thread_id}"),
            });
        };

        if let Some(existing) = thread.messages.iter_mut().find(|m| m.id == message.id) {
            *existing = message.clone();
            sort_messages(&mut thread.messages);
            return Ok(false);
        }
        thread.messages.push(message.clone());
        sort_messages(&mut thread.messages);
        Ok(true)
    }

    /// Prepends an older history page and replaces the pagination cursor.
    ///
    /// An empty page is the terminal "no more history" signal: the cursor is
    /// cleared and [`LoadOutcome::EndOfHistory`] reported.
    pub fn load_more(
        &self,
        thread_id: &ThreadId,
        messages: &[Message],
        scroll_token: &str,
    ) -> Result<LoadOutcome, ClientError> {
        let mut threads = self.threads.write();
        let Some(thread) = threads.get_mut(thread_id) else {
            return Err(ClientError::InconsistentState {
                context: format!("history page for unknown thread {thread_id}"),
            });
        };

        if messages.is_empty() {
            thread.scroll_token = String::new();
            return Ok(LoadOutcome::EndOfHistory);
        }

        let added = union_messages(&mut thread.messages, messages, false);
        thread.scroll_token = scroll_token.to_owned();
        Ok(LoadOutcome::Loaded { added })
    }

    /// Merges one thread's metadata (last message, owning agent).
    pub fn apply_metadata(&self, thread_id: &ThreadId, data: &ThreadMetadataLoadedData) {
        let mut threads = self.threads.write();
        let thread = threads
            .entry(thread_id.clone())
            .or_insert_with(|| ChatThread::new(thread_id.clone()));

        if let Some(last) = &data.last_message {
            let _ = union_messages(&mut thread.messages, std::slice::from_ref(last), true);
        }
        if data.owner_assignee.is_some() {
            thread.assigned_agent = data.owner_assignee.clone();
        }
        let _ = thread.advance_state(ThreadState::Loaded);
    }

    // ── registration ────────────────────────────────────────────────

    /// Creates a thread on first reference. Returns whether it was new.
    pub fn ensure_thread(&self, thread_id: &ThreadId) -> bool {
        let mut threads = self.threads.write();
        if threads.contains_key(thread_id) {
            return false;
        }
        let _ = threads.insert(thread_id.clone(), ChatThread::new(thread_id.clone()));
        true
    }

    /// Seeds threads from a fetched thread list.
    pub fn register_summaries(&self, summaries: &[ThreadSummary]) {
        let mut threads = self.threads.write();
        for summary in summaries {
            let id = summary.id_on_external_platform.clone();
            let thread = threads
                .entry(id.clone())
                .or_insert_with(|| ChatThread::new(id));
            if summary.thread_name.is_some() {
                thread.thread_name = summary.thread_name.clone();
            }
            let next = if summary.can_add_more_messages {
                ThreadState::Received
            } else {
                ThreadState::Closed
            };
            let _ = thread.advance_state(next);
        }
    }

    // ── live updates ────────────────────────────────────────────────

    /// Records a queue position update.
    ///
    /// Applies to the referenced thread when the event names one; otherwise
    /// falls back to the store's sole thread. Returns the thread that took
    /// the update, or `None` when no unambiguous target exists.
    pub fn set_queue_position(
        &self,
        position: u32,
        thread: Option<&ThreadSummary>,
    ) -> Option<ThreadId> {
        let mut threads = self.threads.write();
        let target = match thread {
            Some(summary) => Some(summary.id_on_external_platform.clone()),
            None if threads.len() == 1 => threads.keys().next().cloned(),
            None => None,
        };
        let Some(thread_id) = target else {
            debug!(position, "queue position with no addressable thread");
            return None;
        };
        let entry = threads
            .entry(thread_id.clone())
            .or_insert_with(|| ChatThread::new(thread_id.clone()));
        entry.position_in_queue = Some(position);
        Some(thread_id)
    }

    /// Records an assignee change. A newly present assignee clears any
    /// tracked queue position.
    pub fn set_assignee(
        &self,
        thread_id: &ThreadId,
        assignee: Option<&AgentIdentity>,
        previous: Option<&AgentIdentity>,
    ) {
        let mut threads = self.threads.write();
        let thread = threads
            .entry(thread_id.clone())
            .or_insert_with(|| ChatThread::new(thread_id.clone()));
        if thread.assigned_agent.is_none() && assignee.is_some() {
            thread.position_in_queue = None;
        }
        thread.assigned_agent = assignee.cloned();
        if previous.is_some() {
            thread.last_assigned_agent = previous.cloned();
        }
    }

    /// Renames an existing thread. Unknown threads are ignored.
    pub fn set_thread_name(&self, thread_id: &ThreadId, name: &str) -> bool {
        let mut threads = self.threads.write();
        match threads.get_mut(thread_id) {
            Some(thread) => {
                thread.thread_name = Some(name.to_owned());
                true
            }
            None => false,
        }
    }

    /// Applies updated read statistics to an existing message.
    ///
    /// Returns whether a stored message was updated; unknown threads or
    /// messages are ignored (receipts can outlive local history).
    pub fn mark_read(&self, message: &Message) -> bool {
        let mut threads = self.threads.write();
        let Some(thread) = threads.get_mut(&message.thread_id_on_external_platform) else {
            return false;
        };
        match thread.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => {
                existing.user_statistics = message.user_statistics.clone();
                true
            }
            None => false,
        }
    }

    /// Moves a thread to its closed terminal state.
    pub fn mark_archived(&self, thread_id: &ThreadId) -> bool {
        let mut threads = self.threads.write();
        match threads.get_mut(thread_id) {
            Some(thread) => thread.advance_state(ThreadState::Closed),
            None => false,
        }
    }

    /// Drops all thread state.
    pub fn clear(&self) {
        self.threads.write().clear();
    }

    // ── accessors ───────────────────────────────────────────────────

    /// A point-in-time copy of one thread.
    #[must_use]
    pub fn thread(&self, thread_id: &ThreadId) -> Option<ChatThread> {
        self.threads.read().get(thread_id).cloned()
    }

    /// Ids of every known thread.
    #[must_use]
    pub fn thread_ids(&self) -> Vec<ThreadId> {
        self.threads.read().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.threads.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.threads.read().is_empty()
    }
}

/// Unions `incoming` into `messages` by id, re-sorting when anything changed.
/// Returns how many messages were new. With `replace` set, a duplicate id
/// overwrites the stored copy instead of being skipped.
fn union_messages(messages: &mut Vec<Message>, incoming: &[Message], replace: bool) -> usize {
    let existing: HashSet<_> = messages.iter().map(|m| m.id.clone()).collect();
    let mut added = 0;
    for message in incoming {
        if existing.contains(&message.id) {
            if replace {
                if let Some(slot) = messages.iter_mut().find(|m| m.id == message.id) {
                    *slot = message.clone();
                }
            }
            continue;
        }
        messages.push(message.clone());
        added += 1;
    }
    if added > 0 {
        sort_messages(messages);
    }
    added
}

fn sort_messages(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
