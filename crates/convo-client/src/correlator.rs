//! Request/response correlation over the shared socket.
//!
//! Every command goes out with a fresh `eventId`; the matching response comes
//! back carrying the same id. The correlator parks a oneshot sender per
//! in-flight command and hands the response (or failure) to exactly one
//! waiter. Entries are removed before resolution, so a late duplicate finds
//! nothing to resolve.

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;

use convo_core::EventId;
use convo_wire::InboundEvent;

use crate::errors::ClientError;

/// Response slot for one in-flight command.
type ResponseTx = oneshot::Sender<Result<InboundEvent, ClientError>>;

struct PendingCommand {
    kind: &'static str,
    tx: ResponseTx,
}

/// In-flight command registry keyed by correlation id.
#[derive(Default)]
pub(crate) struct Correlator {
    pending: DashMap<EventId, PendingCommand>,
}

impl Correlator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Parks a waiter for `event_id`. Must be called before the frame is
    /// written, or the response can race past the registration.
    pub(crate) fn register(
        &self,
        event_id: EventId,
        kind: &'static str,
    ) -> oneshot::Receiver<Result<InboundEvent, ClientError>> {
        let (tx, rx) = oneshot::channel();
        let _ = self.pending.insert(event_id, PendingCommand { kind, tx });
        rx
    }

    /// Hands `outcome` to the waiter for `event_id`, if one is still parked.
    ///
    /// Returns whether a waiter was found. A waiter that already gave up
    /// (timed out) drops its receiver; the send failure is harmless.
    pub(crate) fn resolve(
        &self,
        event_id: &EventId,
        outcome: Result<InboundEvent, ClientError>,
    ) -> bool {
        let Some((_, pending)) = self.pending.remove(event_id) else {
            return false;
        };
        if pending.tx.send(outcome).is_err() {
            debug!(
                event_id = %event_id,
                kind = pending.kind,
                "waiter gone before its response arrived"
            );
        }
        true
    }

    /// Drops the waiter slot for `event_id` without resolving it.
    pub(crate) fn discard(&self, event_id: &EventId) {
        let _ = self.pending.remove(event_id);
    }

    /// Fails every in-flight command with [`ClientError::NotConnected`].
    pub(crate) fn cancel_all(&self) {
        // Collect first: removing while iterating can contend on a shard.
        let keys: Vec<EventId> = self.pending.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, pending)) = self.pending.remove(&key) {
                let _ = pending.tx.send(Err(ClientError::NotConnected));
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}
