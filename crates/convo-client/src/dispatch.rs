//! Typed event fan-out to registered observers.
//!
//! Embedders subscribe per [`EventKind`] or to everything; the session pushes
//! each decoded inbound event through here after its own bookkeeping. Errors
//! that arrive outside any pending command (push-path errors) flow through a
//! separate error channel on the same registry. Callbacks are cloned out of
//! the registry lock before they run, so an observer may register or remove
//! observers from inside its callback.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::trace;

use convo_wire::{EventKind, InboundEvent};

use crate::errors::ClientError;

/// Identifies one registered observer so it can be removed later.
///
/// Handles from different registries (event dispatch, session notifications)
/// are only meaningful to the registry that issued them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverHandle(pub(crate) u64);

type Callback = Arc<dyn Fn(&InboundEvent) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&ClientError) + Send + Sync>;

/// Observer registry for inbound events.
#[derive(Default)]
pub struct Dispatcher {
    next_id: AtomicU64,
    by_kind: RwLock<HashMap<EventKind, Vec<(ObserverHandle, Callback)>>>,
    any: RwLock<Vec<(ObserverHandle, Callback)>>,
    errors: RwLock<Vec<(ObserverHandle, ErrorCallback)>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_handle(&self) -> ObserverHandle {
        ObserverHandle(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers an observer for one event kind.
    pub fn on(
        &self,
        kind: EventKind,
        callback: impl Fn(&InboundEvent) + Send + Sync + 'static,
    ) -> ObserverHandle {
        let handle = self.next_handle();
        self.by_kind
            .write()
            .entry(kind)
            .or_default()
            .push((handle, Arc::new(callback)));
        handle
    }

    /// Registers an observer for every event, including kinds this client
    /// does not understand.
    pub fn on_any(&self, callback: impl Fn(&InboundEvent) + Send + Sync + 'static) -> ObserverHandle {
        let handle = self.next_handle();
        self.any.write().push((handle, Arc::new(callback)));
        handle
    }

    /// Registers an observer for push-path errors: failures that arrive
    /// outside any in-flight command, so no caller is waiting for them.
    pub fn on_error(&self, callback: impl Fn(&ClientError) + Send + Sync + 'static) -> ObserverHandle {
        let handle = self.next_handle();
        self.errors.write().push((handle, Arc::new(callback)));
        handle
    }

    /// Removes an observer. Returns whether it was still registered.
    pub fn remove(&self, handle: ObserverHandle) -> bool {
        {
            let mut any = self.any.write();
            let before = any.len();
            any.retain(|(h, _)| *h != handle);
            if any.len() < before {
                return true;
            }
        }
        {
            let mut errors = self.errors.write();
            let before = errors.len();
            errors.retain(|(h, _)| *h != handle);
            if errors.len() < before {
                return true;
            }
        }
        let mut by_kind = self.by_kind.write();
        for list in by_kind.values_mut() {
            let before = list.len();
            list.retain(|(h, _)| *h != handle);
            if list.len() < before {
                return true;
            }
        }
        false
    }

    /// Drops every registered observer.
    pub fn clear(&self) {
        self.by_kind.write().clear();
        self.any.write().clear();
        self.errors.write().clear();
    }

    /// Delivers `event` to matching observers, then to catch-all observers.
    pub fn dispatch(&self, event: &InboundEvent) {
        let mut callbacks: Vec<Callback> = Vec::new();
        if let Some(kind) = event.kind() {
            if let Some(list) = self.by_kind.read().get(&kind) {
                callbacks.extend(list.iter().map(|(_, cb)| cb.clone()));
            }
        } else {
            trace!(kind = event.raw_kind(), "unrecognized event kind");
        }
        callbacks.extend(self.any.read().iter().map(|(_, cb)| cb.clone()));

        for callback in callbacks {
            callback(event);
        }
    }

    /// Delivers a push-path error to error observers.
    pub fn dispatch_error(&self, error: &ClientError) {
        let callbacks: Vec<ErrorCallback> =
            self.errors.read().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in callbacks {
            callback(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn archived() -> InboundEvent {
        InboundEvent::ThreadArchived
    }

    fn unknown() -> InboundEvent {
        InboundEvent::Unknown {
            kind: "SomethingNew".to_owned(),
            data: json!({}),
        }
    }

    #[test]
    fn typed_observer_sees_matching_kind_only() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let _handle = dispatcher.on(EventKind::ThreadArchived, move |_| {
            let _ = hits2.fetch_add(1, Ordering::Relaxed);
        });

        dispatcher.dispatch(&archived());
        dispatcher.dispatch(&unknown());

        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn catch_all_sees_everything() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let _handle = dispatcher.on_any(move |_| {
            let _ = hits2.fetch_add(1, Ordering::Relaxed);
        });

        dispatcher.dispatch(&archived());
        dispatcher.dispatch(&unknown());

        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn removed_observer_stops_firing() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let handle = dispatcher.on(EventKind::ThreadArchived, move |_| {
            let _ = hits2.fetch_add(1, Ordering::Relaxed);
        });

        dispatcher.dispatch(&archived());
        assert!(dispatcher.remove(handle));
        dispatcher.dispatch(&archived());

        assert_eq!(hits.load(Ordering::Relaxed), 1);
        // Second removal is a no-op.
        assert!(!dispatcher.remove(handle));
    }

    #[test]
    fn observer_can_remove_itself_mid_dispatch() {
        let dispatcher = Arc::new(Dispatcher::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let dispatcher2 = dispatcher.clone();
        let hits2 = hits.clone();
        let handle = Arc::new(parking_lot::Mutex::new(None));
        let handle2 = handle.clone();
        let registered = dispatcher.on_any(move |_| {
            let _ = hits2.fetch_add(1, Ordering::Relaxed);
            if let Some(h) = handle2.lock().take() {
                let _ = dispatcher2.remove(h);
            }
        });
        *handle.lock() = Some(registered);

        dispatcher.dispatch(&archived());
        dispatcher.dispatch(&archived());

        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn handles_are_unique_across_registries() {
        let dispatcher = Dispatcher::new();
        let a = dispatcher.on(EventKind::MessageCreated, |_| {});
        let b = dispatcher.on_any(|_| {});
        let c = dispatcher.on(EventKind::MessageCreated, |_| {});
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn error_channel_is_separate_from_events() {
        let dispatcher = Dispatcher::new();
        let event_hits = Arc::new(AtomicUsize::new(0));
        let error_hits = Arc::new(AtomicUsize::new(0));
        let event_hits2 = event_hits.clone();
        let error_hits2 = error_hits.clone();
        let _a = dispatcher.on_any(move |_| {
            let _ = event_hits2.fetch_add(1, Ordering::Relaxed);
        });
        let handle = dispatcher.on_error(move |_| {
            let _ = error_hits2.fetch_add(1, Ordering::Relaxed);
        });

        dispatcher.dispatch_error(&crate::errors::ClientError::NotConnected);
        assert_eq!(event_hits.load(Ordering::Relaxed), 0);
        assert_eq!(error_hits.load(Ordering::Relaxed), 1);

        assert!(dispatcher.remove(handle));
        dispatcher.dispatch_error(&crate::errors::ClientError::NotConnected);
        assert_eq!(error_hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn clear_drops_all_observers() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let hits3 = hits.clone();
        let _a = dispatcher.on(EventKind::ThreadArchived, move |_| {
            let _ = hits2.fetch_add(1, Ordering::Relaxed);
        });
        let _b = dispatcher.on_any(move |_| {
            let _ = hits3.fetch_add(1, Ordering::Relaxed);
        });

        dispatcher.clear();
        dispatcher.dispatch(&archived());

        assert_eq!(hits.load(Ordering::Relaxed), 0);
    }
}
