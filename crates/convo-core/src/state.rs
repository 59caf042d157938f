//! Connection lifecycle state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the socket session.
///
/// The lifecycle is totally ordered (`initial → preparing → prepared →
/// {offline} → connecting → connected → ready → closed`) and monotonic except
/// for explicit re-entry: reconnection re-enters at [`Connecting`] without
/// passing through [`Initial`], and `offline` is reachable only from
/// `prepared`/`connecting` on availability-gated channels.
///
/// [`Connecting`]: ConnectionState::Connecting
/// [`Initial`]: ConnectionState::Initial
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// Nothing prepared yet.
    Initial,
    /// Session is being assembled.
    Preparing,
    /// Session assembled; no socket open.
    Prepared,
    /// Availability-gated channel is currently unavailable.
    Offline,
    /// Socket dialing / handshake in flight.
    Connecting,
    /// Socket open and handshake acknowledged.
    Connected,
    /// Initial thread/queue bootstrap completed.
    Ready,
    /// Closed by the caller or torn down after a fatal failure.
    Closed,
}

/// All connection states, for exhaustive serde tests.
pub const ALL_CONNECTION_STATES: [ConnectionState; 8] = [
    ConnectionState::Initial,
    ConnectionState::Preparing,
    ConnectionState::Prepared,
    ConnectionState::Offline,
    ConnectionState::Connecting,
    ConnectionState::Connected,
    ConnectionState::Ready,
    ConnectionState::Closed,
];

impl ConnectionState {
    /// Whether the socket is open (handshake done, sends allowed).
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Connected | Self::Ready)
    }

    /// Whether `next` is a legal transition from `self`.
    ///
    /// `Closed` is reachable from every state; `Connecting` is additionally
    /// re-enterable from `Connected`/`Ready` (reconnect) and from `Closed`
    /// (explicit caller reset).
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{
            Closed, Connected, Connecting, Initial, Offline, Prepared, Preparing, Ready,
        };
        if next == Closed {
            return self != Closed;
        }
        matches!(
            (self, next),
            (Initial, Preparing)
                | (Preparing, Prepared)
                | (Prepared, Connecting | Offline)
                | (Offline, Connecting)
                | (Connecting, Connected | Offline)
                | (Connected, Ready | Connecting)
                | (Ready, Connecting)
                | (Closed, Connecting)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initial => "initial",
            Self::Preparing => "preparing",
            Self::Prepared => "prepared",
            Self::Offline => "offline",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ready => "ready",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_roundtrip_all_states() {
        for state in ALL_CONNECTION_STATES {
            let json = serde_json::to_string(&state).unwrap();
            let back: ConnectionState = serde_json::from_str(&json).unwrap();
            assert_eq!(back, state, "roundtrip failed for {state}");
        }
    }

    #[test]
    fn wire_names_are_camel_case() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::Connecting).unwrap(),
            "\"connecting\""
        );
        assert_eq!(
            serde_json::to_string(&ConnectionState::Ready).unwrap(),
            "\"ready\""
        );
    }

    #[test]
    fn lifecycle_is_ordered() {
        assert!(ConnectionState::Initial < ConnectionState::Preparing);
        assert!(ConnectionState::Prepared < ConnectionState::Connecting);
        assert!(ConnectionState::Connected < ConnectionState::Ready);
        assert!(ConnectionState::Ready < ConnectionState::Closed);
    }

    #[test]
    fn forward_transitions_allowed() {
        use ConnectionState::{Connected, Connecting, Initial, Prepared, Preparing, Ready};
        assert!(Initial.can_transition_to(Preparing));
        assert!(Preparing.can_transition_to(Prepared));
        assert!(Prepared.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Ready));
    }

    #[test]
    fn offline_only_from_prepared_or_connecting() {
        use ConnectionState::Offline;
        for state in ALL_CONNECTION_STATES {
            let allowed = matches!(
                state,
                ConnectionState::Prepared | ConnectionState::Connecting
            );
            assert_eq!(
                state.can_transition_to(Offline),
                allowed,
                "offline reachability from {state}"
            );
        }
    }

    #[test]
    fn reconnect_reenters_at_connecting() {
        assert!(ConnectionState::Ready.can_transition_to(ConnectionState::Connecting));
        assert!(ConnectionState::Connected.can_transition_to(ConnectionState::Connecting));
        assert!(!ConnectionState::Ready.can_transition_to(ConnectionState::Initial));
    }

    #[test]
    fn closed_from_everywhere_except_itself() {
        for state in ALL_CONNECTION_STATES {
            assert_eq!(
                state.can_transition_to(ConnectionState::Closed),
                state != ConnectionState::Closed
            );
        }
    }

    #[test]
    fn no_backward_jumps() {
        assert!(!ConnectionState::Ready.can_transition_to(ConnectionState::Prepared));
        assert!(!ConnectionState::Connected.can_transition_to(ConnectionState::Preparing));
        assert!(!ConnectionState::Connecting.can_transition_to(ConnectionState::Prepared));
    }

    #[test]
    fn is_open_only_when_connected_or_ready() {
        for state in ALL_CONNECTION_STATES {
            let expected = matches!(
                state,
                ConnectionState::Connected | ConnectionState::Ready
            );
            assert_eq!(state.is_open(), expected, "is_open for {state}");
        }
    }
}
