//! Access-token type shared by the session and the credential stores.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How long before the recorded expiry a token is already treated as stale.
///
/// Refreshing slightly early keeps a send from racing the server-side expiry
/// mid-flight.
pub const DEFAULT_EXPIRY_BUFFER_MS: i64 = 2_000;

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A bearer token issued by the gateway, valid until `expires_at`.
///
/// The gateway reports a relative lifetime (`expiresIn` seconds); we pin it
/// to an absolute wall-clock instant at receipt so staleness checks stay
/// meaningful across restarts.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    /// The opaque token value sent on the wire.
    pub token: String,
    /// Absolute expiry, milliseconds since the Unix epoch.
    pub expires_at: i64,
}

impl AccessToken {
    /// Builds a token from the gateway's relative lifetime.
    #[must_use]
    pub fn with_ttl(token: impl Into<String>, expires_in_seconds: i64) -> Self {
        Self {
            token: token.into(),
            expires_at: now_ms() + expires_in_seconds.saturating_mul(1_000),
        }
    }

    /// Whether the token is expired, or will be within `buffer_ms`.
    #[must_use]
    pub fn is_expired(&self, buffer_ms: i64) -> bool {
        now_ms() + buffer_ms >= self.expires_at
    }

    /// [`is_expired`](Self::is_expired) with the default buffer.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.is_expired(DEFAULT_EXPIRY_BUFFER_MS)
    }
}

// Tokens end up in logs via struct debug output more often than via
// deliberate printing. Redact the value, keep the expiry.
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
