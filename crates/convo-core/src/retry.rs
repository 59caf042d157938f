//! Reconnect backoff configuration and delay calculation.
//!
//! Portable, sync-only building blocks; the async reconnect loop lives in
//! `convo-client` (which has access to tokio):
//!
//! - [`RetryConfig`]: backoff parameters (base, cap)
//! - [`backoff_delay`] / [`backoff_delay_with_random`]: exponential backoff
//!   with additive jitter
//!
//! Contract: `delay = min(base^attempt + random(0, 1), max_delay_seconds)`.
//! The cap applies after jitter, so the delay never exceeds the configured
//! maximum regardless of the random draw.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default exponential base in seconds.
pub const DEFAULT_BASE_DELAY_SECONDS: f64 = 2.0;
/// Default delay cap in seconds.
pub const DEFAULT_MAX_DELAY_SECONDS: f64 = 30.0;

/// Configuration for reconnect backoff.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Exponential base in seconds (default: 2.0).
    #[serde(default = "default_base_delay_seconds")]
    pub base_delay_seconds: f64,
    /// Delay cap in seconds, applied after jitter (default: 30.0).
    #[serde(default = "default_max_delay_seconds")]
    pub max_delay_seconds: f64,
}

fn default_base_delay_seconds() -> f64 {
    DEFAULT_BASE_DELAY_SECONDS
}
fn default_max_delay_seconds() -> f64 {
    DEFAULT_MAX_DELAY_SECONDS
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_seconds: DEFAULT_BASE_DELAY_SECONDS,
            max_delay_seconds: DEFAULT_MAX_DELAY_SECONDS,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Backoff delay without jitter: `min(base^attempt, max_delay)`.
///
/// `attempt` is zero-based (0 for the first retry). Callers wanting jitter
/// use [`backoff_delay_with_random`]; this variant is the deterministic lower
/// bound and is what tests assert against.
#[must_use]
pub fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    backoff_delay_with_random(attempt, config, 0.0)
}

/// Backoff delay with explicit randomness.
///
/// `random` should be a value in `[0.0, 1.0)` from a PRNG; it is added as
/// whole-second-scale jitter before the cap is applied:
/// `min(base^attempt + random, max_delay)`.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn backoff_delay_with_random(attempt: u32, config: &RetryConfig, random: f64) -> Duration {
    // powi saturates to +inf for large exponents; min() brings it back under
    // the cap, so no explicit attempt clamp is needed.
    let exponential = config.base_delay_seconds.powi(attempt.min(1024) as i32);
    let jittered = exponential + random.clamp(0.0, 1.0);
    let capped = jittered.min(config.max_delay_seconds).max(0.0);
    Duration::from_secs_f64(capped)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
