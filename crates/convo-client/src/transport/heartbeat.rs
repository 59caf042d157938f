//! Heartbeat probe loop for an open connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;

use convo_wire::heartbeat_frame;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// The server stopped responding within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Run heartbeat probes over an open connection.
///
/// At each `interval` tick the alive flag is checked and cleared, then a
/// heartbeat frame is queued. The reader sets the flag whenever a pong (text
/// or control) arrives, so a cleared flag at the next tick counts as a miss.
/// Once `max_missed` consecutive misses accumulate the connection is
/// considered dead and [`HeartbeatOutcome::TimedOut`] is returned.
///
/// `max_missed` is computed as `timeout / interval` (clamped to at least 1).
pub async fn run_heartbeat(
    frames: mpsc::UnboundedSender<String>,
    alive: Arc<AtomicBool>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatOutcome {
    let mut check_interval = time::interval(interval);
    let mut missed_pongs: u32 = 0;
    let interval_ms = interval.as_millis().max(1);
    #[allow(clippy::cast_possible_truncation)]
    let max_missed = (timeout.as_millis() / interval_ms).max(1) as u32;

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                // Mark as not alive until the next pong
                if alive.swap(false, Ordering::Relaxed) {
                    missed_pongs = 0;
                } else {
                    missed_pongs += 1;
                    if missed_pongs >= max_missed {
                        return HeartbeatOutcome::TimedOut;
                    }
                }
                if frames.send(heartbeat_frame()).is_err() {
                    // Writer gone, the connection is already tearing down.
                    return HeartbeatOutcome::Cancelled;
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatOutcome::Cancelled;
            }
        }
    }
}
