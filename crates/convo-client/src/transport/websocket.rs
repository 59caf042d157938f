//! Gateway transport over `tokio-tungstenite`.
//!
//! Each connection runs three tasks sharing one cancellation token: a writer
//! draining the outbound frame queue, a reader forwarding inbound frames and
//! absorbing pongs, and the heartbeat probe loop. Whichever task observes the
//! end of the connection first emits the single `Closed` event and cancels
//! the other two.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::heartbeat::{HeartbeatOutcome, run_heartbeat};
use super::{CloseReason, Transport, TransportError, TransportEvent};
use crate::config::SocketConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// State shared between the three connection tasks.
struct Shared {
    open: AtomicBool,
    closed_emitted: AtomicBool,
    events: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
}

impl Shared {
    fn forward_frame(&self, text: String) {
        let _ = self.events.send(TransportEvent::Frame(text));
    }

    /// Ends the connection with `reason`. Only the first caller emits the
    /// `Closed` event; every caller cancels the remaining tasks.
    fn emit_closed(&self, reason: CloseReason) {
        self.open.store(false, Ordering::Relaxed);
        if !self.closed_emitted.swap(true, Ordering::Relaxed) {
            let _ = self.events.send(TransportEvent::Closed { reason });
        }
        self.cancel.cancel();
    }
}

/// One live connection and its task handles.
struct Active {
    frames: mpsc::UnboundedSender<String>,
    shared: Arc<Shared>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Production [`Transport`] over a WebSocket.
pub struct WebSocketTransport {
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    active: parking_lot::Mutex<Option<Active>>,
}

impl WebSocketTransport {
    /// A transport tuned by `config`.
    #[must_use]
    pub fn new(config: &SocketConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(config.heartbeat_timeout_ms),
            active: parking_lot::Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        // Tear down any previous connection first.
        if let Some(previous) = self.active.lock().take() {
            previous.shared.emit_closed(CloseReason::Local);
        }

        let (ws, _) = connect_async(url).await.map_err(|e| match e {
            WsError::Url(e) => TransportError::InvalidUrl(e.to_string()),
            other => TransportError::Connect(other.to_string()),
        })?;
        debug!(url, "socket connected");

        let (ws_tx, ws_rx) = ws.split();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));
        let shared = Arc::new(Shared {
            open: AtomicBool::new(true),
            closed_emitted: AtomicBool::new(false),
            events: events_tx,
            cancel: CancellationToken::new(),
        });

        let tasks = vec![
            tokio::spawn(run_writer(ws_tx, frames_rx, shared.clone())),
            tokio::spawn(run_reader(ws_rx, shared.clone(), alive.clone())),
            tokio::spawn(supervise_heartbeat(
                frames_tx.clone(),
                alive,
                self.heartbeat_interval,
                self.heartbeat_timeout,
                shared.clone(),
            )),
        ];

        *self.active.lock() = Some(Active {
            frames: frames_tx,
            shared,
            events: Some(events_rx),
            tasks,
        });
        Ok(())
    }

    fn send(&self, frame: String) -> Result<(), TransportError> {
        let guard = self.active.lock();
        let active = guard.as_ref().ok_or(TransportError::NotConnected)?;
        if !active.shared.open.load(Ordering::Relaxed) {
            return Err(TransportError::NotConnected);
        }
        active
            .frames
            .send(frame)
            .map_err(|_| TransportError::NotConnected)
    }

    async fn close(&self) {
        let active = self.active.lock().take();
        if let Some(active) = active {
            active.shared.emit_closed(CloseReason::Local);
            // Let the writer flush its close frame before returning.
            for task in active.tasks {
                let _ = task.await;
            }
        }
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.active.lock().as_mut().and_then(|a| a.events.take())
    }

    fn is_open(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|a| a.shared.open.load(Ordering::Relaxed))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection tasks
// ─────────────────────────────────────────────────────────────────────────────

async fn run_writer(
    mut sink: SplitSink<WsStream, Message>,
    mut frames: mpsc::UnboundedReceiver<String>,
    shared: Arc<Shared>,
) {
    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    shared.emit_closed(CloseReason::Error(e.to_string()));
                    break;
                }
            }
            () = shared.cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

async fn run_reader(mut stream: SplitStream<WsStream>, shared: Arc<Shared>, alive: Arc<AtomicBool>) {
    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.as_str() == "pong" {
                            // Heartbeat reply. Mark liveness and swallow it.
                            alive.store(true, Ordering::Relaxed);
                        } else {
                            shared.forward_frame(text.to_string());
                        }
                    }
                    // tungstenite answers pings for us while the stream is
                    // polled; both directions prove the peer is there.
                    Some(Ok(Message::Pong(_) | Message::Ping(_))) => {
                        alive.store(true, Ordering::Relaxed);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        shared.emit_closed(CloseReason::Remote);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        shared.emit_closed(CloseReason::Error(e.to_string()));
                        break;
                    }
                }
            }
            () = shared.cancel.cancelled() => break,
        }
    }
}

async fn supervise_heartbeat(
    frames: mpsc::UnboundedSender<String>,
    alive: Arc<AtomicBool>,
    interval: Duration,
    timeout: Duration,
    shared: Arc<Shared>,
) {
    let outcome = run_heartbeat(frames, alive, interval, timeout, shared.cancel.clone()).await;
    if outcome == HeartbeatOutcome::TimedOut {
        debug!("heartbeat budget exhausted, dropping connection");
        shared.emit_closed(CloseReason::HeartbeatTimeout);
    }
}
