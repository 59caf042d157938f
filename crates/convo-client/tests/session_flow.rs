//! End-to-end session flows against a scripted transport.
//!
//! The fake transport captures every outbound frame and lets each test play
//! the gateway: read a frame, answer it with a canned event echoing the
//! frame's correlation id, or inject unsolicited pushes and closes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Result;
use assert_matches::assert_matches;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use convo_client::transport::{CloseReason, Transport, TransportError, TransportEvent};
use convo_client::{
    AccessToken, ChannelMode, ClientConfig, ClientError, ConnectionState, Environment, ErrorCode,
    EventKind, LoadOutcome, MemoryTokenStorage, SessionController, SessionNotification,
    StorageError, ThreadId, ThreadState, TokenStorage,
};

// ─────────────────────────────────────────────────────────────────────────────
// Scripted transport
// ─────────────────────────────────────────────────────────────────────────────

struct FakeTransport {
    sent: mpsc::UnboundedSender<String>,
    inbound: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    pending: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    open: AtomicBool,
    connects: AtomicU32,
    fail_connects: AtomicU32,
}

impl FakeTransport {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (sent, sent_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            sent,
            inbound: Mutex::new(None),
            pending: Mutex::new(None),
            open: AtomicBool::new(false),
            connects: AtomicU32::new(0),
            fail_connects: AtomicU32::new(0),
        });
        (transport, sent_rx)
    }

    /// Delivers one inbound frame to the session.
    fn push_frame(&self, frame: &Value) {
        let tx = self.inbound.lock().clone().expect("no open connection");
        tx.send(TransportEvent::Frame(frame.to_string()))
            .expect("reader gone");
    }

    /// Simulates the connection dying under the session.
    fn drop_connection(&self) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(tx) = self.inbound.lock().take() {
            let _ = tx.send(TransportEvent::Closed {
                reason: CloseReason::Error("connection reset".into()),
            });
        }
    }

    fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Makes the next `n` dials fail.
    fn fail_next_connects(&self, n: u32) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, _url: &str) -> Result<(), TransportError> {
        let _ = self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connects.load(Ordering::SeqCst) > 0 {
            let _ = self.fail_connects.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::Connect("scripted dial failure".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound.lock() = Some(tx);
        *self.pending.lock() = Some(rx);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn send(&self, frame: String) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.sent
            .send(frame)
            .map_err(|_| TransportError::NotConnected)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(tx) = self.inbound.lock().take() {
            let _ = tx.send(TransportEvent::Closed {
                reason: CloseReason::Local,
            });
        }
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.pending.lock().take()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Harness and canned frames
// ─────────────────────────────────────────────────────────────────────────────

struct Harness {
    session: Arc<SessionController>,
    transport: Arc<FakeTransport>,
    sent: mpsc::UnboundedReceiver<String>,
    storage: Arc<MemoryTokenStorage>,
}

fn harness(mode: ChannelMode) -> Harness {
    let mut config = ClientConfig::new(42, "chat_support", Environment::default());
    config.channel_mode = mode;
    let (transport, sent) = FakeTransport::new();
    let storage = Arc::new(MemoryTokenStorage::new());
    let session = SessionController::with_transport(config, transport.clone(), storage.clone());
    Harness {
        session,
        transport,
        sent,
        storage,
    }
}

/// Next outbound frame, parsed. Generous deadline: paused-clock tests
/// auto-advance past it only when the frame never comes.
async fn next_frame(sent: &mut mpsc::UnboundedReceiver<String>) -> Value {
    let raw = tokio::time::timeout(Duration::from_secs(60), sent.recv())
        .await
        .expect("no outbound frame before deadline")
        .expect("transport gone");
    serde_json::from_str(&raw).expect("outbound frame is not json")
}

fn event_type(frame: &Value) -> &str {
    frame["payload"]["eventType"].as_str().unwrap_or_default()
}

fn event_id(frame: &Value) -> &str {
    frame["eventId"].as_str().unwrap_or_default()
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached before deadline");
}

fn authorized_frame(event_id: &str, token: Option<(&str, i64)>) -> Value {
    let mut data = json!({
        "consumerIdentity": {"idOnExternalPlatform": "cust-1"}
    });
    if let Some((token, expires_in)) = token {
        data["accessToken"] = json!({"token": token, "expiresIn": expires_in});
    }
    json!({"eventId": event_id, "eventType": "ConsumerAuthorized", "data": data})
}

fn message_json(id: &str, thread_id: &str, at: &str, text: &str, direction: &str) -> Value {
    json!({
        "id": id,
        "threadIdOnExternalPlatform": thread_id,
        "messageContent": {"type": "TEXT", "payload": {"text": text}},
        "createdAt": at,
        "direction": direction,
    })
}

fn recovered_frame(event_id: &str, thread_id: &str, kind: &str) -> Value {
    json!({
        "eventId": event_id,
        "eventType": kind,
        "data": {
            "thread": {"idOnExternalPlatform": thread_id, "threadName": "Support"},
            "messages": [message_json(
                "m1", thread_id, "2025-03-01T10:00:00Z", "hello", "outbound",
            )],
            "messagesScrollToken": "cursor-0",
        }
    })
}

fn token_refreshed_frame(event_id: &str, token: &str) -> Value {
    json!({
        "eventId": event_id,
        "eventType": "TokenRefreshed",
        "data": {"accessToken": {"token": token, "expiresIn": 3_600}}
    })
}

fn operation_error_frame(event_id: &str, code: &str) -> Value {
    json!({"errorCode": code, "eventId": event_id})
}

fn message_created_frame(event_id: &str, message: Value) -> Value {
    let thread_id = message["threadIdOnExternalPlatform"].clone();
    json!({
        "eventId": event_id,
        "eventType": "MessageCreated",
        "data": {"message": message, "thread": {"idOnExternalPlatform": thread_id}}
    })
}

/// Prepares and connects a single-thread session all the way to `Ready`,
/// answering the handshake and recovery like the gateway would.
async fn connect_to_ready(
    session: &Arc<SessionController>,
    transport: &FakeTransport,
    sent: &mut mpsc::UnboundedReceiver<String>,
    token: Option<(&str, i64)>,
) -> Result<ThreadId> {
    session.prepare()?;
    let connect = session.connect();
    let gateway = async {
        let frame = next_frame(sent).await;
        transport.push_frame(&authorized_frame(event_id(&frame), token));
        let frame = next_frame(sent).await;
        assert_eq!(event_type(&frame), "RecoverThread");
        transport.push_frame(&recovered_frame(event_id(&frame), "thr-1", "ThreadRecovered"));
    };
    let (result, ()) = tokio::join!(connect, gateway);
    result?;
    assert_eq!(session.state(), ConnectionState::Ready);
    Ok(ThreadId::from("thr-1"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Connect and handshake
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_connect_authorizes_and_recovers_to_ready() -> Result<()> {
    let Harness {
        session,
        transport,
        mut sent,
        storage,
    } = harness(ChannelMode::SingleThread);
    session.prepare()?;

    let connect = session.connect();
    let gateway = async {
        let frame = next_frame(&mut sent).await;
        assert_eq!(event_type(&frame), "AuthorizeConsumer");
        assert!(
            frame["payload"]["consumerIdentity"]["idOnExternalPlatform"]
                .as_str()
                .is_some_and(|id| !id.is_empty())
        );
        transport.push_frame(&authorized_frame(event_id(&frame), Some(("tok-1", 3_600))));

        let frame = next_frame(&mut sent).await;
        assert_eq!(event_type(&frame), "RecoverThread");
        transport.push_frame(&recovered_frame(event_id(&frame), "thr-1", "ThreadRecovered"));
    };
    let (result, ()) = tokio::join!(connect, gateway);
    result?;

    assert_eq!(session.state(), ConnectionState::Ready);
    assert_eq!(session.threads().len(), 1);
    let thread = session.threads().thread(&ThreadId::from("thr-1")).unwrap();
    assert_eq!(thread.thread_name.as_deref(), Some("Support"));
    assert_eq!(thread.messages.len(), 1);
    // The granted token is persisted for the next session.
    assert_eq!(storage.get("42:chat_support").unwrap().token, "tok-1");
    Ok(())
}

#[tokio::test]
async fn stored_token_reconnects_instead_of_authorizing() -> Result<()> {
    let Harness {
        session,
        transport,
        mut sent,
        storage,
    } = harness(ChannelMode::SingleThread);
    storage.set("42:chat_support", AccessToken::with_ttl("held-token", 3_600))?;
    session.prepare()?;

    let connect = session.connect();
    let gateway = async {
        let frame = next_frame(&mut sent).await;
        assert_eq!(event_type(&frame), "ReconnectConsumer");
        assert_eq!(
            frame["payload"]["data"]["accessToken"]["token"],
            "held-token"
        );
        transport.push_frame(&authorized_frame(event_id(&frame), None));
        let frame = next_frame(&mut sent).await;
        transport.push_frame(&recovered_frame(event_id(&frame), "thr-1", "ThreadRecovered"));
    };
    let (result, ()) = tokio::join!(connect, gateway);
    result?;
    assert_eq!(session.state(), ConnectionState::Ready);
    Ok(())
}

#[tokio::test]
async fn rejected_reconnect_refreshes_and_retries_once() -> Result<()> {
    let Harness {
        session,
        transport,
        mut sent,
        storage,
    } = harness(ChannelMode::SingleThread);
    storage.set("42:chat_support", AccessToken::with_ttl("revoked", 3_600))?;
    session.prepare()?;

    let connect = session.connect();
    let gateway = async {
        let frame = next_frame(&mut sent).await;
        assert_eq!(event_type(&frame), "ReconnectConsumer");
        transport.push_frame(&operation_error_frame(
            event_id(&frame),
            "CustomerReconnectFailed",
        ));

        let frame = next_frame(&mut sent).await;
        assert_eq!(event_type(&frame), "RefreshToken");
        transport.push_frame(&token_refreshed_frame(event_id(&frame), "fresh-tok"));

        let frame = next_frame(&mut sent).await;
        assert_eq!(event_type(&frame), "ReconnectConsumer");
        assert_eq!(frame["payload"]["data"]["accessToken"]["token"], "fresh-tok");
        transport.push_frame(&authorized_frame(event_id(&frame), None));

        let frame = next_frame(&mut sent).await;
        transport.push_frame(&recovered_frame(event_id(&frame), "thr-1", "ThreadRecovered"));
    };
    let (result, ()) = tokio::join!(connect, gateway);
    result?;

    assert_eq!(session.state(), ConnectionState::Ready);
    assert_eq!(session.access_token().unwrap().token, "fresh-tok");
    Ok(())
}

#[tokio::test]
async fn multi_thread_bootstrap_fetches_the_thread_list() -> Result<()> {
    let Harness {
        session,
        transport,
        mut sent,
        ..
    } = harness(ChannelMode::MultiThread);
    session.prepare()?;

    let connect = session.connect();
    let gateway = async {
        let frame = next_frame(&mut sent).await;
        transport.push_frame(&authorized_frame(event_id(&frame), None));

        let frame = next_frame(&mut sent).await;
        assert_eq!(event_type(&frame), "FetchThreadList");
        transport.push_frame(&json!({
            "eventId": event_id(&frame),
            "eventType": "ThreadListFetched",
            "data": {"threads": [
                {"idOnExternalPlatform": "orders", "threadName": "Orders"},
                {"idOnExternalPlatform": "closed", "canAddMoreMessages": false},
            ]}
        }));
    };
    let (result, ()) = tokio::join!(connect, gateway);
    result?;

    assert_eq!(session.threads().len(), 2);
    let closed = session.threads().thread(&ThreadId::from("closed")).unwrap();
    assert_eq!(closed.state, ThreadState::Closed);
    Ok(())
}

#[tokio::test]
async fn soft_recovery_failure_still_reaches_ready() -> Result<()> {
    let Harness {
        session,
        transport,
        mut sent,
        ..
    } = harness(ChannelMode::SingleThread);
    let notifications = Arc::new(Mutex::new(Vec::new()));
    let sink = notifications.clone();
    let _ = session.on_notification(move |n| sink.lock().push(n.clone()));
    session.prepare()?;

    let connect = session.connect();
    let gateway = async {
        let frame = next_frame(&mut sent).await;
        transport.push_frame(&authorized_frame(event_id(&frame), None));
        // A fresh visitor has no thread yet; the failure is soft.
        let frame = next_frame(&mut sent).await;
        assert_eq!(event_type(&frame), "RecoverThread");
        transport.push_frame(&operation_error_frame(
            event_id(&frame),
            "RecoveringThreadFailed",
        ));
    };
    let (result, ()) = tokio::join!(connect, gateway);
    result?;

    assert_eq!(session.state(), ConnectionState::Ready);
    assert!(session.threads().is_empty());
    assert!(notifications.lock().iter().any(|n| matches!(
        n,
        SessionNotification::SoftError {
            code: ErrorCode::RecoveringThreadFailed
        }
    )));
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Live chat availability
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn livechat_with_no_agents_parks_offline() -> Result<()> {
    let Harness {
        session,
        transport,
        mut sent,
        ..
    } = harness(ChannelMode::LiveChat);
    session.prepare()?;

    let connect = session.connect();
    let gateway = async {
        let frame = next_frame(&mut sent).await;
        transport.push_frame(&authorized_frame(event_id(&frame), None));
        let frame = next_frame(&mut sent).await;
        assert_eq!(event_type(&frame), "RecoverLivechat");
        transport.push_frame(&operation_error_frame(
            event_id(&frame),
            "RecoveringLivechatFailed",
        ));
    };
    let (result, ()) = tokio::join!(connect, gateway);
    result?;

    assert_eq!(session.state(), ConnectionState::Offline);
    assert!(!transport.is_open());
    Ok(())
}

#[tokio::test]
async fn livechat_with_agents_reaches_ready() -> Result<()> {
    let Harness {
        session,
        transport,
        mut sent,
        ..
    } = harness(ChannelMode::LiveChat);
    session.prepare()?;

    let connect = session.connect();
    let gateway = async {
        let frame = next_frame(&mut sent).await;
        transport.push_frame(&authorized_frame(event_id(&frame), None));
        let frame = next_frame(&mut sent).await;
        assert_eq!(event_type(&frame), "RecoverLivechat");
        transport.push_frame(&recovered_frame(
            event_id(&frame),
            "thr-live",
            "LivechatRecovered",
        ));
    };
    let (result, ()) = tokio::join!(connect, gateway);
    result?;

    assert_eq!(session.state(), ConnectionState::Ready);
    assert_eq!(session.threads().len(), 1);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Message flow
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn send_message_round_trip_does_not_duplicate() -> Result<()> {
    let Harness {
        session,
        transport,
        mut sent,
        ..
    } = harness(ChannelMode::SingleThread);
    let thread_id = connect_to_ready(&session, &transport, &mut sent, None).await?;

    let send = session.send_message(&thread_id, "hi from the customer");
    let gateway = async {
        let frame = next_frame(&mut sent).await;
        assert_eq!(event_type(&frame), "SendMessage");
        assert_eq!(frame["payload"]["data"]["thread"]["threadName"], "Support");
        let message_id = frame["payload"]["data"]["idOnExternalPlatform"]
            .as_str()
            .unwrap()
            .to_owned();
        // Echo the message back, server-stamped, under the same ids.
        transport.push_frame(&message_created_frame(
            event_id(&frame),
            message_json(
                &message_id,
                "thr-1",
                "2025-03-01T10:00:10Z",
                "hi from the customer",
                "inbound",
            ),
        ));
    };
    let (sent_id, ()) = tokio::join!(send, gateway);
    let sent_id = sent_id?;

    let thread = session.threads().thread(&thread_id).unwrap();
    let copies = thread
        .messages
        .iter()
        .filter(|m| m.id == sent_id)
        .count();
    assert_eq!(copies, 1, "echo must replace the tentative copy");
    Ok(())
}

#[tokio::test]
async fn push_message_updates_store_and_observers() -> Result<()> {
    let Harness {
        session,
        transport,
        mut sent,
        ..
    } = harness(ChannelMode::SingleThread);
    let thread_id = connect_to_ready(&session, &transport, &mut sent, None).await?;

    let seen = Arc::new(Mutex::new(0_u32));
    let sink = seen.clone();
    let _ = session
        .dispatcher()
        .on(EventKind::MessageCreated, move |_| *sink.lock() += 1);

    transport.push_frame(&json!({
        "eventId": "push-1",
        "eventType": "MessageCreated",
        "data": {
            "message": message_json(
                "m9", "thr-1", "2025-03-01T11:00:00Z", "agent reply", "outbound",
            ),
            "thread": {"idOnExternalPlatform": "thr-1"},
        }
    }));

    wait_until(|| {
        session
            .threads()
            .thread(&thread_id)
            .is_some_and(|t| t.messages.iter().any(|m| m.id.as_str() == "m9"))
    })
    .await;
    assert_eq!(*seen.lock(), 1);
    Ok(())
}

#[tokio::test]
async fn history_pages_until_the_server_runs_out() -> Result<()> {
    let Harness {
        session,
        transport,
        mut sent,
        ..
    } = harness(ChannelMode::SingleThread);
    let thread_id = connect_to_ready(&session, &transport, &mut sent, None).await?;

    // First page: one older message, fresh cursor.
    let load = session.load_more_messages(&thread_id);
    let gateway = async {
        let frame = next_frame(&mut sent).await;
        assert_eq!(event_type(&frame), "LoadMoreMessages");
        assert_eq!(frame["payload"]["data"]["scrollToken"], "cursor-0");
        transport.push_frame(&json!({
            "eventId": event_id(&frame),
            "eventType": "MoreMessagesLoaded",
            "data": {
                "messages": [message_json(
                    "m0", "thr-1", "2025-03-01T09:00:00Z", "older", "outbound",
                )],
                "scrollToken": "cursor-1",
            }
        }));
    };
    let (outcome, ()) = tokio::join!(load, gateway);
    assert_eq!(outcome?, LoadOutcome::Loaded { added: 1 });

    // Second page: empty, which exhausts the history.
    let load = session.load_more_messages(&thread_id);
    let gateway = async {
        let frame = next_frame(&mut sent).await;
        transport.push_frame(&json!({
            "eventId": event_id(&frame),
            "eventType": "MoreMessagesLoaded",
            "data": {"messages": [], "scrollToken": ""}
        }));
    };
    let (outcome, ()) = tokio::join!(load, gateway);
    assert_eq!(outcome?, LoadOutcome::EndOfHistory);

    // Third call short-circuits without touching the wire.
    assert_eq!(
        session.load_more_messages(&thread_id).await?,
        LoadOutcome::EndOfHistory
    );
    assert!(sent.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn queue_position_and_assignee_pushes_update_the_thread() -> Result<()> {
    let Harness {
        session,
        transport,
        mut sent,
        ..
    } = harness(ChannelMode::SingleThread);
    let thread_id = connect_to_ready(&session, &transport, &mut sent, None).await?;

    transport.push_frame(&json!({
        "eventId": "push-q",
        "eventType": "SetPositionInQueue",
        "data": {"positionInQueue": 3}
    }));
    wait_until(|| {
        session
            .threads()
            .thread(&thread_id)
            .is_some_and(|t| t.position_in_queue == Some(3))
    })
    .await;

    transport.push_frame(&json!({
        "eventId": "push-a",
        "eventType": "ContactInboxAssigneeChanged",
        "data": {
            "inboxAssignee": {"id": 7, "firstName": "Ava", "surname": "Agent"},
            "thread": {"idOnExternalPlatform": "thr-1"},
        }
    }));
    wait_until(|| {
        session
            .threads()
            .thread(&thread_id)
            .is_some_and(|t| t.assigned_agent.is_some() && t.position_in_queue.is_none())
    })
    .await;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Token refresh
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stale_token_refreshes_once_for_concurrent_sends() -> Result<()> {
    let Harness {
        session,
        transport,
        mut sent,
        storage,
    } = harness(ChannelMode::SingleThread);
    // Grant a token that is stale the moment it lands.
    let thread_id = connect_to_ready(&session, &transport, &mut sent, Some(("worn-out", 0))).await?;

    let send_a = session.send_message(&thread_id, "first");
    let send_b = session.send_message(&thread_id, "second");
    let gateway = async {
        let frame = next_frame(&mut sent).await;
        assert_eq!(event_type(&frame), "RefreshToken");
        assert_eq!(frame["payload"]["data"]["accessToken"]["token"], "worn-out");
        transport.push_frame(&token_refreshed_frame(event_id(&frame), "fresh"));

        // Both queued senders proceed without refreshing again.
        for _ in 0..2 {
            let frame = next_frame(&mut sent).await;
            assert_eq!(event_type(&frame), "SendMessage");
            let message_id = frame["payload"]["data"]["idOnExternalPlatform"]
                .as_str()
                .unwrap()
                .to_owned();
            transport.push_frame(&message_created_frame(
                event_id(&frame),
                message_json(&message_id, "thr-1", "2025-03-01T10:01:00Z", "echo", "inbound"),
            ));
        }
    };
    let (a, b, ()) = tokio::join!(send_a, send_b, gateway);
    let _ = a?;
    let _ = b?;

    assert_eq!(session.access_token().unwrap().token, "fresh");
    assert_eq!(storage.get("42:chat_support").unwrap().token, "fresh");
    Ok(())
}

#[tokio::test]
async fn failed_refresh_is_terminal() -> Result<()> {
    let Harness {
        session,
        transport,
        mut sent,
        ..
    } = harness(ChannelMode::SingleThread);
    let thread_id = connect_to_ready(&session, &transport, &mut sent, Some(("worn-out", 0))).await?;

    let notifications = Arc::new(Mutex::new(Vec::new()));
    let sink = notifications.clone();
    let _ = session.on_notification(move |n| sink.lock().push(n.clone()));

    let send = session.send_message(&thread_id, "doomed");
    let gateway = async {
        let frame = next_frame(&mut sent).await;
        assert_eq!(event_type(&frame), "RefreshToken");
        transport.push_frame(&operation_error_frame(
            event_id(&frame),
            "TokenRefreshingFailed",
        ));
    };
    let (result, ()) = tokio::join!(send, gateway);
    assert_matches!(result, Err(ClientError::TokenRefreshFailed));

    // Later sends fail fast, without another wire exchange.
    assert_matches!(
        session.send_message(&thread_id, "also doomed").await,
        Err(ClientError::TokenRefreshFailed)
    );
    assert!(sent.try_recv().is_err());

    let terminal = notifications
        .lock()
        .iter()
        .filter(|n| **n == SessionNotification::TokenRefreshFailed)
        .count();
    assert_eq!(terminal, 1, "terminal notification fires exactly once");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Timeouts, closes, reconnects
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unanswered_command_times_out() -> Result<()> {
    let Harness {
        session,
        transport,
        mut sent,
        ..
    } = harness(ChannelMode::SingleThread);
    let thread_id = connect_to_ready(&session, &transport, &mut sent, None).await?;

    let send = session.send_message(&thread_id, "anyone there?");
    let gateway = async {
        // Swallow the frame and never answer.
        let frame = next_frame(&mut sent).await;
        assert_eq!(event_type(&frame), "SendMessage");
    };
    let (result, ()) = tokio::join!(send, gateway);
    assert_matches!(result, Err(ClientError::Timeout { .. }));
    Ok(())
}

#[tokio::test]
async fn deliberate_close_fails_inflight_commands() -> Result<()> {
    let Harness {
        session,
        transport,
        mut sent,
        ..
    } = harness(ChannelMode::SingleThread);
    let thread_id = connect_to_ready(&session, &transport, &mut sent, None).await?;

    let send = session.send_message(&thread_id, "going away");
    let teardown = async {
        let _ = next_frame(&mut sent).await;
        session.disconnect().await;
    };
    let (result, ()) = tokio::join!(send, teardown);
    assert_matches!(result, Err(ClientError::NotConnected));
    assert_eq!(session.state(), ConnectionState::Closed);
    assert!(!transport.is_open());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unexpected_drop_reconnects_and_recovers() -> Result<()> {
    let Harness {
        session,
        transport,
        mut sent,
        ..
    } = harness(ChannelMode::SingleThread);
    let _ = connect_to_ready(&session, &transport, &mut sent, Some(("tok-1", 3_600))).await?;

    let notifications = Arc::new(Mutex::new(Vec::new()));
    let sink = notifications.clone();
    let _ = session.on_notification(move |n| sink.lock().push(n.clone()));

    transport.drop_connection();

    // The session holds a token, so the retry handshake is a reconnect.
    let frame = next_frame(&mut sent).await;
    assert_eq!(event_type(&frame), "ReconnectConsumer");
    transport.push_frame(&authorized_frame(event_id(&frame), None));
    let frame = next_frame(&mut sent).await;
    assert_eq!(event_type(&frame), "RecoverThread");
    transport.push_frame(&recovered_frame(event_id(&frame), "thr-1", "ThreadRecovered"));

    wait_until(|| session.state() == ConnectionState::Ready).await;
    assert_eq!(transport.connects(), 2);
    assert!(
        notifications
            .lock()
            .contains(&SessionNotification::UnexpectedDisconnect)
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reconnect_backs_off_through_failed_dials() -> Result<()> {
    let Harness {
        session,
        transport,
        mut sent,
        ..
    } = harness(ChannelMode::SingleThread);
    let _ = connect_to_ready(&session, &transport, &mut sent, Some(("tok-1", 3_600))).await?;

    transport.fail_next_connects(2);
    transport.drop_connection();

    // Third dial lands; serve the handshake as usual.
    let frame = next_frame(&mut sent).await;
    assert_eq!(event_type(&frame), "ReconnectConsumer");
    transport.push_frame(&authorized_frame(event_id(&frame), None));
    let frame = next_frame(&mut sent).await;
    transport.push_frame(&recovered_frame(event_id(&frame), "thr-1", "ThreadRecovered"));

    wait_until(|| session.state() == ConnectionState::Ready).await;
    // One initial dial, two scripted failures, one success.
    assert_eq!(transport.connects(), 4);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Error channel and sign-out
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn push_path_errors_reach_error_observers() -> Result<()> {
    let Harness {
        session,
        transport,
        mut sent,
        ..
    } = harness(ChannelMode::SingleThread);
    let _ = connect_to_ready(&session, &transport, &mut sent, None).await?;

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    let _ = session
        .dispatcher()
        .on_error(move |e| sink.lock().push(e.to_string()));

    transport.push_frame(&json!({"message": "backend on fire"}));
    wait_until(|| !errors.lock().is_empty()).await;
    assert!(errors.lock()[0].contains("backend on fire"));
    Ok(())
}

#[tokio::test]
async fn sign_out_purges_credentials_and_state() -> Result<()> {
    let Harness {
        session,
        transport,
        mut sent,
        storage,
    } = harness(ChannelMode::SingleThread);
    let _ = connect_to_ready(&session, &transport, &mut sent, Some(("tok-1", 3_600))).await?;

    session.sign_out().await?;

    assert_eq!(session.state(), ConnectionState::Closed);
    assert!(storage.get("42:chat_support").is_none());
    assert!(session.access_token().is_none());
    assert!(session.customer_identity().is_none());
    assert!(session.visitor_id().is_none());
    assert!(session.threads().is_empty());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Degraded credential storage
// ─────────────────────────────────────────────────────────────────────────────

/// Collects formatted log output for assertions.
#[derive(Clone, Default)]
struct LogSink(Arc<Mutex<Vec<u8>>>);

impl LogSink {
    fn rendered(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl std::io::Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogSink {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Storage whose writes always fail.
struct FailingStorage;

impl TokenStorage for FailingStorage {
    fn get(&self, _key: &str) -> Option<AccessToken> {
        None
    }

    fn set(&self, _key: &str, _token: AccessToken) -> Result<(), StorageError> {
        Err(StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "credentials volume is read-only",
        )))
    }

    fn purge(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[tokio::test]
async fn failed_credential_write_warns_and_continues() -> Result<()> {
    let sink = LogSink::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(sink.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let config = ClientConfig::new(42, "chat_support", Environment::default());
    let (transport, mut sent) = FakeTransport::new();
    let session =
        SessionController::with_transport(config, transport.clone(), Arc::new(FailingStorage));

    // The granted token cannot be persisted, but the session still comes up.
    let _ = connect_to_ready(&session, &transport, &mut sent, Some(("tok-1", 3_600))).await?;

    assert_eq!(session.access_token().unwrap().token, "tok-1");
    assert!(sink.rendered().contains("could not persist access token"));
    Ok(())
}
