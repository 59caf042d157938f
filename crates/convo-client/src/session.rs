//! The session controller: lifecycle, handshake, command flow, reconnect.
//!
//! One [`SessionController`] drives one logical customer session over a
//! [`Transport`]. A reader task turns inbound frames into store mutations,
//! command resolutions, and observer dispatch. Outbound commands funnel
//! through a token gate backed by an async mutex, so a stale token is
//! refreshed exactly once no matter how many senders hit it concurrently.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use convo_auth::{AccessToken, TokenStorage};
use convo_core::{
    ConnectionState, CustomerId, CustomerIdentity, EventId, Message, MessageId, ThreadId,
    ThreadSummary, VisitorId, backoff_delay_with_random,
};
use convo_wire::{
    BrandRef, ChannelRef, ConsumerAuthorizedData, DecodedFrame, ErrorCode, InboundEvent,
    OperationError, OutboundCommand, decode_frame,
};

use crate::Correlator;
use crate::config::{ChannelMode, ClientConfig};
use crate::dispatch::{Dispatcher, ObserverHandle};
use crate::errors::ClientError;
use crate::threads::{LoadOutcome, ThreadStore};
use crate::transport::{CloseReason, Transport, TransportEvent, WebSocketTransport};

// ─────────────────────────────────────────────────────────────────────────────
// Notifications
// ─────────────────────────────────────────────────────────────────────────────

/// Out-of-band session signal, separate from the chat event stream.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionNotification {
    /// The connection state moved.
    StateChanged {
        /// The state before the move.
        from: ConnectionState,
        /// The state after the move.
        to: ConnectionState,
    },
    /// The connection dropped without a local close; reconnection starts.
    UnexpectedDisconnect,
    /// Token refresh failed. Held credentials are invalid and the session
    /// cannot continue until the customer authorizes again.
    TokenRefreshFailed,
    /// The server reported a recoverable failure; the session stays up.
    SoftError {
        /// The reported failure code.
        code: ErrorCode,
    },
}

type NotificationCallback = Arc<dyn Fn(&SessionNotification) + Send + Sync>;

#[derive(Default)]
struct Notifications {
    next_id: AtomicU64,
    observers: RwLock<Vec<(ObserverHandle, NotificationCallback)>>,
}

impl Notifications {
    fn subscribe(
        &self,
        callback: impl Fn(&SessionNotification) + Send + Sync + 'static,
    ) -> ObserverHandle {
        let handle = ObserverHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((handle, Arc::new(callback)));
        handle
    }

    fn remove(&self, handle: ObserverHandle) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(h, _)| *h != handle);
        observers.len() != before
    }

    fn emit(&self, notification: &SessionNotification) {
        // Clone the callbacks out so an observer can (un)subscribe from
        // inside its own callback without deadlocking on the registry.
        let callbacks: Vec<NotificationCallback> = self
            .observers
            .read()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback(notification);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Controller
// ─────────────────────────────────────────────────────────────────────────────

/// One customer chat session over one socket connection.
///
/// Constructed via [`SessionController::new`], then driven through the
/// lifecycle: [`prepare`](Self::prepare) resolves identity and credentials,
/// [`connect`](Self::connect) opens the socket and performs the handshake,
/// thread operations run while the session is open, and
/// [`disconnect`](Self::disconnect) or [`sign_out`](Self::sign_out) end it.
///
/// All methods take `&self`; the controller is shared as an `Arc` between
/// the caller, the reader task, and any reconnect task in flight.
pub struct SessionController {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    storage: Arc<dyn TokenStorage>,
    correlator: Correlator,
    dispatcher: Dispatcher,
    store: ThreadStore,
    state: RwLock<ConnectionState>,
    identity: RwLock<Option<CustomerIdentity>>,
    visitor_id: RwLock<Option<VisitorId>>,
    token: RwLock<Option<AccessToken>>,
    authorization_code: RwLock<Option<String>>,
    live_chat_available: AtomicBool,
    /// Single-flight gate: at most one refresh exchange runs at a time;
    /// every other sender queues here and rechecks staleness afterwards.
    refresh_gate: tokio::sync::Mutex<()>,
    refresh_failed: AtomicBool,
    reconnect_active: AtomicBool,
    notifications: Notifications,
}

impl SessionController {
    /// A controller talking WebSocket to the configured gateway.
    #[must_use]
    pub fn new(config: ClientConfig, storage: Arc<dyn TokenStorage>) -> Arc<Self> {
        let transport = Arc::new(WebSocketTransport::new(&config.socket));
        Self::with_transport(config, transport, storage)
    }

    /// A controller over an explicit transport. Lets tests script the wire.
    #[must_use]
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn TokenStorage>,
    ) -> Arc<Self> {
        let live_chat_available = AtomicBool::new(config.live_chat_available);
        Arc::new(Self {
            config,
            transport,
            storage,
            correlator: Correlator::new(),
            dispatcher: Dispatcher::new(),
            store: ThreadStore::new(),
            state: RwLock::new(ConnectionState::Initial),
            identity: RwLock::new(None),
            visitor_id: RwLock::new(None),
            token: RwLock::new(None),
            authorization_code: RwLock::new(None),
            live_chat_available,
            refresh_gate: tokio::sync::Mutex::new(()),
            refresh_failed: AtomicBool::new(false),
            reconnect_active: AtomicBool::new(false),
            notifications: Notifications::default(),
        })
    }

    // ── accessors ───────────────────────────────────────────────────

    /// The current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// The local thread view.
    #[must_use]
    pub fn threads(&self) -> &ThreadStore {
        &self.store
    }

    /// The push-event observer registry.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The visitor id minted or loaded during [`prepare`](Self::prepare).
    #[must_use]
    pub fn visitor_id(&self) -> Option<VisitorId> {
        self.visitor_id.read().clone()
    }

    /// The customer identity the session acts as.
    #[must_use]
    pub fn customer_identity(&self) -> Option<CustomerIdentity> {
        self.identity.read().clone()
    }

    /// The currently held bearer token, if any.
    #[must_use]
    pub fn access_token(&self) -> Option<AccessToken> {
        self.token.read().clone()
    }

    /// Overrides the customer identity. Takes effect on the next handshake.
    pub fn set_customer_identity(&self, identity: CustomerIdentity) {
        *self.identity.write() = Some(identity);
    }

    /// Sets the OAuth authorization code consumed by the next handshake.
    pub fn set_authorization_code(&self, code: impl Into<String>) {
        *self.authorization_code.write() = Some(code.into());
    }

    /// Updates live-chat availability. [`connect`](Self::connect) on a
    /// session parked offline re-checks this flag.
    pub fn set_live_chat_availability(&self, available: bool) {
        self.live_chat_available.store(available, Ordering::Relaxed);
    }

    /// Registers an observer for session notifications.
    pub fn on_notification(
        &self,
        callback: impl Fn(&SessionNotification) + Send + Sync + 'static,
    ) -> ObserverHandle {
        self.notifications.subscribe(callback)
    }

    /// Removes a notification observer. Returns whether it was registered.
    pub fn remove_notification_observer(&self, handle: ObserverHandle) -> bool {
        self.notifications.remove(handle)
    }

    // ── lifecycle ───────────────────────────────────────────────────

    /// Prepares the session: validates config, resolves the visitor id and
    /// customer identity, and loads any stored token.
    ///
    /// Live-chat channels whose agents are unavailable park at
    /// [`ConnectionState::Offline`] instead of `Prepared`;
    /// [`connect`](Self::connect) re-checks availability from there.
    pub fn prepare(&self) -> Result<(), ClientError> {
        self.config.validate()?;
        self.set_state(ConnectionState::Preparing)?;

        let visitor = self.config.visitor_id.clone().unwrap_or_default();
        debug!(visitor_id = %visitor, "session prepared");
        *self.visitor_id.write() = Some(visitor);

        {
            let mut identity = self.identity.write();
            if identity.is_none() {
                *identity = Some(CustomerIdentity::new(CustomerId::new()));
            }
        }

        if let Some(token) = self.storage.get(&self.storage_key()) {
            debug!("loaded stored access token");
            *self.token.write() = Some(token);
        }

        self.set_state(ConnectionState::Prepared)?;
        if self.config.channel_mode == ChannelMode::LiveChat
            && !self.live_chat_available.load(Ordering::Relaxed)
        {
            info!("live chat unavailable, parking session offline");
            self.set_state(ConnectionState::Offline)?;
        }
        Ok(())
    }

    /// Opens the socket, performs the handshake, and bootstraps threads.
    ///
    /// On success the session is [`ConnectionState::Ready`]. A live-chat
    /// session whose recovery reports no available agent parks at
    /// [`ConnectionState::Offline`] and returns `Ok`.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        if self.state() == ConnectionState::Offline
            && !self.live_chat_available.load(Ordering::Relaxed)
        {
            info!("live chat still unavailable, staying offline");
            return Ok(());
        }
        self.establish().await
    }

    /// Closes the session deliberately. In-flight commands fail with
    /// [`ClientError::NotConnected`]; no reconnect is attempted.
    pub async fn disconnect(&self) {
        let _ = self.set_state(ConnectionState::Closed);
        self.correlator.cancel_all();
        self.transport.close().await;
    }

    /// Disconnects and purges every credential: stored tokens, the token
    /// slot, identity, visitor id, pending authorization code, and all
    /// local thread state. Observers stay registered.
    pub async fn sign_out(&self) -> Result<(), ClientError> {
        self.disconnect().await;
        self.storage.purge()?;
        *self.token.write() = None;
        *self.identity.write() = None;
        *self.visitor_id.write() = None;
        *self.authorization_code.write() = None;
        self.refresh_failed.store(false, Ordering::Relaxed);
        self.store.clear();
        info!("signed out, credentials purged");
        Ok(())
    }

    // ── thread operations ───────────────────────────────────────────

    /// Creates a new local thread and returns its id.
    ///
    /// The thread reaches the server with the first message sent into it.
    /// Single-thread and live-chat channels refuse a second thread.
    pub fn create_thread(&self) -> Result<ThreadId, ClientError> {
        if self.config.channel_mode != ChannelMode::MultiThread && !self.store.is_empty() {
            return Err(ClientError::InconsistentState {
                context: "channel supports a single thread and one already exists".to_owned(),
            });
        }
        let thread_id = ThreadId::new();
        let _ = self.store.ensure_thread(&thread_id);
        debug!(thread_id = %thread_id, "thread created locally");
        Ok(thread_id)
    }

    /// Sends a text message and returns its client-minted id.
    ///
    /// The message is inserted locally before the frame leaves, under the
    /// same id the server echo will carry, so the echo replaces the
    /// tentative copy instead of duplicating it.
    pub async fn send_message(
        &self,
        thread_id: &ThreadId,
        text: impl Into<String>,
    ) -> Result<MessageId, ClientError> {
        if !self.state().is_open() {
            return Err(ClientError::NotConnected);
        }
        let author = self
            .identity
            .read()
            .clone()
            .ok_or(ClientError::MissingIdentity)?;
        let message = Message::outbound_text(thread_id.clone(), text, author);
        let _ = self.store.append_live(&message)?;

        let thread_name = self.store.thread(thread_id).and_then(|t| t.thread_name);
        let message_id = message.id.clone();
        let _ = self
            .send_command(OutboundCommand::SendMessage {
                thread_id: thread_id.clone(),
                thread_name,
                message_id: message_id.clone(),
                content: message.message_content,
                attachments: message.attachments,
            })
            .await?;
        Ok(message_id)
    }

    /// Loads the next older page of history for `thread_id`.
    ///
    /// Returns [`LoadOutcome::EndOfHistory`] without a round trip once the
    /// pagination cursor is exhausted.
    pub async fn load_more_messages(
        &self,
        thread_id: &ThreadId,
    ) -> Result<LoadOutcome, ClientError> {
        let Some(thread) = self.store.thread(thread_id) else {
            return Err(ClientError::InconsistentState {
                context: format!("history requested for unknown thread {thread_id}"),
            });
        };
        if !thread.has_more_messages_to_load() {
            return Ok(LoadOutcome::EndOfHistory);
        }

        let oldest = thread.messages.first().map(|m| m.created_at);
        match self
            .send_command(OutboundCommand::LoadMoreMessages {
                thread_id: thread_id.clone(),
                scroll_token: thread.scroll_token.clone(),
                oldest_message_datetime: oldest,
            })
            .await?
        {
            InboundEvent::MoreMessagesLoaded(data) => {
                self.store
                    .load_more(thread_id, &data.messages, &data.scroll_token)
            }
            other => Err(unexpected_answer("history load", &other)),
        }
    }

    /// Recovers one thread's snapshot from the server and merges it.
    ///
    /// `None` targets the channel's active thread. Returns the id of the
    /// merged thread.
    pub async fn recover_thread(
        &self,
        thread_id: Option<&ThreadId>,
    ) -> Result<ThreadId, ClientError> {
        let command = match self.config.channel_mode {
            ChannelMode::LiveChat => OutboundCommand::RecoverLivechat {
                thread_id: thread_id.cloned(),
            },
            _ => OutboundCommand::RecoverThread {
                thread_id: thread_id.cloned(),
            },
        };
        match self.send_command(command).await? {
            InboundEvent::ThreadRecovered(data) | InboundEvent::LivechatRecovered(data) => {
                Ok(self.store.merge(&data))
            }
            other => Err(unexpected_answer("thread recovery", &other)),
        }
    }

    /// Fetches the customer's thread list and seeds the store from it.
    pub async fn fetch_thread_list(&self) -> Result<Vec<ThreadSummary>, ClientError> {
        match self.send_command(OutboundCommand::FetchThreadList).await? {
            InboundEvent::ThreadListFetched(data) => {
                self.store.register_summaries(&data.threads);
                Ok(data.threads)
            }
            other => Err(unexpected_answer("thread list", &other)),
        }
    }

    /// Loads one thread's metadata (last message, owning agent).
    pub async fn load_thread_metadata(&self, thread_id: &ThreadId) -> Result<(), ClientError> {
        match self
            .send_command(OutboundCommand::LoadThreadMetadata {
                thread_id: thread_id.clone(),
            })
            .await?
        {
            InboundEvent::ThreadMetadataLoaded(data) => {
                self.store.apply_metadata(thread_id, &data);
                Ok(())
            }
            other => Err(unexpected_answer("thread metadata", &other)),
        }
    }

    /// Archives a thread on the server and closes it locally.
    pub async fn archive_thread(&self, thread_id: &ThreadId) -> Result<(), ClientError> {
        let _ = self
            .send_command(OutboundCommand::ArchiveThread {
                thread_id: thread_id.clone(),
            })
            .await?;
        let _ = self.store.mark_archived(thread_id);
        Ok(())
    }

    /// Renames a thread. Fire-and-forget; the local name updates as soon
    /// as the frame is queued.
    pub async fn update_thread_name(
        &self,
        thread_id: &ThreadId,
        name: impl Into<String>,
    ) -> Result<(), ClientError> {
        let name = name.into();
        self.post_command(OutboundCommand::UpdateThread {
            thread_id: thread_id.clone(),
            thread_name: name.clone(),
        })
        .await?;
        let _ = self.store.set_thread_name(thread_id, &name);
        Ok(())
    }

    /// Reports the thread's agent messages as seen by the customer.
    pub async fn mark_messages_read(&self, thread_id: &ThreadId) -> Result<(), ClientError> {
        self.post_command(OutboundCommand::MessageSeenByConsumer {
            thread_id: thread_id.clone(),
        })
        .await
    }

    /// Reports that the customer started typing.
    pub async fn report_typing_started(&self, thread_id: &ThreadId) -> Result<(), ClientError> {
        self.post_command(OutboundCommand::SenderTypingStarted {
            thread_id: thread_id.clone(),
        })
        .await
    }

    /// Reports that the customer stopped typing.
    pub async fn report_typing_ended(&self, thread_id: &ThreadId) -> Result<(), ClientError> {
        self.post_command(OutboundCommand::SenderTypingEnded {
            thread_id: thread_id.clone(),
        })
        .await
    }

    // ── connection internals ────────────────────────────────────────

    #[instrument(skip_all, fields(brand_id = self.config.brand_id))]
    async fn establish(self: &Arc<Self>) -> Result<(), ClientError> {
        self.set_state(ConnectionState::Connecting)?;
        let url = self.socket_url();
        self.transport.connect(&url).await?;
        let Some(events) = self.transport.take_events() else {
            return Err(ClientError::InconsistentState {
                context: "transport produced no event stream".to_owned(),
            });
        };
        drop(tokio::spawn(run_reader(self.clone(), events)));

        self.handshake().await?;

        // Availability-gated channels confirm an agent is reachable before
        // the session leaves `connecting`; failure parks it offline.
        if self.config.channel_mode == ChannelMode::LiveChat && !self.recover_livechat().await? {
            self.transport.close().await;
            self.set_state(ConnectionState::Offline)?;
            return Ok(());
        }

        self.set_state(ConnectionState::Connected)?;
        self.bootstrap().await?;
        self.set_state(ConnectionState::Ready)?;
        Ok(())
    }

    /// Authorizes or reconnects the customer, depending on held credentials.
    async fn handshake(&self) -> Result<(), ClientError> {
        let held = self.token.read().clone();
        let authorized = match held {
            Some(token) => match self.reconnect_consumer(token.token).await {
                Ok(data) => data,
                Err(ClientError::Operation(op))
                    if op.error_code == ErrorCode::CustomerReconnectFailed =>
                {
                    // The backend no longer recognizes the session behind
                    // this token. Refresh and retry once before giving up.
                    info!("reconnect rejected, refreshing token and retrying");
                    self.refresh_token(true).await?;
                    let fresh = self
                        .token
                        .read()
                        .clone()
                        .ok_or(ClientError::TokenRefreshFailed)?;
                    self.reconnect_consumer(fresh.token).await?
                }
                Err(error) => return Err(error),
            },
            None => {
                let code = self.authorization_code.write().take();
                match self
                    .send_command_raw(OutboundCommand::AuthorizeConsumer {
                        authorization_code: code,
                    })
                    .await?
                {
                    InboundEvent::ConsumerAuthorized(data) => data,
                    other => return Err(unexpected_answer("authorization", &other)),
                }
            }
        };
        self.apply_authorization(authorized);
        Ok(())
    }

    async fn reconnect_consumer(
        &self,
        access_token: String,
    ) -> Result<ConsumerAuthorizedData, ClientError> {
        match self
            .send_command_raw(OutboundCommand::ReconnectConsumer { access_token })
            .await?
        {
            InboundEvent::ConsumerAuthorized(data) => Ok(data),
            other => Err(unexpected_answer("reconnect", &other)),
        }
    }

    fn apply_authorization(&self, data: ConsumerAuthorizedData) {
        debug!(
            customer = %data.consumer_identity.id_on_external_platform,
            "customer authorized"
        );
        *self.identity.write() = Some(data.consumer_identity);
        if let Some(payload) = data.access_token {
            self.store_token(AccessToken::with_ttl(payload.token, payload.expires_in));
        }
        self.refresh_failed.store(false, Ordering::Relaxed);
    }

    /// Recovers the live-chat thread during connect. `Ok(false)` means no
    /// agent is available and the session should park offline.
    async fn recover_livechat(&self) -> Result<bool, ClientError> {
        match self
            .send_command_raw(OutboundCommand::RecoverLivechat { thread_id: None })
            .await
        {
            Ok(InboundEvent::LivechatRecovered(data) | InboundEvent::ThreadRecovered(data)) => {
                let _ = self.store.merge(&data);
                Ok(true)
            }
            Ok(other) => {
                warn!(
                    kind = other.raw_kind(),
                    "live chat recovery answered with unexpected event"
                );
                Ok(true)
            }
            Err(ClientError::Operation(op))
                if op.error_code == ErrorCode::RecoveringLivechatFailed =>
            {
                info!("no live chat to recover, agents unavailable");
                Ok(false)
            }
            Err(error) => Err(error),
        }
    }

    /// Seeds thread state right after the handshake, per channel mode.
    async fn bootstrap(&self) -> Result<(), ClientError> {
        match self.config.channel_mode {
            ChannelMode::MultiThread => {
                match self.send_command_raw(OutboundCommand::FetchThreadList).await? {
                    InboundEvent::ThreadListFetched(data) => {
                        debug!(count = data.threads.len(), "thread list fetched");
                        self.store.register_summaries(&data.threads);
                    }
                    other => warn!(
                        kind = other.raw_kind(),
                        "thread list answered with unexpected event"
                    ),
                }
                Ok(())
            }
            ChannelMode::SingleThread => {
                match self
                    .send_command_raw(OutboundCommand::RecoverThread { thread_id: None })
                    .await
                {
                    Ok(InboundEvent::ThreadRecovered(data)) => {
                        let _ = self.store.merge(&data);
                        Ok(())
                    }
                    Ok(other) => {
                        warn!(
                            kind = other.raw_kind(),
                            "thread recovery answered with unexpected event"
                        );
                        Ok(())
                    }
                    // A fresh visitor has nothing to recover yet.
                    Err(error) if error.is_soft() => {
                        debug!("no existing thread to recover");
                        Ok(())
                    }
                    Err(error) => Err(error),
                }
            }
            // Live chat recovered before `connected`, in `establish`.
            ChannelMode::LiveChat => Ok(()),
        }
    }

    // ── sending ─────────────────────────────────────────────────────

    /// Correlated send with the token gate. For session-level operations.
    async fn send_command(&self, command: OutboundCommand) -> Result<InboundEvent, ClientError> {
        if !self.state().is_open() {
            return Err(ClientError::NotConnected);
        }
        self.ensure_fresh_token().await?;
        self.send_command_raw(command).await
    }

    /// Correlated send without the token gate. Handshake and refresh frames
    /// must not re-enter the gate they implement.
    async fn send_command_raw(
        &self,
        command: OutboundCommand,
    ) -> Result<InboundEvent, ClientError> {
        let kind = command.kind();
        let (event_id, frame) = self.build_frame(&command)?;
        // Park the waiter before the frame leaves, or a fast response can
        // race past the registration.
        let rx = self.correlator.register(event_id.clone(), kind);
        if let Err(error) = self.transport.send(frame) {
            self.correlator.discard(&event_id);
            return Err(error.into());
        }

        let deadline = Duration::from_millis(self.config.socket.command_deadline_ms);
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Resolver dropped without answering: the session tore down.
            Ok(Err(_)) => Err(ClientError::NotConnected),
            Err(_) => {
                self.correlator.discard(&event_id);
                debug!(kind, "command deadline elapsed");
                Err(ClientError::Timeout {
                    timeout_ms: self.config.socket.command_deadline_ms,
                    context: kind.to_owned(),
                })
            }
        }
    }

    /// Uncorrelated send with the token gate. For fire-and-forget signals
    /// the server never answers directly.
    async fn post_command(&self, command: OutboundCommand) -> Result<(), ClientError> {
        if !self.state().is_open() {
            return Err(ClientError::NotConnected);
        }
        self.ensure_fresh_token().await?;
        let (_, frame) = self.build_frame(&command)?;
        self.transport.send(frame)?;
        Ok(())
    }

    fn build_frame(&self, command: &OutboundCommand) -> Result<(EventId, String), ClientError> {
        let identity = self
            .identity
            .read()
            .clone()
            .ok_or(ClientError::MissingIdentity)?;
        let envelope = command
            .envelope(
                BrandRef {
                    id: self.config.brand_id,
                },
                ChannelRef {
                    id: self.config.channel_id.clone(),
                },
                identity,
            )
            .map_err(ClientError::Encode)?;
        let frame = envelope.to_json().map_err(ClientError::Encode)?;
        Ok((envelope.event_id, frame))
    }

    // ── token gate ──────────────────────────────────────────────────

    async fn ensure_fresh_token(&self) -> Result<(), ClientError> {
        if self.refresh_failed.load(Ordering::Relaxed) {
            return Err(ClientError::TokenRefreshFailed);
        }
        let stale = self.token.read().as_ref().is_some_and(AccessToken::is_stale);
        if stale {
            self.refresh_token(false).await
        } else {
            Ok(())
        }
    }

    /// Exchanges the held token for a fresh one, single-flight.
    ///
    /// `force` skips the staleness recheck, for when the server already
    /// rejected the held token regardless of its clock expiry.
    #[instrument(skip(self))]
    async fn refresh_token(&self, force: bool) -> Result<(), ClientError> {
        let _gate = self.refresh_gate.lock().await;
        if self.refresh_failed.load(Ordering::Relaxed) {
            return Err(ClientError::TokenRefreshFailed);
        }
        // A sender queued behind an in-flight refresh finds a fresh token
        // here and returns without its own round trip.
        let Some(current) = self.token.read().clone() else {
            return Ok(());
        };
        if !force && !current.is_stale() {
            return Ok(());
        }

        info!("refreshing access token");
        let outcome = self
            .send_command_raw(OutboundCommand::RefreshToken {
                access_token: current.token,
            })
            .await;
        match outcome {
            Ok(InboundEvent::TokenRefreshed(data)) => {
                self.store_token(AccessToken::with_ttl(
                    data.access_token.token,
                    data.access_token.expires_in,
                ));
                Ok(())
            }
            Ok(other) => {
                warn!(
                    kind = other.raw_kind(),
                    "refresh answered with unexpected event"
                );
                self.mark_refresh_failed();
                Err(ClientError::TokenRefreshFailed)
            }
            Err(error) => {
                error!(error = %error, "token refresh failed");
                self.mark_refresh_failed();
                Err(ClientError::TokenRefreshFailed)
            }
        }
    }

    fn store_token(&self, token: AccessToken) {
        *self.token.write() = Some(token.clone());
        if let Err(error) = self.storage.set(&self.storage_key(), token) {
            warn!(error = %error, "could not persist access token");
        }
    }

    fn mark_refresh_failed(&self) {
        // First observer of the failure emits the terminal notification;
        // everyone else just sees the flag.
        if !self.refresh_failed.swap(true, Ordering::Relaxed) {
            self.notify(&SessionNotification::TokenRefreshFailed);
        }
    }

    // ── inbound routing ─────────────────────────────────────────────

    fn handle_frame(&self, raw: &str) {
        match decode_frame(raw) {
            Ok(DecodedFrame::Event { event_id, event }) => self.route_event(event_id, event),
            Ok(DecodedFrame::OperationError(error)) => self.route_operation_error(error),
            Ok(DecodedFrame::ServerError(error)) => {
                warn!(message = %error.message, "server error");
                self.dispatcher.dispatch_error(&ClientError::Server(error));
            }
            Err(error) => {
                warn!(error = %error, "undecodable frame");
                self.dispatcher.dispatch_error(&ClientError::Decode(error));
            }
        }
    }

    fn route_event(&self, event_id: Option<EventId>, event: InboundEvent) {
        // Store first: when a waiter wakes, the store already reflects the
        // event it is being handed.
        self.apply_push_effects(&event);
        if let Some(id) = &event_id {
            let _ = self.correlator.resolve(id, Ok(event.clone()));
        }
        self.dispatcher.dispatch(&event);
    }

    /// Applies a push event's store side effects. Response payloads are
    /// applied by their awaiting caller instead.
    fn apply_push_effects(&self, event: &InboundEvent) {
        match event {
            InboundEvent::MessageCreated(data) => {
                if let Some(summary) = &data.thread {
                    self.store.register_summaries(std::slice::from_ref(summary));
                }
                if let Err(error) = self.store.append_live(&data.message) {
                    warn!(error = %error, "live message dropped");
                    self.dispatcher.dispatch_error(&error);
                }
            }
            InboundEvent::MessageReadChanged(data) => {
                let _ = self.store.mark_read(&data.message);
            }
            InboundEvent::ContactInboxAssigneeChanged(data) => {
                self.store.set_assignee(
                    &data.thread.id_on_external_platform,
                    data.inbox_assignee.as_ref(),
                    data.previous_inbox_assignee.as_ref(),
                );
            }
            InboundEvent::SetPositionInQueue(data) => {
                let _ = self
                    .store
                    .set_queue_position(data.position_in_queue, data.thread.as_ref());
            }
            _ => {}
        }
    }

    fn route_operation_error(&self, error: OperationError) {
        let code = error.error_code.clone();
        warn!(code = code.as_wire(), "operation failed on the server");
        let resolved = error.event_id.as_ref().is_some_and(|id| {
            self.correlator
                .resolve(id, Err(ClientError::Operation(error.clone())))
        });

        if code == ErrorCode::TokenRefreshingFailed {
            self.mark_refresh_failed();
        }
        if code.is_soft() {
            self.notify(&SessionNotification::SoftError { code });
        }
        if !resolved {
            self.dispatcher
                .dispatch_error(&ClientError::Operation(error));
        }
    }

    fn handle_closed(self: &Arc<Self>, reason: &CloseReason) {
        self.correlator.cancel_all();
        let state = self.state();
        if !reason.is_unexpected() || !state.is_open() {
            debug!(%state, ?reason, "connection closed");
            return;
        }

        warn!(%state, ?reason, "connection dropped unexpectedly");
        self.notify(&SessionNotification::UnexpectedDisconnect);
        // Leave the open states right away so sends fail fast while the
        // reconnect task backs off.
        let _ = self.set_state(ConnectionState::Connecting);
        if self.reconnect_active.swap(true, Ordering::Relaxed) {
            return;
        }
        let session = self.clone();
        drop(tokio::spawn(async move {
            session.run_reconnect().await;
            session.reconnect_active.store(false, Ordering::Relaxed);
        }));
    }

    /// Retries `establish` with exponential backoff until it succeeds, the
    /// session is closed, or credentials become unusable.
    async fn run_reconnect(self: &Arc<Self>) {
        let mut attempt: u32 = 0;
        loop {
            let delay = backoff_delay_with_random(attempt, &self.config.retry, rand::random());
            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "reconnecting after backoff"
            );
            tokio::time::sleep(delay).await;
            if self.state() == ConnectionState::Closed {
                debug!("session closed during backoff, abandoning reconnect");
                return;
            }
            match self.establish().await {
                Ok(()) => {
                    info!("reconnected");
                    return;
                }
                Err(error) => {
                    warn!(attempt, error = %error, "reconnect attempt failed");
                    if error.is_fatal() {
                        let _ = self.set_state(ConnectionState::Closed);
                        return;
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    // ── shared plumbing ─────────────────────────────────────────────

    fn set_state(&self, next: ConnectionState) -> Result<(), ClientError> {
        let from = {
            let mut state = self.state.write();
            let from = *state;
            if from == next {
                return Ok(());
            }
            if !from.can_transition_to(next) {
                return Err(ClientError::InvalidStateTransition { from, to: next });
            }
            *state = next;
            from
        };
        debug!(%from, to = %next, "connection state changed");
        self.notify(&SessionNotification::StateChanged { from, to: next });
        Ok(())
    }

    fn notify(&self, notification: &SessionNotification) {
        self.notifications.emit(notification);
    }

    fn socket_url(&self) -> String {
        let visitor = self
            .visitor_id
            .read()
            .clone()
            .map(|v| v.to_string())
            .unwrap_or_default();
        format!(
            "{}?brandId={}&channelId={}&visitorId={visitor}",
            self.config.environment.socket_url(),
            self.config.brand_id,
            self.config.channel_id
        )
    }

    fn storage_key(&self) -> String {
        format!("{}:{}", self.config.brand_id, self.config.channel_id)
    }
}

fn unexpected_answer(context: &str, event: &InboundEvent) -> ClientError {
    ClientError::InconsistentState {
        context: format!("{context} answered with {}", event.raw_kind()),
    }
}

/// Pumps transport events into the session until the connection closes.
async fn run_reader(
    session: Arc<SessionController>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Frame(raw) => session.handle_frame(&raw),
            TransportEvent::Closed { reason } => {
                session.handle_closed(&reason);
                break;
            }
        }
    }
    debug!("reader loop ended");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
