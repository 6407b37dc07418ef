//! Chat session: connection lifecycle, channel membership and dispatch.
//!
//! A [`Session`] owns at most one transport handle. `connect` opens it through
//! the injected [`Transport`]; the transport reports back through an event sink
//! that the session turns into state transitions, reconnection decisions and
//! subscriber callbacks.
//!
//! # State machine
//!
//! ```text
//!  Disconnected ──connect()──▶ Connecting ──Connected──▶ Connected
//!                                  │                        │
//!                        ConnectError              Disconnected{reason}
//!                                  ▼                        ▼
//!                             Reconnecting{attempt} ◀───────┘
//!                             │        │
//!                    Connected│        │GiveUp / server close
//!                             ▼        ▼
//!                        Connected   Disconnected (handle released)
//! ```
//!
//! The session is `!Send` and must live inside a `tokio::task::LocalSet` when
//! used with [`WebSocketTransport`](crate::WebSocketTransport).

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use huddle_protocol::{
    BroadcastMessage, ChannelId, Envelope, Frame, ProtocolError, RoomJoining,
    SendMessage, ServerId, SOURCE_CUSTOM_UI, UserId,
};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, ConfigError};
use crate::constants::{EVENT_CHANNEL_CAPACITY, SENDER_NAME_PREFIX_LEN, UNKNOWN_SENDER_NAME};
use crate::credentials::{CredentialStore, NoCredentials};
use crate::membership::ChannelSet;
use crate::reconnect::{ReconnectDecision, Reconnector};
use crate::subscriptions::{ConnectionState, SessionEvent, SubscriberRegistry, Subscription};
use crate::transport::{
    DisconnectReason, EventSink, OpenRequest, Transport, TransportError, TransportEvent,
    TransportHandle, TransportId,
};

/// Errors returned synchronously by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected")]
    NotConnected,
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

struct SessionInner {
    config: ClientConfig,
    transport: Rc<dyn Transport>,
    credentials: Rc<dyn CredentialStore>,
    user_id: Option<UserId>,
    user_name: Option<String>,
    link: Option<TransportHandle>,
    state: ConnectionState,
    channels: ChannelSet,
    reconnector: Reconnector,
    subscribers: SubscriberRegistry,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl SessionInner {
    fn emit(&self, event: SessionEvent) {
        // No receivers is fine
        let _ = self.events_tx.send(event);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            self.state = state;
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn current_link_id(&self) -> Option<TransportId> {
        self.link.as_ref().map(TransportHandle::id)
    }
}

/// Client-side chat session. Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct Session {
    inner: Rc<RefCell<SessionInner>>,
}

impl Session {
    /// Unauthenticated session. Use [`Session::with_credentials`] to attach a
    /// bearer token source.
    pub fn new(config: ClientConfig, transport: impl Transport + 'static) -> Self {
        Self::with_credentials(config, transport, NoCredentials)
    }

    pub fn with_credentials(
        config: ClientConfig,
        transport: impl Transport + 'static,
        credentials: impl CredentialStore + 'static,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let reconnector = Reconnector::new(config.reconnect.clone());
        Self {
            inner: Rc::new(RefCell::new(SessionInner {
                config,
                transport: Rc::new(transport),
                credentials: Rc::new(credentials),
                user_id: None,
                user_name: None,
                link: None,
                state: ConnectionState::Disconnected,
                channels: ChannelSet::new(),
                reconnector,
                subscribers: SubscriberRegistry::new(),
                events_tx,
            })),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open the connection, or return the existing handle.
    ///
    /// With a handle already in place (connecting, connected or
    /// reconnecting) only the display name is updated. Otherwise a fresh
    /// transport is opened and the handshake proceeds in the background;
    /// watch [`Session::subscribe_events`] for `Connected`.
    ///
    /// A `None` name keeps any previously stored display name, on a fresh
    /// connect as well as a reused one; `Some` replaces it.
    pub fn connect(
        &self,
        user_id: impl Into<UserId>,
        user_name: Option<&str>,
    ) -> Result<TransportHandle, SessionError> {
        let user_id = user_id.into();

        let (endpoint, transport, credentials) = {
            let mut inner = self.inner.borrow_mut();
            if let Some(link) = inner.link.clone() {
                if let Some(name) = user_name {
                    inner.user_name = Some(name.to_string());
                }
                debug!(transport = %link.id().short(), "connect: reusing existing transport");
                return Ok(link);
            }
            (
                inner.config.websocket_url()?,
                inner.transport.clone(),
                inner.credentials.clone(),
            )
        };

        let auth_token = credentials.auth_token();
        if auth_token.is_none() {
            warn!(user_id = %user_id, "no auth token available, connecting unauthenticated");
        }

        let id = TransportId::new();
        let request = OpenRequest {
            id,
            endpoint: endpoint.clone(),
            auth_token,
            user_id: user_id.clone(),
        };
        // No borrow held: the transport may do anything except call the sink
        let handle = transport.open(request, self.event_sink(id))?;

        let mut inner = self.inner.borrow_mut();
        inner.user_id = Some(user_id.clone());
        if let Some(name) = user_name {
            inner.user_name = Some(name.to_string());
        }
        inner.reconnector.reset();
        inner.link = Some(handle.clone());
        inner.set_state(ConnectionState::Connecting);
        info!(user_id = %user_id, %endpoint, transport = %id.short(), "connecting");

        Ok(handle)
    }

    /// Tear down the transport and forget channels and subscribers.
    ///
    /// Safe in any state, any number of times.
    pub fn disconnect(&self) {
        let (link, subscribers) = {
            let mut inner = self.inner.borrow_mut();
            let link = inner.link.take();
            inner.channels.clear();
            inner.reconnector.reset();
            inner.set_state(ConnectionState::Disconnected);
            (link, inner.subscribers.clone())
        };
        if let Some(link) = link {
            info!(transport = %link.id().short(), "disconnecting");
            link.link().close();
        }
        subscribers.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.borrow().state.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.borrow().state
    }

    /// The current transport handle, if any.
    pub fn transport(&self) -> Option<TransportHandle> {
        self.inner.borrow().link.clone()
    }

    /// Lifecycle notifications. Each receiver sees events sent after it
    /// subscribed.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.borrow().events_tx.subscribe()
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// Announce a join and record the channel as active.
    ///
    /// The `ROOM_JOINING` envelope goes out on every call, including for a
    /// channel that is already active.
    pub fn join_channel(
        &self,
        channel_id: impl Into<ChannelId>,
        server_id: impl Into<ServerId>,
        metadata: Option<Value>,
    ) -> Result<(), SessionError> {
        let channel_id = channel_id.into();
        let (link, user_id) = {
            let inner = self.inner.borrow();
            let link = inner.link.clone().ok_or(SessionError::NotConnected)?;
            (link, inner.user_id.clone().unwrap_or_default())
        };

        let payload = RoomJoining {
            channel_id: channel_id.clone(),
            entity_id: user_id,
            server_id: server_id.into(),
            metadata,
        };
        let frame = Frame::envelope(&Envelope::wrap(&payload)?)?;

        if self.inner.borrow_mut().channels.join(channel_id.clone()) {
            debug!(channel = %channel_id, "joined channel");
        }
        link.link().send(frame)?;
        Ok(())
    }

    /// Forget a channel locally. Nothing is sent on the wire.
    pub fn leave_channel(&self, channel_id: &str) -> bool {
        let left = self.inner.borrow_mut().channels.leave(channel_id);
        if left {
            debug!(channel = %channel_id, "left channel");
        }
        left
    }

    /// Active channels, sorted.
    pub fn active_channels(&self) -> Vec<ChannelId> {
        self.inner.borrow().channels.to_sorted_vec()
    }

    pub fn is_member(&self, channel_id: &str) -> bool {
        self.inner.borrow().channels.contains(channel_id)
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Send a chat message to `channel_id`.
    pub fn send_message(
        &self,
        channel_id: impl Into<ChannelId>,
        message: impl Into<String>,
        server_id: impl Into<ServerId>,
        metadata: Option<Value>,
    ) -> Result<(), SessionError> {
        let (link, sender_id) = {
            let inner = self.inner.borrow();
            let link = inner.link.clone().ok_or(SessionError::NotConnected)?;
            (link, inner.user_id.clone().unwrap_or_default())
        };

        let payload = SendMessage {
            sender_id,
            sender_name: self.sender_name(),
            message: message.into(),
            channel_id: channel_id.into(),
            server_id: server_id.into(),
            source: SOURCE_CUSTOM_UI.to_string(),
            metadata,
        };
        let frame = Frame::envelope(&Envelope::wrap(&payload)?)?;
        link.link().send(frame)?;
        Ok(())
    }

    /// Display name used for outbound messages.
    ///
    /// The stored name, else `User-` plus the first characters of the user
    /// id, else a fixed placeholder.
    pub fn sender_name(&self) -> String {
        let inner = self.inner.borrow();
        if let Some(name) = &inner.user_name {
            return name.clone();
        }
        match &inner.user_id {
            Some(id) if !id.as_str().is_empty() => {
                format!("User-{}", id.prefix(SENDER_NAME_PREFIX_LEN))
            }
            _ => UNKNOWN_SENDER_NAME.to_string(),
        }
    }

    pub fn set_user_name(&self, name: impl Into<String>) {
        self.inner.borrow_mut().user_name = Some(name.into());
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.inner.borrow().user_id.clone()
    }

    pub fn user_name(&self) -> Option<String> {
        self.inner.borrow().user_name.clone()
    }

    /// Register a callback for inbound broadcasts.
    ///
    /// Allowed in any state. The callback stays registered until
    /// [`Subscription::cancel`] or [`Session::disconnect`].
    pub fn on_message<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&BroadcastMessage) + 'static,
    {
        let subscribers = self.inner.borrow().subscribers.clone();
        subscribers.register(callback)
    }

    // ========================================================================
    // Transport events
    // ========================================================================

    fn event_sink(&self, id: TransportId) -> EventSink {
        let weak: Weak<RefCell<SessionInner>> = Rc::downgrade(&self.inner);
        Rc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                handle_event(&inner, id, event);
            }
        })
    }
}

fn handle_event(inner: &Rc<RefCell<SessionInner>>, id: TransportId, event: TransportEvent) {
    // Events from a released handle are stale
    if inner.borrow().current_link_id() != Some(id) {
        debug!(transport = %id.short(), ?event, "ignoring event from stale transport");
        return;
    }

    match event {
        TransportEvent::Connected => {
            let mut inner = inner.borrow_mut();
            inner.reconnector.on_connected();
            inner.set_state(ConnectionState::Connected);
            info!(transport = %id.short(), "connected");
        }
        TransportEvent::ConnectError { error } => {
            warn!(transport = %id.short(), %error, "connect error");
            inner.borrow().emit(SessionEvent::TransportError(error));
            handle_failure(inner);
        }
        TransportEvent::Disconnected { reason } => handle_disconnect(inner, id, reason),
        TransportEvent::Frame(frame) => handle_frame(inner, frame),
        TransportEvent::Malformed(detail) => {
            warn!(%detail, "malformed inbound data");
            inner.borrow().emit(SessionEvent::ProtocolViolation(detail));
        }
    }
}

fn handle_disconnect(inner: &Rc<RefCell<SessionInner>>, id: TransportId, reason: DisconnectReason) {
    info!(transport = %id.short(), %reason, "transport disconnected");
    if reason.should_reconnect() {
        if let DisconnectReason::TransportError(error) = reason {
            inner.borrow().emit(SessionEvent::TransportError(error));
        }
        handle_failure(inner);
    } else if reason == DisconnectReason::ServerInitiated {
        let link = {
            let mut inner = inner.borrow_mut();
            let link = inner.link.take();
            inner.set_state(ConnectionState::Disconnected);
            link
        };
        if let Some(link) = link {
            link.link().close();
        }
    }
}

/// Apply the reconnector's decision after a failed attempt or dropped link.
fn handle_failure(inner: &Rc<RefCell<SessionInner>>) {
    let mut guard = inner.borrow_mut();
    let decision = guard.reconnector.on_failure();
    match decision {
        ReconnectDecision::Retry { attempt, delay } => {
            guard.set_state(ConnectionState::Reconnecting { attempt });
            guard.emit(SessionEvent::ReconnectScheduled { attempt, delay });
            let link = guard.link.clone();
            drop(guard);
            info!(attempt, ?delay, "reconnect scheduled");
            if let Some(link) = link {
                link.link().retry_in(delay);
            }
        }
        ReconnectDecision::GiveUp { attempts } => {
            let link = guard.link.take();
            guard.set_state(ConnectionState::Disconnected);
            guard.emit(SessionEvent::ReconnectExhausted { attempts });
            drop(guard);
            warn!(attempts, "reconnection exhausted, session idle until connect()");
            if let Some(link) = link {
                link.link().close();
            }
        }
    }
}

fn handle_frame(inner: &Rc<RefCell<SessionInner>>, frame: Frame) {
    if frame.is_broadcast() {
        match frame.to_broadcast() {
            Ok(message) => {
                let subscribers = inner.borrow().subscribers.clone();
                let delivered = subscribers.dispatch(&message);
                debug!(delivered, "broadcast dispatched");
            }
            Err(e) => {
                warn!(error = %e, "undecodable broadcast");
                inner
                    .borrow()
                    .emit(SessionEvent::ProtocolViolation(e.to_string()));
            }
        }
    } else if frame.is_envelope() {
        match frame.to_envelope() {
            Ok(envelope) => debug!(kind = %envelope.kind, "ignoring inbound envelope"),
            Err(e) => {
                warn!(error = %e, "undecodable envelope");
                inner
                    .borrow()
                    .emit(SessionEvent::ProtocolViolation(e.to_string()));
            }
        }
    } else {
        debug!(event = %frame.event, "ignoring unrecognized frame");
    }
}

// ============================================================================
// Tests
// ============================================================================
