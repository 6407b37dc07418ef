//! Transport seam between the session and the wire.
//!
//! A [`Transport`] is a factory: `open` returns a [`TransportHandle`]
//! immediately and the connection proceeds in the background. Lifecycle
//! observations and inbound frames come back through the [`EventSink`] passed
//! to `open`.
//!
//! Transports never retry on their own. After a connect error or
//! a dropped link they sit idle until the session calls
//! [`TransportLink::retry_in`] or [`TransportLink::close`].
//!
//! # Delivery rule
//!
//! Implementations must never invoke the sink from inside `open`, `send`,
//! `retry_in` or `close`, only from their own event loop. The session relies
//! on this to avoid re-entrant borrows.

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use huddle_protocol::{Frame, UserId};
use thiserror::Error;

pub mod websocket;

pub use websocket::WebSocketTransport;

/// Identity of one opened transport handle (UUIDv7, time-ordered).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct TransportId(uuid::Uuid);

impl TransportId {
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// First 8 hex characters, for logs.
    pub fn short(&self) -> String {
        self.0.as_simple().to_string()[..8].to_string()
    }
}

impl Default for TransportId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransportId({})", self.short())
    }
}

/// Errors surfaced synchronously by a transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("auth token is not a valid header value")]
    InvalidToken,
    #[error("transport closed")]
    Closed,
}

/// Why an established link went away.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server closed the connection normally. Not retried.
    ServerInitiated,
    /// The stream ended without a close handshake.
    TransportClosed,
    /// Read or write failed.
    TransportError(String),
    /// We closed it.
    ClientInitiated,
}

impl DisconnectReason {
    /// Whether the session should try to re-establish the link.
    pub fn should_reconnect(&self) -> bool {
        matches!(
            self,
            DisconnectReason::TransportClosed | DisconnectReason::TransportError(_)
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ServerInitiated => f.write_str("server disconnect"),
            DisconnectReason::TransportClosed => f.write_str("transport close"),
            DisconnectReason::TransportError(e) => write!(f, "transport error: {e}"),
            DisconnectReason::ClientInitiated => f.write_str("client disconnect"),
        }
    }
}

/// Observations a transport reports from its event loop.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// Handshake completed.
    Connected,
    /// An established link went away.
    Disconnected { reason: DisconnectReason },
    /// A handshake attempt failed.
    ConnectError { error: String },
    /// An inbound frame.
    Frame(Frame),
    /// Inbound data that isn't a frame.
    Malformed(String),
}

/// Callback the transport invokes for every [`TransportEvent`].
pub type EventSink = Rc<dyn Fn(TransportEvent)>;

/// Everything a transport needs to open a connection.
#[derive(Clone)]
pub struct OpenRequest {
    /// Identity the opened handle must report.
    pub id: TransportId,
    /// WebSocket URL of the backend.
    pub endpoint: String,
    /// Bearer token for the handshake, if the credential store had one.
    pub auth_token: Option<String>,
    pub user_id: UserId,
}

impl fmt::Debug for OpenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenRequest")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Factory for transport links. Injected into the session.
pub trait Transport {
    fn open(&self, request: OpenRequest, events: EventSink) -> Result<TransportHandle, TransportError>;
}

/// One live (or retrying) connection, owned by the session.
pub trait TransportLink {
    fn id(&self) -> TransportId;

    /// Queue a frame. Frames sent before the first handshake completes are
    /// held and written in order once it does, or discarded if it fails.
    /// Frames sent while a reconnect is pending are dropped.
    fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Make another connection attempt after `delay`.
    fn retry_in(&self, delay: Duration);

    /// Tear down the connection and stop the event loop.
    fn close(&self);
}

/// Shared handle to a [`TransportLink`]. Cheap to clone; clones compare
/// identical under [`TransportHandle::same_as`].
#[derive(Clone)]
pub struct TransportHandle(Rc<dyn TransportLink>);

impl TransportHandle {
    pub fn new(link: impl TransportLink + 'static) -> Self {
        Self(Rc::new(link))
    }

    pub fn id(&self) -> TransportId {
        self.0.id()
    }

    /// Whether both handles refer to the same opened link.
    pub fn same_as(&self, other: &TransportHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn link(&self) -> &dyn TransportLink {
        self.0.as_ref()
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TransportHandle").field(&self.id()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_reasons() {
        assert!(DisconnectReason::TransportClosed.should_reconnect());
        assert!(DisconnectReason::TransportError("reset".into()).should_reconnect());
        assert!(!DisconnectReason::ServerInitiated.should_reconnect());
        assert!(!DisconnectReason::ClientInitiated.should_reconnect());
    }

    #[test]
    fn test_open_request_debug_redacts_token() {
        let req = OpenRequest {
            id: TransportId::new(),
            endpoint: "ws://localhost:3000".into(),
            auth_token: Some("s3cret".into()),
            user_id: "user-1".into(),
        };
        let dbg = format!("{req:?}");
        assert!(!dbg.contains("s3cret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn test_transport_ids_are_unique() {
        assert_ne!(TransportId::new(), TransportId::new());
        assert_eq!(TransportId::new().short().len(), 8);
    }
}
