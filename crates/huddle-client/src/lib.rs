//! Client session for the huddle chat backend.
//!
//! A [`Session`] owns one authenticated, auto-reconnecting duplex connection,
//! tracks which channels the local user has joined, frames outbound chat
//! traffic as protocol envelopes, and fans inbound broadcasts out to
//! subscribers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Session (Rc<RefCell<..>>, !Send)                        │
//! │   ├── ChannelSet          (membership intent)           │
//! │   ├── Reconnector         (bounded retry state machine) │
//! │   ├── SubscriberRegistry  (on_message callbacks)        │
//! │   └── TransportHandle ──▶ dyn TransportLink             │
//! └────────────────────┬────────────────────────────────────┘
//!                      │ EventSink (TransportEvent)
//! ┌────────────────────┴────────────────────────────────────┐
//! │ WebSocketTransport: spawn_local driver per link         │
//! │   connect_async + Authorization: Bearer <token>         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     let session = huddle_client::websocket_session(ClientConfig::load(None)?);
//!     let _sub = session.on_message(|msg| println!("{:?}", msg.text));
//!     session.connect("user-1", Some("Alice"))?;
//!     // wait for SessionEvent::StateChanged(Connected), then:
//!     session.join_channel("general", "srv-1", None)?;
//!     session.send_message("general", "hello", "srv-1", None)?;
//! }).await;
//! ```

pub mod config;
pub mod constants;
pub mod credentials;
pub mod membership;
pub mod reconnect;
pub mod session;
pub mod subscriptions;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{ClientConfig, ConfigError};
pub use credentials::{CredentialStore, EnvToken, NoCredentials, StaticToken};
pub use membership::ChannelSet;
pub use reconnect::{Backoff, ReconnectDecision, ReconnectPolicy, Reconnector};
pub use session::{Session, SessionError};
pub use subscriptions::{ConnectionState, SessionEvent, SubscriberRegistry, Subscription};
pub use transport::{
    DisconnectReason, EventSink, OpenRequest, Transport, TransportError, TransportEvent,
    TransportHandle, TransportId, TransportLink, WebSocketTransport,
};

// Re-export the protocol so callers need only one dependency
pub use huddle_protocol as protocol;

/// Session over the WebSocket transport, reading the bearer token from
/// `HUDDLE_TOKEN` at each connect.
pub fn websocket_session(config: ClientConfig) -> Session {
    let transport = WebSocketTransport::new(config.connect_timeout());
    Session::with_credentials(config, transport, EnvToken::default())
}
