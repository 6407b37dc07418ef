//! Envelope protocol shared by huddle clients and the messaging backend.
//!
//! This crate is the wire contract: typed identifiers, the closed set of
//! message-type tags, the payload shape for each tag, and the named-event
//! frame that carries envelopes over a duplex transport. It has **no internal
//! huddle dependencies**: a pure leaf crate that the client builds on.
//!
//! # Wire Layout
//!
//! ```text
//! Frame  { event: "message",          data: Envelope }          client → server
//! Frame  { event: "messageBroadcast", data: BroadcastMessage }  server → client
//!
//! Envelope { type: MessageType (numeric tag), payload: object }
//! ```
//!
//! # Key Types
//!
//! |----------------------|-------------------------------------------------|
//! | Type                 | Purpose                                         |
//! |----------------------|-------------------------------------------------|
//! | [`MessageType`]      | Closed enumeration of envelope tags (1..=6)     |
//! | [`Envelope`]         | `{type, payload}` unit of outbound communication|
//! | [`RoomJoining`]      | Payload for `ROOM_JOINING`                      |
//! | [`SendMessage`]      | Payload for `SEND_MESSAGE`                      |
//! | [`Frame`]            | Named event wrapping an envelope or broadcast   |
//! | [`BroadcastMessage`] | Server-pushed chat message                      |
//! | [`ChannelId`]        | Room within an isolation scope                  |
//! | [`ServerId`]         | Isolation scope grouping channels               |
//! | [`UserId`]           | Acting entity for joins and sends               |
//! |----------------------|-------------------------------------------------|

pub mod broadcast;
pub mod envelope;
pub mod frame;
pub mod ids;

pub use broadcast::BroadcastMessage;
pub use envelope::{Envelope, MessageType, Payload, ProtocolError, RoomJoining, SendMessage};
pub use frame::{BROADCAST_EVENT, Frame, MESSAGE_EVENT};
pub use ids::{ChannelId, ServerId, UserId};

/// Origin tag stamped on every `SEND_MESSAGE` from this client class.
pub const SOURCE_CUSTOM_UI: &str = "custom_ui";
