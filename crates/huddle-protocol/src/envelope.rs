//! Envelope types: the `{type, payload}` unit of wire communication.
//!
//! `MessageType` is a closed enumeration serialized as its numeric tag.
//! Decoding a tag outside `1..=6` is a protocol violation, not a fallback.
//! Payload structs implement [`Payload`], which binds each shape to its tag
//! so an envelope can't be built with a mismatched payload.

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use thiserror::Error;

use crate::ids::{ChannelId, ServerId, UserId};

/// Errors from encoding or decoding envelopes and frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown message type tag: {0}")]
    UnknownMessageType(u8),
    #[error("expected {expected} envelope, got {got}")]
    UnexpectedType { expected: MessageType, got: MessageType },
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Envelope tag. The numeric value is the wire representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(try_from = "u8", into = "u8")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum MessageType {
    /// Client announces it joined a channel.
    RoomJoining = 1,
    /// Client sends a chat message.
    SendMessage = 2,
    /// Server-defined message; never constructed by the client.
    Message = 3,
    /// Reserved for acknowledgments.
    Ack = 4,
    /// Reserved for "agent is thinking" indicators.
    Thinking = 5,
    /// Reserved for control traffic.
    Control = 6,
}

impl MessageType {
    /// Every tag, in numeric order.
    pub const ALL: [MessageType; 6] = [
        MessageType::RoomJoining,
        MessageType::SendMessage,
        MessageType::Message,
        MessageType::Ack,
        MessageType::Thinking,
        MessageType::Control,
    ];

    /// Numeric wire tag.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Parse from the SCREAMING_SNAKE_CASE name (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(MessageType::RoomJoining),
            2 => Ok(MessageType::SendMessage),
            3 => Ok(MessageType::Message),
            4 => Ok(MessageType::Ack),
            5 => Ok(MessageType::Thinking),
            6 => Ok(MessageType::Control),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(kind: MessageType) -> u8 {
        kind.tag()
    }
}

/// A payload shape bound to exactly one envelope tag.
pub trait Payload: Serialize + DeserializeOwned {
    const KIND: MessageType;
}

/// `{ type, payload }`: one logical frame of the protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub payload: Value,
}

impl Envelope {
    /// Wrap a typed payload under its tag.
    pub fn wrap<P: Payload>(payload: &P) -> Result<Self, ProtocolError> {
        Ok(Self {
            kind: P::KIND,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Decode the payload as `P`, rejecting envelopes carrying another tag.
    pub fn decode<P: Payload>(&self) -> Result<P, ProtocolError> {
        if self.kind != P::KIND {
            return Err(ProtocolError::UnexpectedType {
                expected: P::KIND,
                got: self.kind,
            });
        }
        Ok(P::deserialize(&self.payload)?)
    }

    /// Parse an envelope from a JSON value.
    ///
    /// Unknown tags surface as [`ProtocolError::UnknownMessageType`] rather
    /// than a generic JSON error, so callers can tell a version skew from
    /// garbage.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        if let Some(tag) = value.get("type").and_then(Value::as_u64) {
            let tag = u8::try_from(tag).map_err(|_| ProtocolError::UnknownMessageType(u8::MAX))?;
            MessageType::try_from(tag)?;
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Payload for [`MessageType::RoomJoining`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoining {
    pub channel_id: ChannelId,
    /// The user joining.
    pub entity_id: UserId,
    pub server_id: ServerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Payload for RoomJoining {
    const KIND: MessageType = MessageType::RoomJoining;
}

/// Payload for [`MessageType::SendMessage`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub sender_id: UserId,
    pub sender_name: String,
    pub message: String,
    pub channel_id: ChannelId,
    pub server_id: ServerId,
    /// Origin client class; always [`SOURCE_CUSTOM_UI`](crate::SOURCE_CUSTOM_UI) from this client.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Payload for SendMessage {
    const KIND: MessageType = MessageType::SendMessage;
}

// ============================================================================
// Tests
// ============================================================================
