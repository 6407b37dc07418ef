//! Named-event frames: the unit actually written to the transport.
//!
//! Envelopes travel under the `message` event; server pushes arrive under
//! `messageBroadcast`. The broadcast event lives outside the
//! [`MessageType`](crate::MessageType) tag space.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::broadcast::BroadcastMessage;
use crate::envelope::{Envelope, ProtocolError};

/// Event name for client → server envelopes.
pub const MESSAGE_EVENT: &str = "message";

/// Event name for server → client chat broadcasts.
pub const BROADCAST_EVENT: &str = "messageBroadcast";

/// One JSON text frame: `{ "event": ..., "data": ... }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Wrap an envelope under [`MESSAGE_EVENT`].
    pub fn envelope(envelope: &Envelope) -> Result<Self, ProtocolError> {
        Ok(Self::new(MESSAGE_EVENT, serde_json::to_value(envelope)?))
    }

    /// Wrap a broadcast under [`BROADCAST_EVENT`] (server side, and tests).
    pub fn broadcast(message: &BroadcastMessage) -> Result<Self, ProtocolError> {
        Ok(Self::new(BROADCAST_EVENT, serde_json::to_value(message)?))
    }

    pub fn is_broadcast(&self) -> bool {
        self.event == BROADCAST_EVENT
    }

    pub fn is_envelope(&self) -> bool {
        self.event == MESSAGE_EVENT
    }

    /// Decode `data` as an envelope, validating the tag.
    pub fn to_envelope(&self) -> Result<Envelope, ProtocolError> {
        Envelope::from_value(self.data.clone())
    }

    /// Decode `data` as a broadcast message.
    pub fn to_broadcast(&self) -> Result<BroadcastMessage, ProtocolError> {
        Ok(BroadcastMessage::deserialize(&self.data)?)
    }

    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{MessageType, RoomJoining};
    use serde_json::json;

    #[test]
    fn test_envelope_frame_text() {
        let env = Envelope::wrap(&RoomJoining {
            channel_id: "c".into(),
            entity_id: "u".into(),
            server_id: "s".into(),
            metadata: None,
        })
        .unwrap();
        let frame = Frame::envelope(&env).unwrap();
        assert!(frame.is_envelope());

        let parsed: Value = serde_json::from_str(&frame.to_text().unwrap()).unwrap();
        assert_eq!(parsed["event"], json!("message"));
        assert_eq!(parsed["data"]["type"], json!(1));
        assert_eq!(parsed["data"]["payload"]["entityId"], json!("u"));
    }

    #[test]
    fn test_broadcast_frame_decodes() {
        let text = r#"{"event":"messageBroadcast","data":{"senderName":"Bob","text":"yo","channelId":"c"}}"#;
        let frame = Frame::from_text(text).unwrap();
        assert!(frame.is_broadcast());
        let msg = frame.to_broadcast().unwrap();
        assert_eq!(msg.sender_name.as_deref(), Some("Bob"));
        assert_eq!(msg.text.as_deref(), Some("yo"));
    }

    #[test]
    fn test_envelope_frame_with_unknown_tag() {
        let frame = Frame::new(MESSAGE_EVENT, json!({ "type": 9, "payload": {} }));
        assert!(matches!(
            frame.to_envelope(),
            Err(ProtocolError::UnknownMessageType(9))
        ));
    }

    #[test]
    fn test_frame_without_data() {
        let frame = Frame::from_text(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(frame.data, Value::Null);
        assert!(!frame.is_broadcast());
        assert!(!frame.is_envelope());
    }

    #[test]
    fn test_garbage_is_json_error() {
        assert!(matches!(
            Frame::from_text("not json"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_envelope_roundtrip_through_frame() {
        let frame = Frame::new(MESSAGE_EVENT, json!({ "type": 6, "payload": { "op": "ping" } }));
        let env = frame.to_envelope().unwrap();
        assert_eq!(env.kind, MessageType::Control);
        assert_eq!(env.payload["op"], json!("ping"));
    }
}
