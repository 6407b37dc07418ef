//! Server-pushed chat messages.
//!
//! The shape is server-defined. Known fields are typed and optional; anything
//! else lands in `extra` so newer servers don't break older clients.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{ChannelId, ServerId, UserId};

/// A chat message delivered to every `on_message` subscriber.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<ServerId>,
    /// Unix millis, as stamped by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Fields this client doesn't model (thinking flags, actions, attachments).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BroadcastMessage {
    /// A minimal text broadcast for a channel.
    pub fn text(channel_id: impl Into<ChannelId>, text: impl Into<String>) -> Self {
        Self {
            channel_id: Some(channel_id.into()),
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Check if this broadcast targets the given channel.
    pub fn is_for_channel(&self, channel_id: &str) -> bool {
        self.channel_id.as_ref().is_some_and(|c| c == channel_id)
    }
}
