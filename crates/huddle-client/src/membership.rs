//! Channel membership bookkeeping.
//!
//! Membership is local intent, not transport state: it survives reconnects
//! and exhaustion, and only an explicit session disconnect clears it.

use std::collections::HashSet;

use huddle_protocol::ChannelId;

/// Set of channels the session has joined. Unique, order irrelevant.
#[derive(Clone, Debug, Default)]
pub struct ChannelSet {
    channels: HashSet<ChannelId>,
}

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a join. Returns `true` if the channel was not already active.
    pub fn join(&mut self, channel_id: ChannelId) -> bool {
        self.channels.insert(channel_id)
    }

    /// Forget a channel. Returns `true` if it was active.
    pub fn leave(&mut self, channel_id: &str) -> bool {
        self.channels.remove(channel_id)
    }

    pub fn contains(&self, channel_id: &str) -> bool {
        self.channels.contains(channel_id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }

    /// Snapshot, sorted for stable display and assertions.
    pub fn to_sorted_vec(&self) -> Vec<ChannelId> {
        let mut out: Vec<ChannelId> = self.channels.iter().cloned().collect();
        out.sort();
        out
    }
}
