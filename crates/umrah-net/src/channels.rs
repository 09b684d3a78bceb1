//! Channel subscription tracking.
//!
//! Keeps the set of channels the adapter wants subscribed, how many
//! consumers hold each conversation channel, and whether the server has
//! confirmed the subscription on the current connection.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use umrah_shared::protocol::ChannelKind;
use umrah_shared::types::ConversationId;

/// State of one tracked channel.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub kind: ChannelKind,
    /// Consumers holding the channel. Implicit channels always have 1.
    pub refs: usize,
    /// Whether the server confirmed the subscription on this connection.
    pub confirmed: bool,
    /// When the subscription was last requested.
    pub requested_at: DateTime<Utc>,
}

/// Tracks every channel the adapter is (or should be) subscribed to.
#[derive(Debug, Clone, Default)]
pub struct ChannelTracker {
    channels: HashMap<String, ChannelInfo>,
}

impl ChannelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an implicit channel. Returns `true` if it was not tracked yet.
    pub fn add_implicit(&mut self, kind: ChannelKind) -> bool {
        let name = kind.name();
        if self.channels.contains_key(&name) {
            return false;
        }
        debug!(channel = %name, "Tracking implicit channel");
        self.channels.insert(name, Self::info(kind));
        true
    }

    /// Take a reference on a conversation channel.
    ///
    /// Returns `true` when this is the first reference, i.e. the caller
    /// must actually subscribe.
    pub fn acquire(&mut self, id: ConversationId) -> bool {
        let kind = ChannelKind::Conversation(id);
        let name = kind.name();
        match self.channels.get_mut(&name) {
            Some(info) => {
                info.refs += 1;
                debug!(channel = %name, refs = info.refs, "Conversation channel shared");
                false
            }
            None => {
                debug!(channel = %name, "Tracking conversation channel");
                self.channels.insert(name, Self::info(kind));
                true
            }
        }
    }

    /// Drop a reference on a conversation channel.
    ///
    /// Returns `true` when the last reference is gone and the caller must
    /// unsubscribe.
    pub fn release(&mut self, id: ConversationId) -> bool {
        let name = ChannelKind::Conversation(id).name();
        let Some(info) = self.channels.get_mut(&name) else {
            return false;
        };
        info.refs = info.refs.saturating_sub(1);
        if info.refs > 0 {
            return false;
        }
        self.channels.remove(&name);
        debug!(channel = %name, "Released conversation channel");
        true
    }

    pub fn confirm(&mut self, name: &str) {
        if let Some(info) = self.channels.get_mut(name) {
            info.confirmed = true;
        }
    }

    /// Forget server confirmations, e.g. after the connection dropped.
    pub fn reset_confirmations(&mut self) {
        for info in self.channels.values_mut() {
            info.confirmed = false;
            info.requested_at = Utc::now();
        }
    }

    /// Drop the implicit channels, keeping conversation references.
    pub fn clear_implicit(&mut self) {
        self.channels.retain(|_, info| !info.kind.is_implicit());
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }

    pub fn get(&self, name: &str) -> Option<&ChannelInfo> {
        self.channels.get(name)
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn is_confirmed(&self, name: &str) -> bool {
        self.channels.get(name).map_or(false, |info| info.confirmed)
    }

    /// Names of every tracked channel, implicit channels first.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<(bool, String)> = self
            .channels
            .iter()
            .map(|(name, info)| (!info.kind.is_implicit(), name.clone()))
            .collect();
        names.sort();
        names.into_iter().map(|(_, name)| name).collect()
    }

    /// Conversations currently held by at least one consumer.
    pub fn conversations(&self) -> Vec<ConversationId> {
        let mut ids: Vec<ConversationId> = self
            .channels
            .values()
            .filter_map(|info| match info.kind {
                ChannelKind::Conversation(id) => Some(id),
                _ => None,
            })
            .collect();
        ids.sort();
        ids
    }

    pub fn conversation_refs(&self, id: ConversationId) -> usize {
        self.channels
            .get(&ChannelKind::Conversation(id).name())
            .map_or(0, |info| info.refs)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    fn info(kind: ChannelKind) -> ChannelInfo {
        ChannelInfo {
            kind,
            refs: 1,
            confirmed: false,
            requested_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umrah_shared::types::ActorId;

    #[test]
    fn test_conversation_refcount() {
        let mut tracker = ChannelTracker::new();
        let id = ConversationId(42);

        assert!(tracker.acquire(id));
        assert!(!tracker.acquire(id));
        assert_eq!(tracker.conversation_refs(id), 2);

        assert!(!tracker.release(id));
        assert!(tracker.is_tracked("private-chat.42"));
        assert!(tracker.release(id));
        assert!(!tracker.is_tracked("private-chat.42"));
        assert!(!tracker.release(id));
    }

    #[test]
    fn test_implicit_channels_are_listed_first() {
        let mut tracker = ChannelTracker::new();
        tracker.acquire(ConversationId(1));
        assert!(tracker.add_implicit(ChannelKind::User(ActorId(5))));
        assert!(tracker.add_implicit(ChannelKind::Notifications(ActorId(5))));
        assert!(!tracker.add_implicit(ChannelKind::User(ActorId(5))));

        let names = tracker.channel_names();
        assert_eq!(names.len(), 3);
        assert_eq!(names[2], "private-chat.1");

        tracker.clear_implicit();
        assert_eq!(tracker.conversations(), vec![ConversationId(1)]);
    }

    #[test]
    fn test_confirmation_reset() {
        let mut tracker = ChannelTracker::new();
        tracker.add_implicit(ChannelKind::User(ActorId(2)));
        tracker.confirm("private-user.2");
        assert!(tracker.is_confirmed("private-user.2"));

        tracker.reset_confirmations();
        assert!(!tracker.is_confirmed("private-user.2"));
    }
}
