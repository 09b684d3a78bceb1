//! Ordered message list of one conversation.
//!
//! Messages are kept sorted by `(sent_at, id)` no matter in which order
//! they arrive. Optimistic sends live under a local id until the backend
//! acknowledges them; the original `sent_at` is kept across the ack.
//! Status receipts for messages not yet known are parked and applied once
//! the message shows up.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use umrah_shared::models::{ChatMessage, ContentType, MessageStatus, MessageStatusUpdate};
use umrah_shared::types::{ActorId, ConversationId, MessageId};

#[derive(Debug, Clone)]
pub struct MessageTimeline {
    conversation: ConversationId,
    messages: Vec<ChatMessage>,
    parked: HashMap<u64, MessageStatusUpdate>,
}

impl MessageTimeline {
    pub fn new(conversation: ConversationId) -> Self {
        Self {
            conversation,
            messages: Vec::new(),
            parked: HashMap::new(),
        }
    }

    pub fn conversation(&self) -> ConversationId {
        self.conversation
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn position(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    fn insert_sorted(&mut self, message: ChatMessage) {
        let key = message.ordering_key();
        let at = self.messages.partition_point(|m| m.ordering_key() <= key);
        self.messages.insert(at, message);
    }

    /// Add an optimistic message in `sending` state and return its local id.
    pub fn push_local(
        &mut self,
        sender_id: ActorId,
        sender_display_name: &str,
        body: &str,
        content_type: ContentType,
        sent_at: DateTime<Utc>,
    ) -> MessageId {
        let id = MessageId::local();
        self.insert_sorted(ChatMessage {
            id,
            conversation_id: self.conversation,
            sender_id,
            sender_display_name: sender_display_name.to_string(),
            body: body.to_string(),
            content_type,
            status: MessageStatus::Sending,
            sent_at,
            delivered_at: None,
            read_at: None,
        });
        id
    }

    /// Promote a local message to its acknowledged form.
    ///
    /// Keeps the local `sent_at`. If the realtime echo of the same message
    /// already arrived it is folded into the local one. When the local
    /// message is already gone (an echo of a sibling with the same body was
    /// folded into it) the acknowledged message is inserted as is.
    pub fn acknowledge(&mut self, local: MessageId, remote: &ChatMessage) -> bool {
        let Some(pos) = self.position(local) else {
            if self.position(remote.id).is_some() {
                return true;
            }
            let mut message = remote.clone();
            if message.status == MessageStatus::Sending {
                message.status = MessageStatus::Sent;
            }
            self.insert_sorted(message);
            self.apply_parked(remote.id);
            return true;
        };
        let mut message = self.messages.remove(pos);

        if let Some(echo) = self.position(remote.id) {
            let echo = self.messages.remove(echo);
            if message.status.can_advance_to(echo.status) {
                message.status = echo.status;
            }
            message.delivered_at = echo.delivered_at;
            message.read_at = echo.read_at;
        }

        message.id = remote.id;
        if message.status == MessageStatus::Sending {
            message.status = MessageStatus::Sent;
        }
        if message.sender_display_name.is_empty() {
            message.sender_display_name = remote.sender_display_name.clone();
        }
        self.insert_sorted(message);
        self.apply_parked(remote.id);
        true
    }

    /// Mark a local message as failed. Only `sending` messages can fail.
    pub fn fail(&mut self, local: MessageId) -> bool {
        match self.position(local) {
            Some(pos) if self.messages[pos].status.can_advance_to(MessageStatus::Failed) => {
                self.messages[pos].status = MessageStatus::Failed;
                true
            }
            _ => false,
        }
    }

    /// Put a failed message back into `sending` for another attempt and
    /// return a copy of it. The typed content is never discarded.
    pub fn retry(&mut self, local: MessageId) -> Option<ChatMessage> {
        let pos = self.position(local)?;
        let message = &mut self.messages[pos];
        if message.status != MessageStatus::Failed {
            return None;
        }
        message.status = MessageStatus::Sending;
        Some(message.clone())
    }

    /// Merge a message from history or from the realtime channel.
    ///
    /// Returns `true` if the timeline changed.
    pub fn upsert(&mut self, incoming: ChatMessage) -> bool {
        if incoming.conversation_id != self.conversation {
            return false;
        }

        if let Some(pos) = self.position(incoming.id) {
            let existing = &mut self.messages[pos];
            if existing.status.can_advance_to(incoming.status) {
                existing.status = incoming.status;
                existing.delivered_at = incoming.delivered_at.or(existing.delivered_at);
                existing.read_at = incoming.read_at.or(existing.read_at);
                return true;
            }
            return false;
        }

        // Echo of our own optimistic message arriving before the ack; with
        // several identical pending bodies the closest `sent_at` wins.
        let pending = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| {
                m.status == MessageStatus::Sending
                    && m.sender_id == incoming.sender_id
                    && m.body == incoming.body
            })
            .min_by_key(|(_, m)| (m.sent_at - incoming.sent_at).num_milliseconds().abs())
            .map(|(pos, _)| pos);
        if let Some(pos) = pending {
            let local = self.messages[pos].id;
            return self.acknowledge(local, &incoming);
        }

        let id = incoming.id;
        self.insert_sorted(incoming);
        if let MessageId::Remote(remote) = id {
            self.apply_parked_remote(remote);
        }
        true
    }

    /// Apply a delivery/read receipt; receipts for unknown messages are
    /// parked until the message arrives.
    pub fn apply_status(&mut self, update: &MessageStatusUpdate) -> bool {
        if update.conversation_id != self.conversation {
            return false;
        }
        let id = MessageId::Remote(update.message_id);
        let Some(pos) = self.position(id) else {
            let keep = self
                .parked
                .get(&update.message_id)
                .map_or(true, |parked| parked.status.can_advance_to(update.status));
            if keep {
                self.parked.insert(update.message_id, update.clone());
            }
            return false;
        };

        let message = &mut self.messages[pos];
        if !message.status.can_advance_to(update.status) {
            return false;
        }
        message.status = update.status;
        match update.status {
            MessageStatus::Delivered => message.delivered_at = Some(update.at),
            MessageStatus::Read => {
                message.read_at = Some(update.at);
                message.delivered_at.get_or_insert(update.at);
            }
            _ => {}
        }
        true
    }

    /// Replace the content with a history page, keeping pending local
    /// messages.
    pub fn replace_history(&mut self, history: Vec<ChatMessage>) {
        self.messages.retain(|m| m.id.is_local());
        for message in history {
            self.upsert(message);
        }
    }

    fn apply_parked(&mut self, id: MessageId) {
        if let MessageId::Remote(remote) = id {
            self.apply_parked_remote(remote);
        }
    }

    fn apply_parked_remote(&mut self, remote: u64) {
        if let Some(update) = self.parked.remove(&remote) {
            self.apply_status(&update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_770_000_000 + secs, 0).unwrap()
    }

    fn remote(id: u64, sender: u64, body: &str, sent_at: DateTime<Utc>) -> ChatMessage {
        ChatMessage {
            id: MessageId::Remote(id),
            conversation_id: ConversationId(42),
            sender_id: ActorId(sender),
            sender_display_name: String::new(),
            body: body.into(),
            content_type: ContentType::Text,
            status: MessageStatus::Sent,
            sent_at,
            delivered_at: None,
            read_at: None,
        }
    }

    fn bodies(timeline: &MessageTimeline) -> Vec<&str> {
        timeline.messages().iter().map(|m| m.body.as_str()).collect()
    }

    #[test]
    fn test_out_of_order_arrivals_are_sorted() {
        let mut timeline = MessageTimeline::new(ConversationId(42));
        timeline.upsert(remote(3, 9, "third", at(30)));
        timeline.upsert(remote(1, 9, "first", at(10)));
        timeline.upsert(remote(2, 9, "second", at(20)));
        // Same timestamp: id breaks the tie.
        timeline.upsert(remote(5, 9, "tie-b", at(20)));
        timeline.upsert(remote(4, 9, "tie-a", at(20)));

        assert_eq!(bodies(&timeline), vec!["first", "second", "tie-a", "tie-b", "third"]);
    }

    #[test]
    fn test_ack_preserves_sent_at() {
        let mut timeline = MessageTimeline::new(ConversationId(42));
        let created = at(0);
        let local = timeline.push_local(ActorId(1), "A", "Salam", ContentType::Text, created);
        assert_eq!(timeline.get(local).unwrap().status, MessageStatus::Sending);

        let ack = remote(77, 1, "Salam", created + Duration::seconds(40));
        assert!(timeline.acknowledge(local, &ack));

        let message = timeline.get(MessageId::Remote(77)).unwrap();
        assert_eq!(message.status, MessageStatus::Sent);
        assert_eq!(message.sent_at, created);
        assert!(timeline.get(local).is_none());
    }

    #[test]
    fn test_echo_before_ack_is_folded() {
        let mut timeline = MessageTimeline::new(ConversationId(42));
        let local = timeline.push_local(ActorId(1), "A", "Salam", ContentType::Text, at(0));
        timeline.upsert(remote(77, 1, "Salam", at(2)));
        assert_eq!(timeline.len(), 1);

        assert!(timeline.acknowledge(local, &remote(77, 1, "Salam", at(2))));
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.messages()[0].sent_at, at(0));
    }

    #[test]
    fn test_identical_pending_bodies_survive_echo_before_ack() {
        let mut timeline = MessageTimeline::new(ConversationId(42));
        let first = timeline.push_local(ActorId(1), "A", "ok", ContentType::Text, at(0));
        let second = timeline.push_local(ActorId(1), "A", "ok", ContentType::Text, at(0));

        // The second message's echo lands first and is folded into `first`.
        timeline.upsert(remote(78, 1, "ok", at(0)));
        assert!(timeline.acknowledge(first, &remote(77, 1, "ok", at(0))));
        assert!(timeline.acknowledge(second, &remote(78, 1, "ok", at(0))));

        let ids: Vec<MessageId> = timeline.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![MessageId::Remote(77), MessageId::Remote(78)]);
        assert!(timeline
            .messages()
            .iter()
            .all(|m| m.status == MessageStatus::Sent));
    }

    #[test]
    fn test_echo_matches_nearest_pending_message() {
        let mut timeline = MessageTimeline::new(ConversationId(42));
        let early = timeline.push_local(ActorId(1), "A", "ok", ContentType::Text, at(0));
        let late = timeline.push_local(ActorId(1), "A", "ok", ContentType::Text, at(30));

        timeline.upsert(remote(78, 1, "ok", at(31)));
        assert_eq!(timeline.get(early).unwrap().status, MessageStatus::Sending);
        assert!(timeline.get(late).is_none());
        assert_eq!(timeline.get(MessageId::Remote(78)).unwrap().sent_at, at(30));

        assert!(timeline.acknowledge(early, &remote(77, 1, "ok", at(1))));
        assert_eq!(timeline.len(), 2);
    }

    #[test]
    fn test_status_receipts_are_monotonic_and_parked() {
        let mut timeline = MessageTimeline::new(ConversationId(42));
        let read = MessageStatusUpdate {
            conversation_id: ConversationId(42),
            message_id: 8,
            status: MessageStatus::Read,
            user_id: Some(ActorId(9)),
            at: at(50),
        };
        // Receipt arrives before the message itself.
        assert!(!timeline.apply_status(&read));
        timeline.upsert(remote(8, 1, "hi", at(10)));
        assert_eq!(timeline.messages()[0].status, MessageStatus::Read);

        let delivered = MessageStatusUpdate {
            status: MessageStatus::Delivered,
            ..read
        };
        assert!(!timeline.apply_status(&delivered));
        assert_eq!(timeline.messages()[0].status, MessageStatus::Read);
    }

    #[test]
    fn test_failed_send_can_be_retried() {
        let mut timeline = MessageTimeline::new(ConversationId(42));
        let local = timeline.push_local(ActorId(1), "A", "draft", ContentType::Text, at(0));
        assert!(timeline.fail(local));
        assert!(!timeline.fail(local));

        let again = timeline.retry(local).unwrap();
        assert_eq!(again.body, "draft");
        assert_eq!(timeline.get(local).unwrap().status, MessageStatus::Sending);
        assert!(timeline.retry(local).is_none());
    }

    #[test]
    fn test_history_keeps_pending_locals() {
        let mut timeline = MessageTimeline::new(ConversationId(42));
        timeline.upsert(remote(1, 9, "old", at(0)));
        timeline.push_local(ActorId(1), "A", "pending", ContentType::Text, at(100));
        timeline.replace_history(vec![remote(2, 9, "fresh", at(5))]);

        assert_eq!(bodies(&timeline), vec!["fresh", "pending"]);
    }
}
