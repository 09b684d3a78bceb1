//! Conversation list with unread counters.

use std::collections::BTreeMap;

use umrah_shared::models::{ChatMessage, ChatNotification, ChatRoom};
use umrah_shared::types::{ActorId, ConversationId};

#[derive(Debug, Clone, Default)]
pub struct RoomDirectory {
    rooms: BTreeMap<ConversationId, ChatRoom>,
    open: Option<ConversationId>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list with what `GET /chats` returned. The open
    /// conversation keeps an unread count of zero.
    pub fn replace_all(&mut self, rooms: Vec<ChatRoom>) {
        self.rooms = rooms.into_iter().map(|room| (room.id, room)).collect();
        if let Some(open) = self.open {
            if let Some(room) = self.rooms.get_mut(&open) {
                room.unread_count = 0;
            }
        }
    }

    pub fn set_open(&mut self, id: Option<ConversationId>) {
        self.open = id;
        if let Some(id) = id {
            self.mark_read(id);
        }
    }

    pub fn open(&self) -> Option<ConversationId> {
        self.open
    }

    /// Record an incoming message. Unknown conversations are ignored:
    /// rooms are only ever created by the backend.
    pub fn apply_message(&mut self, message: &ChatMessage, own_id: Option<ActorId>) -> bool {
        let open = self.open;
        let Some(room) = self.rooms.get_mut(&message.conversation_id) else {
            return false;
        };
        let newer = room
            .last_message
            .as_ref()
            .map_or(true, |last| last.ordering_key() <= message.ordering_key());
        if newer {
            room.last_message = Some(message.clone());
        }
        let own = own_id == Some(message.sender_id);
        if !own && open != Some(message.conversation_id) {
            room.unread_count = room.unread_count.saturating_add(1);
        }
        true
    }

    /// Count a notification for a conversation that is not open.
    pub fn apply_notification(&mut self, notification: &ChatNotification) -> bool {
        if notification.is_read || self.open == Some(notification.conversation_id) {
            return false;
        }
        match self.rooms.get_mut(&notification.conversation_id) {
            Some(room) => {
                room.unread_count = room.unread_count.saturating_add(1);
                true
            }
            None => false,
        }
    }

    pub fn mark_read(&mut self, id: ConversationId) -> bool {
        match self.rooms.get_mut(&id) {
            Some(room) if room.unread_count > 0 => {
                room.unread_count = 0;
                true
            }
            _ => false,
        }
    }

    pub fn set_archived(&mut self, id: ConversationId, archived: bool) -> bool {
        match self.rooms.get_mut(&id) {
            Some(room) => {
                room.is_archived = archived;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: ConversationId) -> Option<&ChatRoom> {
        self.rooms.get(&id)
    }

    /// Non-archived rooms, most recent activity first.
    pub fn rooms(&self) -> Vec<ChatRoom> {
        let mut rooms: Vec<ChatRoom> = self
            .rooms
            .values()
            .filter(|room| !room.is_archived)
            .cloned()
            .collect();
        rooms.sort_by(|a, b| {
            let a_key = a.last_message.as_ref().map(|m| m.ordering_key());
            let b_key = b.last_message.as_ref().map(|m| m.ordering_key());
            b_key.cmp(&a_key).then(a.id.cmp(&b.id))
        });
        rooms
    }

    pub fn archived(&self) -> Vec<ChatRoom> {
        self.rooms
            .values()
            .filter(|room| room.is_archived)
            .cloned()
            .collect()
    }

    pub fn total_unread(&self) -> u32 {
        self.rooms
            .values()
            .filter(|room| !room.is_archived)
            .map(|room| room.unread_count)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;
    use umrah_shared::models::{ContentType, MessageStatus, RoomKind};
    use umrah_shared::types::{MessageId, NotificationId};

    fn room(id: u64) -> ChatRoom {
        ChatRoom {
            id: ConversationId(id),
            kind: RoomKind::Private,
            participants: BTreeSet::new(),
            last_message: None,
            unread_count: 0,
            is_archived: false,
            is_active: true,
        }
    }

    fn message(conversation: u64, sender: u64, secs: i64) -> ChatMessage {
        ChatMessage {
            id: MessageId::Remote(secs as u64),
            conversation_id: ConversationId(conversation),
            sender_id: ActorId(sender),
            sender_display_name: String::new(),
            body: "hi".into(),
            content_type: ContentType::Text,
            status: MessageStatus::Sent,
            sent_at: Utc.timestamp_opt(1_770_000_000 + secs, 0).unwrap(),
            delivered_at: None,
            read_at: None,
        }
    }

    #[test]
    fn test_unread_bumps_unless_open_or_own() {
        let mut directory = RoomDirectory::new();
        directory.replace_all(vec![room(1), room(2)]);
        directory.set_open(Some(ConversationId(2)));

        assert!(directory.apply_message(&message(1, 9, 1), Some(ActorId(5))));
        assert!(directory.apply_message(&message(1, 5, 2), Some(ActorId(5))));
        assert!(directory.apply_message(&message(2, 9, 3), Some(ActorId(5))));
        assert!(!directory.apply_message(&message(3, 9, 4), Some(ActorId(5))));

        assert_eq!(directory.get(ConversationId(1)).unwrap().unread_count, 1);
        assert_eq!(directory.get(ConversationId(2)).unwrap().unread_count, 0);
        assert_eq!(directory.total_unread(), 1);
    }

    #[test]
    fn test_ordering_and_archive() {
        let mut directory = RoomDirectory::new();
        directory.replace_all(vec![room(1), room(2), room(3)]);
        directory.apply_message(&message(1, 9, 10), None);
        directory.apply_message(&message(2, 9, 20), None);
        directory.set_archived(ConversationId(3), true);

        let ids: Vec<u64> = directory.rooms().iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(directory.archived().len(), 1);

        assert!(directory.mark_read(ConversationId(1)));
        assert!(!directory.mark_read(ConversationId(1)));
    }

    #[test]
    fn test_notifications_count_for_closed_rooms() {
        let mut directory = RoomDirectory::new();
        directory.replace_all(vec![room(4)]);
        let notification = ChatNotification {
            id: NotificationId::from(1),
            conversation_id: ConversationId(4),
            sender_id: ActorId(9),
            sender_display_name: "Omar".into(),
            message_preview: "hi".into(),
            created_at: Utc::now(),
            is_read: false,
        };
        assert!(directory.apply_notification(&notification));
        directory.set_open(Some(ConversationId(4)));
        assert!(!directory.apply_notification(&notification));
        assert_eq!(directory.get(ConversationId(4)).unwrap().unread_count, 0);
    }
}
