use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use sokoni_types::models::{Message, Profile};

/// Identity of a displayed message. A pending message only has the id the
/// client made up; a confirmed one carries the id the gateway assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Pending(Uuid),
    Confirmed(Uuid),
}

/// Client-side display state, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Delivered,
    Read,
}

pub fn delivery_status(message: &Message, me: Uuid) -> DeliveryStatus {
    status_of(message.is_read, message.sender_id, me)
}

fn status_of(is_read: bool, sender_id: Uuid, me: Uuid) -> DeliveryStatus {
    if is_read {
        DeliveryStatus::Read
    } else if sender_id == me {
        DeliveryStatus::Sent
    } else {
        DeliveryStatus::Delivered
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnhancedMessage {
    pub key: MessageKey,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub message_type: String,
    pub is_read: bool,
    pub product_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_own: bool,
    pub status: DeliveryStatus,
    pub sender: Option<Profile>,
}

impl EnhancedMessage {
    pub fn confirmed(message: Message, me: Uuid, sender: Option<Profile>) -> Self {
        let status = delivery_status(&message, me);
        Self {
            key: MessageKey::Confirmed(message.id),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            content: message.content,
            message_type: message.message_type,
            is_read: message.is_read,
            product_id: message.product_id,
            created_at: message.created_at,
            updated_at: message.updated_at,
            is_own: message.sender_id == me,
            status,
            sender,
        }
    }

    /// Fold a remote update into this message. Read state never goes back to unread.
    pub fn merge(&mut self, update: Message, me: Uuid) {
        self.is_read |= update.is_read;
        self.content = update.content;
        self.message_type = update.message_type;
        self.updated_at = update.updated_at;
        self.status = status_of(self.is_read, self.sender_id, me);
    }
}

/// Messages of the open conversation in display order, keyed for O(1)
/// duplicate checks.
#[derive(Debug, Default)]
pub struct Thread {
    order: Vec<MessageKey>,
    entries: HashMap<MessageKey, EnhancedMessage>,
}

impl Thread {
    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, key: &MessageKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &MessageKey) -> Option<&EnhancedMessage> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &MessageKey) -> Option<&mut EnhancedMessage> {
        self.entries.get_mut(key)
    }

    /// Append at the tail. Returns false (and changes nothing) if the key is already present.
    pub fn push(&mut self, message: EnhancedMessage) -> bool {
        if self.entries.contains_key(&message.key) {
            return false;
        }
        self.order.push(message.key);
        self.entries.insert(message.key, message);
        true
    }

    pub fn remove(&mut self, key: &MessageKey) -> Option<EnhancedMessage> {
        let removed = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(removed)
    }

    /// Swap the entry at `old` for `message`, keeping its position.
    /// Returns false if `old` is not in the thread.
    pub fn replace(&mut self, old: &MessageKey, message: EnhancedMessage) -> bool {
        let Some(slot) = self.order.iter().position(|k| k == old) else {
            return false;
        };
        self.entries.remove(old);
        self.order[slot] = message.key;
        self.entries.insert(message.key, message);
        true
    }

    /// Consume the thread, yielding entries in display order.
    pub fn into_messages(self) -> impl Iterator<Item = EnhancedMessage> {
        let mut entries = self.entries;
        self.order.into_iter().filter_map(move |k| entries.remove(&k))
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnhancedMessage> + '_ {
        self.order.iter().filter_map(|k| self.entries.get(k))
    }
}
