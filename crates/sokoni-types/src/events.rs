use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events sent over the realtime gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A message row was inserted
    MessageInsert { message: Message },

    /// A message row changed (read receipt)
    MessageUpdate { message: Message },
}

impl GatewayEvent {
    /// Row-level change carried by this event, if any.
    pub fn into_change(self) -> Option<MessageChange> {
        match self {
            Self::MessageInsert { message } => Some(MessageChange::Insert(message)),
            Self::MessageUpdate { message } => Some(MessageChange::Update(message)),
            Self::Ready { .. } => None,
        }
    }

    /// Users this event must be delivered to. Message changes go to both
    /// participants and nobody else.
    pub fn recipients(&self) -> Vec<Uuid> {
        match self {
            Self::MessageInsert { message } | Self::MessageUpdate { message } => {
                if message.sender_id == message.receiver_id {
                    vec![message.sender_id]
                } else {
                    vec![message.sender_id, message.receiver_id]
                }
            }
            Self::Ready { user_id, .. } => vec![*user_id],
        }
    }
}

/// Commands sent FROM client TO server over the realtime gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },
}

/// A change to the `messages` collection as seen by a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageChange {
    Insert(Message),
    Update(Message),
}

impl MessageChange {
    pub fn message(&self) -> &Message {
        match self {
            Self::Insert(m) | Self::Update(m) => m,
        }
    }
}
