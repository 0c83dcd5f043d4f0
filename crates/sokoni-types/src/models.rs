use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Private channel a seller can be reached on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactChannel {
    Phone,
    Whatsapp,
}

impl ContactChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Whatsapp => "whatsapp",
        }
    }
}

impl fmt::Display for ContactChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContactChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "phone" => Ok(Self::Phone),
            "whatsapp" => Ok(Self::Whatsapp),
            other => Err(format!("unknown contact channel '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub whatsapp: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    /// Name shown next to messages and in the conversation list.
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.username)
    }

    /// Stand-in used when the other participant of a conversation cannot be resolved.
    pub fn unknown(id: Uuid) -> Self {
        Self {
            id,
            username: "unknown".into(),
            full_name: Some("Unknown User".into()),
            phone: None,
            whatsapp: None,
            avatar_url: None,
            created_at: DateTime::<Utc>::default(),
        }
    }

    pub fn contact(&self, channel: ContactChannel) -> Option<&str> {
        let value = match channel {
            ContactChannel::Phone => self.phone.as_deref(),
            ContactChannel::Whatsapp => self.whatsapp.as_deref(),
        };
        value.filter(|v| !v.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub title: String,
    pub price: i64,
    pub phone: Option<String>,
    pub whatsapp: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn contact(&self, channel: ContactChannel) -> Option<&str> {
        let value = match channel {
            ContactChannel::Phone => self.phone.as_deref(),
            ContactChannel::Whatsapp => self.whatsapp.as_deref(),
        };
        value.filter(|v| !v.trim().is_empty())
    }
}

/// A buyer's time-boxed permission to see a seller's contact value.
/// Rows are append-only; an expired session is simply ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactSession {
    pub id: Uuid,
    pub product_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub contact_type: ContactChannel,
    pub revealed_contact: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_verified: bool,
    pub verification_method: String,
}

impl ContactSession {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    pub product_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.user1_id == user_id || self.user2_id == user_id
    }

    /// The participant that is not `user_id`, or `None` if `user_id` is not a participant.
    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        if self.user1_id == user_id {
            Some(self.user2_id)
        } else if self.user2_id == user_id {
            Some(self.user1_id)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub message_type: String,
    pub is_read: bool,
    pub product_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub reporter_id: Uuid,
    pub product_id: Option<Uuid>,
    pub reported_user_id: Option<Uuid>,
    pub reason: String,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}
