use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use sokoni_types::models::{Conversation, Profile};

use crate::gateway::Gateway;

/// Last-message line shown under a conversation in the list.
#[derive(Debug, Clone, PartialEq)]
pub enum Preview {
    Empty,
    Message {
        content: String,
        sender_id: Uuid,
        at: DateTime<Utc>,
    },
    /// The latest message could not be loaded.
    Unavailable,
}

impl Preview {
    pub fn text(&self) -> &str {
        match self {
            Self::Empty => "No messages yet",
            Self::Message { content, .. } => content,
            Self::Unavailable => "Error loading messages",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnhancedConversation {
    pub conversation: Conversation,
    pub other_user: Profile,
    pub preview: Preview,
    pub unread_count: u64,
}

impl EnhancedConversation {
    pub fn id(&self) -> Uuid {
        self.conversation.id
    }
}

/// Resolve the other participant, latest message and unread count of one
/// conversation. Each lookup degrades on its own; this never fails.
pub(crate) async fn enrich(gateway: &dyn Gateway, me: Uuid, conversation: Conversation) -> EnhancedConversation {
    let other_id = conversation.other_participant(me);

    let profile = async {
        match other_id {
            Some(id) => gateway.profile(id).await.map(|p| p.unwrap_or_else(|| Profile::unknown(id))),
            None => Ok(Profile::unknown(Uuid::nil())),
        }
    };
    let (profile, latest, unread) = futures_util::join!(
        profile,
        gateway.latest_message(conversation.id),
        gateway.unread_count(conversation.id, me),
    );

    let other_user = profile.unwrap_or_else(|e| {
        warn!("Conversation {}: other participant lookup failed: {}", conversation.id, e);
        Profile::unknown(other_id.unwrap_or_default())
    });

    let preview = match latest {
        Ok(Some(m)) => Preview::Message {
            content: m.content,
            sender_id: m.sender_id,
            at: m.created_at,
        },
        Ok(None) => Preview::Empty,
        Err(e) => {
            warn!("Conversation {}: latest message lookup failed: {}", conversation.id, e);
            Preview::Unavailable
        }
    };

    let unread_count = unread.unwrap_or_else(|e| {
        warn!("Conversation {}: unread count failed: {}", conversation.id, e);
        0
    });

    EnhancedConversation {
        conversation,
        other_user,
        preview,
        unread_count,
    }
}
