//! # Conversation synchronizer
//!
//! Keeps the signed-in user's conversation list and the open thread
//! consistent with the gateway. Loads and sends are split into begin /
//! complete halves so the network round-trip can run without holding the
//! synchronizer, and stale completions are dropped by generation.

mod conversations;
mod thread;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sokoni_types::api::{SendMessageRequest, default_message_type};
use sokoni_types::events::MessageChange;
use sokoni_types::models::{Conversation, Message, Profile};

use crate::context::SessionContext;
use crate::error::{GatewayError, GatewayResult, Notice};
use crate::gateway::{ChangeFeed, Gateway};

pub use conversations::{EnhancedConversation, Preview};
pub use thread::{DeliveryStatus, EnhancedMessage, MessageKey, Thread, delivery_status};

#[derive(Debug, Error)]
pub enum SendError {
    #[error("Message cannot be empty")]
    Empty,

    #[error("No conversation selected")]
    NoConversation,

    #[error("You are not a participant in this conversation")]
    NotParticipant,

    #[error("Failed to send message")]
    Gateway(#[source] GatewayError),
}

/// Identifies one message load. Only the newest ticket for a conversation
/// is allowed to write into the thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    pub conversation_id: Uuid,
    generation: u64,
}

/// Everything a thread load fetched from the gateway.
#[derive(Debug)]
pub struct ThreadFetch {
    messages: GatewayResult<Vec<Message>>,
    profiles: HashMap<Uuid, Profile>,
}

/// An optimistic message waiting for the gateway.
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub local_id: Uuid,
    pub conversation_id: Uuid,
    pub request: SendMessageRequest,
}

pub struct ConversationSync {
    gateway: Arc<dyn Gateway>,
    ctx: SessionContext,
    conversations: Vec<EnhancedConversation>,
    selected: Option<Conversation>,
    thread: Thread,
    generations: HashMap<Uuid, u64>,
    draft: String,
    notices: Vec<Notice>,
}

impl ConversationSync {
    pub fn new(gateway: Arc<dyn Gateway>, ctx: SessionContext) -> Self {
        Self {
            gateway,
            ctx,
            conversations: Vec::new(),
            selected: None,
            thread: Thread::default(),
            generations: HashMap::new(),
            draft: String::new(),
            notices: Vec::new(),
        }
    }

    // -- Read access --

    pub fn me(&self) -> Uuid {
        self.ctx.user_id
    }

    pub fn conversations(&self) -> &[EnhancedConversation] {
        &self.conversations
    }

    pub fn selected(&self) -> Option<&Conversation> {
        self.selected.as_ref()
    }

    pub fn messages(&self) -> impl Iterator<Item = &EnhancedMessage> + '_ {
        self.thread.iter()
    }

    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn total_unread(&self) -> u64 {
        self.conversations.iter().map(|c| c.unread_count).sum()
    }

    /// Hand over notices raised since the last call.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    // -- Realtime --

    pub async fn subscribe(&self) -> GatewayResult<ChangeFeed> {
        self.gateway.subscribe(self.ctx.user_id).await
    }

    // -- Conversation list --

    /// Reload the conversation list, newest activity first. A failure on one
    /// conversation only degrades that entry.
    pub async fn refresh_conversations(&mut self) -> GatewayResult<()> {
        let me = self.ctx.user_id;
        let rows = match self.gateway.conversations(me).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Failed to load conversations for {}: {}", me, e);
                self.notices.push(Notice::from_gateway(&e, "Failed to load conversations"));
                return Err(e);
            }
        };

        let gateway = self.gateway.as_ref();
        let enriched = join_all(rows.into_iter().map(|c| conversations::enrich(gateway, me, c))).await;

        // The open conversation was zeroed locally; keep it that way until
        // the read flag lands on the gateway.
        let open = self.selected.as_ref().map(|c| c.id);
        self.conversations = enriched
            .into_iter()
            .map(|mut c| {
                if Some(c.id()) == open {
                    c.unread_count = 0;
                }
                c
            })
            .collect();
        Ok(())
    }

    /// Start (or find) a conversation with another user and open it.
    pub async fn start_conversation(&mut self, other_user_id: Uuid, product_id: Option<Uuid>) -> GatewayResult<Uuid> {
        let conversation = self
            .gateway
            .get_or_create_conversation(self.ctx.user_id, other_user_id, product_id)
            .await
            .inspect_err(|e| self.notices.push(Notice::from_gateway(e, "Failed to start conversation")))?;
        let id = conversation.id;
        self.open_conversation(conversation).await;
        Ok(id)
    }

    // -- Thread loading --

    /// Select a conversation and load its thread.
    pub async fn open_conversation(&mut self, conversation: Conversation) -> bool {
        let ticket = self.begin_open(conversation);
        let fetch = Self::fetch_thread(self.gateway.as_ref(), self.ctx.user_id, ticket.conversation_id).await;
        self.complete_open(ticket, fetch)
    }

    /// Select `conversation`, clear the displayed thread and zero its unread
    /// count locally. The returned ticket must be passed to [`complete_open`].
    ///
    /// [`complete_open`]: Self::complete_open
    pub fn begin_open(&mut self, conversation: Conversation) -> LoadTicket {
        let generation = self.generations.entry(conversation.id).or_default();
        *generation += 1;
        let ticket = LoadTicket {
            conversation_id: conversation.id,
            generation: *generation,
        };

        self.thread.clear();
        if let Some(entry) = self.conversations.iter_mut().find(|c| c.id() == conversation.id) {
            entry.unread_count = 0;
        }
        self.selected = Some(conversation);
        ticket
    }

    /// Network half of a thread load: messages, one batched profile lookup,
    /// and the bulk read flag for messages addressed to `me`.
    pub async fn fetch_thread(gateway: &dyn Gateway, me: Uuid, conversation_id: Uuid) -> ThreadFetch {
        let mut messages = match gateway.messages(conversation_id).await {
            Ok(messages) => messages,
            Err(e) => {
                return ThreadFetch {
                    messages: Err(e),
                    profiles: HashMap::new(),
                };
            }
        };

        let ids: Vec<Uuid> = messages
            .iter()
            .flat_map(|m| [m.sender_id, m.receiver_id])
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let profiles = match gateway.profiles(&ids).await {
            Ok(profiles) => profiles.into_iter().map(|p| (p.id, p)).collect(),
            Err(e) => {
                warn!("Profile lookup for conversation {} failed: {}", conversation_id, e);
                HashMap::new()
            }
        };

        match gateway.mark_read(conversation_id, me).await {
            Ok(updated) => {
                if updated > 0 {
                    debug!("Marked {} messages read in {}", updated, conversation_id);
                }
                for m in messages.iter_mut().filter(|m| m.receiver_id == me) {
                    m.is_read = true;
                }
            }
            Err(e) => warn!("Mark-read for conversation {} failed: {}", conversation_id, e),
        }

        ThreadFetch {
            messages: Ok(messages),
            profiles,
        }
    }

    /// Apply a finished load. Returns false if the load was superseded by a
    /// newer one or the selection moved on, in which case nothing changes.
    pub fn complete_open(&mut self, ticket: LoadTicket, fetch: ThreadFetch) -> bool {
        let current = self.generations.get(&ticket.conversation_id).copied();
        let still_selected = self.selected.as_ref().map(|c| c.id) == Some(ticket.conversation_id);
        if current != Some(ticket.generation) || !still_selected {
            debug!(
                "Discarding stale load of {} (generation {})",
                ticket.conversation_id, ticket.generation
            );
            return false;
        }

        let messages = match fetch.messages {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Failed to load messages for {}: {}", ticket.conversation_id, e);
                self.notices.push(Notice::from_gateway(&e, "Failed to load messages"));
                return true;
            }
        };

        // Sends and realtime inserts may have landed while the fetch was in
        // flight. They stay, after the fetched history, in their current order.
        let me = self.ctx.user_id;
        let mut earlier: HashMap<MessageKey, EnhancedMessage> = HashMap::new();
        let mut arrived = Vec::new();
        for shown in std::mem::take(&mut self.thread).into_messages() {
            arrived.push(shown.key);
            earlier.insert(shown.key, shown);
        }

        for message in messages {
            let key = MessageKey::Confirmed(message.id);
            let sender = fetch.profiles.get(&message.sender_id).cloned();
            let mut entry = EnhancedMessage::confirmed(message, me, sender);
            if let Some(shown) = earlier.remove(&key) {
                if shown.is_read && !entry.is_read {
                    entry.is_read = true;
                    entry.status = DeliveryStatus::Read;
                }
                if entry.sender.is_none() {
                    entry.sender = shown.sender;
                }
            }
            self.thread.push(entry);
        }
        for key in arrived {
            if let Some(shown) = earlier.remove(&key) {
                self.thread.push(shown);
            }
        }
        true
    }

    // -- Sending --

    /// Send the current draft optimistically.
    pub async fn send_draft(&mut self) -> Result<Uuid, SendError> {
        let pending = self.begin_send()?;
        let result = Self::deliver(self.gateway.as_ref(), self.ctx.user_id, &pending).await;
        self.complete_send(pending, result).await
    }

    /// Validate the draft, show it as `Sending` and clear the input.
    pub fn begin_send(&mut self) -> Result<PendingSend, SendError> {
        let content = self.draft.trim().to_string();
        if content.is_empty() {
            self.notices.push(Notice::warning(SendError::Empty.to_string()));
            return Err(SendError::Empty);
        }

        let me = self.ctx.user_id;
        let conversation = self.selected.as_ref().ok_or(SendError::NoConversation)?;
        let receiver_id = conversation.other_participant(me).ok_or(SendError::NotParticipant)?;

        let local_id = Uuid::new_v4();
        let now = Utc::now();
        let pending = PendingSend {
            local_id,
            conversation_id: conversation.id,
            request: SendMessageRequest {
                receiver_id,
                content: content.clone(),
                message_type: default_message_type(),
                product_id: conversation.product_id,
            },
        };

        self.thread.push(EnhancedMessage {
            key: MessageKey::Pending(local_id),
            conversation_id: conversation.id,
            sender_id: me,
            receiver_id,
            content,
            message_type: default_message_type(),
            is_read: false,
            product_id: conversation.product_id,
            created_at: now,
            updated_at: now,
            is_own: true,
            status: DeliveryStatus::Sending,
            sender: None,
        });
        self.draft.clear();
        Ok(pending)
    }

    pub async fn deliver(gateway: &dyn Gateway, me: Uuid, pending: &PendingSend) -> GatewayResult<Message> {
        gateway
            .insert_message(me, pending.conversation_id, pending.request.clone())
            .await
    }

    /// Settle an optimistic message. On success the pending entry becomes the
    /// confirmed one; on failure it is removed and the draft stays empty.
    pub async fn complete_send(
        &mut self,
        pending: PendingSend,
        result: GatewayResult<Message>,
    ) -> Result<Uuid, SendError> {
        let local = MessageKey::Pending(pending.local_id);
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                warn!("Send to conversation {} failed: {}", pending.conversation_id, e);
                self.thread.remove(&local);
                self.notices.push(Notice::from_gateway(&e, "Failed to send message"));
                return Err(SendError::Gateway(e));
            }
        };

        let id = message.id;
        let confirmed = MessageKey::Confirmed(id);
        let me = self.ctx.user_id;
        if self.thread.contains(&confirmed) {
            // The realtime insert got here first.
            self.thread.remove(&local);
        } else if self.thread.contains(&local) {
            self.thread.replace(&local, EnhancedMessage::confirmed(message, me, None));
        } else if self.selected.as_ref().map(|c| c.id) == Some(pending.conversation_id) {
            self.thread.push(EnhancedMessage::confirmed(message, me, None));
        }

        if let Err(e) = self.gateway.touch_conversation(pending.conversation_id).await {
            warn!("Failed to bump conversation {}: {}", pending.conversation_id, e);
        }
        if let Err(e) = self.refresh_conversations().await {
            debug!("List refresh after send failed: {}", e);
        }

        info!("Message {} sent to conversation {}", id, pending.conversation_id);
        Ok(id)
    }

    // -- Realtime merge --

    /// Merge one pushed change. Inserts for the open conversation are
    /// appended at the tail unless already shown; the list is always refreshed
    /// after an insert.
    pub async fn apply_change(&mut self, change: MessageChange) {
        let me = self.ctx.user_id;
        match change {
            MessageChange::Insert(message) => {
                let open = self.selected.as_ref().map(|c| c.id) == Some(message.conversation_id);
                let key = MessageKey::Confirmed(message.id);
                if open && !self.thread.contains(&key) {
                    let sender = match self.gateway.profile(message.sender_id).await {
                        Ok(profile) => profile,
                        Err(e) => {
                            warn!("Sender lookup for message {} failed: {}", message.id, e);
                            None
                        }
                    };
                    self.thread.push(EnhancedMessage::confirmed(message, me, sender));
                }
                if let Err(e) = self.refresh_conversations().await {
                    debug!("List refresh after realtime insert failed: {}", e);
                }
            }
            MessageChange::Update(message) => {
                if let Some(shown) = self.thread.get_mut(&MessageKey::Confirmed(message.id)) {
                    shown.merge(message, me);
                }
            }
        }
    }

    /// Apply every change already buffered on the feed. Returns how many were applied.
    pub async fn drain(&mut self, feed: &mut ChangeFeed) -> usize {
        let mut applied = 0;
        while let Some(change) = feed.try_next() {
            self.apply_change(change).await;
            applied += 1;
        }
        applied
    }
}

#[cfg(test)]
mod tests;
