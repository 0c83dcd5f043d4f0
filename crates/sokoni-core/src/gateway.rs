//! # Gateway (port)
//!
//! Everything the controllers persist or read goes through this trait. The
//! production implementation speaks HTTP to `sokoni-server`; tests use an
//! in-memory fake.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use sokoni_types::api::{CreateReportRequest, NewContactSession, SendMessageRequest, SessionInsert};
use sokoni_types::events::MessageChange;
use sokoni_types::models::{ContactChannel, ContactSession, Conversation, Message, Profile, Product, Report};

use crate::error::GatewayResult;

/// Row-level CRUD and change feed over the marketplace collections.
#[async_trait]
pub trait Gateway: Send + Sync {
    // Profiles & products
    async fn profile(&self, id: Uuid) -> GatewayResult<Option<Profile>>;
    /// One request for many profiles; unknown ids are left out.
    async fn profiles(&self, ids: &[Uuid]) -> GatewayResult<Vec<Profile>>;
    async fn product(&self, id: Uuid) -> GatewayResult<Option<Product>>;

    // Contact sessions
    /// Newest session for the tuple with `expires_at > now`. Remote
    /// implementations may apply their own clock instead of `now`.
    async fn active_contact_session(
        &self,
        buyer_id: Uuid,
        product_id: Uuid,
        channel: ContactChannel,
        now: DateTime<Utc>,
    ) -> GatewayResult<Option<ContactSession>>;
    async fn insert_contact_session(
        &self,
        buyer_id: Uuid,
        session: NewContactSession,
    ) -> GatewayResult<SessionInsert>;
    async fn contact_sessions(&self, buyer_id: Uuid) -> GatewayResult<Vec<ContactSession>>;

    // Conversations
    /// Conversations `user_id` takes part in, newest `updated_at` first.
    async fn conversations(&self, user_id: Uuid) -> GatewayResult<Vec<Conversation>>;
    async fn get_or_create_conversation(
        &self,
        user_id: Uuid,
        other_user_id: Uuid,
        product_id: Option<Uuid>,
    ) -> GatewayResult<Conversation>;
    async fn touch_conversation(&self, conversation_id: Uuid) -> GatewayResult<()>;

    // Messages
    async fn latest_message(&self, conversation_id: Uuid) -> GatewayResult<Option<Message>>;
    /// Unread messages in the conversation not sent by `user_id`.
    async fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> GatewayResult<u64>;
    /// Whole thread, oldest first.
    async fn messages(&self, conversation_id: Uuid) -> GatewayResult<Vec<Message>>;
    async fn insert_message(
        &self,
        sender_id: Uuid,
        conversation_id: Uuid,
        request: SendMessageRequest,
    ) -> GatewayResult<Message>;
    /// Bulk flip of unread messages addressed to `receiver_id`. Returns how many changed.
    async fn mark_read(&self, conversation_id: Uuid, receiver_id: Uuid) -> GatewayResult<u64>;

    // Reports
    async fn insert_report(&self, reporter_id: Uuid, report: CreateReportRequest) -> GatewayResult<Report>;

    // Realtime
    /// Insert/update events on `messages` where `user_id` is sender or receiver.
    async fn subscribe(&self, user_id: Uuid) -> GatewayResult<ChangeFeed>;
}

/// A live subscription to message changes. Dropping it tears the
/// underlying connection down.
pub struct ChangeFeed {
    rx: mpsc::UnboundedReceiver<MessageChange>,
    task: Option<JoinHandle<()>>,
}

impl ChangeFeed {
    pub fn new(rx: mpsc::UnboundedReceiver<MessageChange>) -> Self {
        Self { rx, task: None }
    }

    /// Feed backed by a task that owns the transport; the task is aborted on drop.
    pub fn with_task(rx: mpsc::UnboundedReceiver<MessageChange>, task: JoinHandle<()>) -> Self {
        Self { rx, task: Some(task) }
    }

    /// Wait for the next change. `None` once the transport is gone.
    pub async fn next(&mut self) -> Option<MessageChange> {
        self.rx.recv().await
    }

    /// Next already-buffered change, without waiting.
    pub fn try_next(&mut self) -> Option<MessageChange> {
        self.rx.try_recv().ok()
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
