//! In-memory gateway with failure injection, for controller tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use sokoni_types::api::{CreateReportRequest, ErrorCode, NewContactSession, SendMessageRequest, SessionInsert};
use sokoni_types::events::MessageChange;
use sokoni_types::models::{ContactChannel, ContactSession, Conversation, Message, Profile, Product, Report};

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{ChangeFeed, Gateway};

#[derive(Default)]
struct State {
    profiles: HashMap<Uuid, Profile>,
    products: HashMap<Uuid, Product>,
    sessions: Vec<ContactSession>,
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    reports: Vec<Report>,
    feeds: Vec<(Uuid, mpsc::UnboundedSender<MessageChange>)>,
    calls: HashMap<&'static str, usize>,
    failing: HashSet<&'static str>,
    failing_profiles: HashSet<Uuid>,
    tick: i64,
}

pub struct FakeGateway {
    state: Mutex<State>,
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 8, 0, 0).unwrap()
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake gateway lock poisoned")
    }

    fn enter(&self, op: &'static str) -> GatewayResult<std::sync::MutexGuard<'_, State>> {
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        if state.failing.contains(op) {
            return Err(GatewayError::unavailable(format!("{} failed", op)));
        }
        Ok(state)
    }

    pub fn add_profile(&self, username: &str, phone: Option<&str>, whatsapp: Option<&str>) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().profiles.insert(
            id,
            Profile {
                id,
                username: username.into(),
                full_name: Some(format!("{} Mwangi", username)),
                phone: phone.map(str::to_string),
                whatsapp: whatsapp.map(str::to_string),
                avatar_url: None,
                created_at: base_time(),
            },
        );
        id
    }

    pub fn add_product(&self, seller_id: Uuid, phone: Option<&str>, whatsapp: Option<&str>) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().products.insert(
            id,
            Product {
                id,
                seller_id,
                title: "Samsung A14".into(),
                price: 15000,
                phone: phone.map(str::to_string),
                whatsapp: whatsapp.map(str::to_string),
                created_at: base_time(),
            },
        );
        id
    }

    pub fn add_conversation(&self, a: Uuid, b: Uuid, product_id: Option<Uuid>) -> Conversation {
        let mut state = self.lock();
        let at = next_tick(&mut state);
        let conversation = Conversation {
            id: Uuid::new_v4(),
            user1_id: a,
            user2_id: b,
            product_id,
            created_at: at,
            updated_at: at,
        };
        state.conversations.push(conversation.clone());
        conversation
    }

    /// Seed a message without notifying subscribers.
    pub fn add_message(&self, conversation: &Conversation, sender_id: Uuid, content: &str) -> Message {
        let mut state = self.lock();
        let message = build_message(&mut state, conversation, sender_id, content, None);
        state.messages.push(message.clone());
        message
    }

    pub fn fail(&self, op: &'static str) {
        self.lock().failing.insert(op);
    }

    pub fn recover(&self, op: &'static str) {
        self.lock().failing.remove(op);
    }

    pub fn fail_profile(&self, id: Uuid) {
        self.lock().failing_profiles.insert(id);
    }

    pub fn calls(&self, op: &str) -> usize {
        self.lock().calls.get(op).copied().unwrap_or(0)
    }

    pub fn session_rows(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn stored_messages(&self, conversation_id: Uuid) -> Vec<Message> {
        self.lock()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.lock().reports.clone()
    }

    /// Push a change to every subscriber of the message's participants.
    pub fn emit(&self, change: MessageChange) {
        let state = self.lock();
        emit_locked(&state, change);
    }
}

fn next_tick(state: &mut State) -> DateTime<Utc> {
    state.tick += 1;
    base_time() + Duration::seconds(state.tick)
}

fn build_message(
    state: &mut State,
    conversation: &Conversation,
    sender_id: Uuid,
    content: &str,
    product_id: Option<Uuid>,
) -> Message {
    let at = next_tick(state);
    let receiver_id = conversation.other_participant(sender_id).unwrap_or(sender_id);
    Message {
        id: Uuid::new_v4(),
        conversation_id: conversation.id,
        sender_id,
        receiver_id,
        content: content.into(),
        message_type: "text".into(),
        is_read: false,
        product_id: product_id.or(conversation.product_id),
        created_at: at,
        updated_at: at,
    }
}

fn emit_locked(state: &State, change: MessageChange) {
    let message = change.message();
    for (user_id, tx) in &state.feeds {
        if *user_id == message.sender_id || *user_id == message.receiver_id {
            let _ = tx.send(change.clone());
        }
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn profile(&self, id: Uuid) -> GatewayResult<Option<Profile>> {
        let state = self.enter("profile")?;
        if state.failing_profiles.contains(&id) {
            return Err(GatewayError::unavailable("profile lookup failed"));
        }
        Ok(state.profiles.get(&id).cloned())
    }

    async fn profiles(&self, ids: &[Uuid]) -> GatewayResult<Vec<Profile>> {
        let state = self.enter("profiles")?;
        Ok(ids.iter().filter_map(|id| state.profiles.get(id).cloned()).collect())
    }

    async fn product(&self, id: Uuid) -> GatewayResult<Option<Product>> {
        let state = self.enter("product")?;
        Ok(state.products.get(&id).cloned())
    }

    async fn active_contact_session(
        &self,
        buyer_id: Uuid,
        product_id: Uuid,
        channel: ContactChannel,
        now: DateTime<Utc>,
    ) -> GatewayResult<Option<ContactSession>> {
        let state = self.enter("active_contact_session")?;
        Ok(state
            .sessions
            .iter()
            .filter(|s| s.buyer_id == buyer_id && s.product_id == product_id && s.contact_type == channel)
            .filter(|s| s.is_active_at(now))
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn insert_contact_session(
        &self,
        buyer_id: Uuid,
        session: NewContactSession,
    ) -> GatewayResult<SessionInsert> {
        let mut state = self.enter("insert_contact_session")?;
        let created_at = session.expires_at - Duration::hours(24);
        let row = ContactSession {
            id: Uuid::new_v4(),
            product_id: session.product_id,
            buyer_id,
            seller_id: session.seller_id,
            contact_type: session.contact_type,
            revealed_contact: session.revealed_contact,
            created_at,
            expires_at: session.expires_at,
            is_verified: true,
            verification_method: "none".into(),
        };
        state.sessions.push(row.clone());
        Ok(SessionInsert::Created(row))
    }

    async fn contact_sessions(&self, buyer_id: Uuid) -> GatewayResult<Vec<ContactSession>> {
        let state = self.enter("contact_sessions")?;
        let mut rows: Vec<_> = state.sessions.iter().filter(|s| s.buyer_id == buyer_id).cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn conversations(&self, user_id: Uuid) -> GatewayResult<Vec<Conversation>> {
        let state = self.enter("conversations")?;
        let mut rows: Vec<_> = state.conversations.iter().filter(|c| c.involves(user_id)).cloned().collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows)
    }

    async fn get_or_create_conversation(
        &self,
        user_id: Uuid,
        other_user_id: Uuid,
        product_id: Option<Uuid>,
    ) -> GatewayResult<Conversation> {
        let existing = {
            let state = self.enter("get_or_create_conversation")?;
            state
                .conversations
                .iter()
                .find(|c| c.involves(user_id) && c.involves(other_user_id) && c.product_id == product_id)
                .cloned()
        };
        Ok(existing.unwrap_or_else(|| self.add_conversation(user_id, other_user_id, product_id)))
    }

    async fn touch_conversation(&self, conversation_id: Uuid) -> GatewayResult<()> {
        let mut state = self.enter("touch_conversation")?;
        let at = next_tick(&mut state);
        let conversation = state
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| GatewayError::not_found("conversation"))?;
        conversation.updated_at = at;
        Ok(())
    }

    async fn latest_message(&self, conversation_id: Uuid) -> GatewayResult<Option<Message>> {
        let state = self.enter("latest_message")?;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .max_by_key(|m| m.created_at)
            .cloned())
    }

    async fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> GatewayResult<u64> {
        let state = self.enter("unread_count")?;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id && !m.is_read && m.sender_id != user_id)
            .count() as u64)
    }

    async fn messages(&self, conversation_id: Uuid) -> GatewayResult<Vec<Message>> {
        let state = self.enter("messages")?;
        let mut rows: Vec<_> = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.created_at);
        Ok(rows)
    }

    async fn insert_message(
        &self,
        sender_id: Uuid,
        conversation_id: Uuid,
        request: SendMessageRequest,
    ) -> GatewayResult<Message> {
        let mut state = self.enter("insert_message")?;
        let conversation = state
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned()
            .ok_or_else(|| GatewayError::new(ErrorCode::ForeignKey, "conversation missing"))?;
        if conversation.other_participant(sender_id) != Some(request.receiver_id) {
            return Err(GatewayError::new(ErrorCode::Forbidden, "not a participant"));
        }
        let mut message = build_message(&mut state, &conversation, sender_id, &request.content, request.product_id);
        message.message_type = request.message_type;
        state.messages.push(message.clone());
        emit_locked(&state, MessageChange::Insert(message.clone()));
        Ok(message)
    }

    async fn mark_read(&self, conversation_id: Uuid, receiver_id: Uuid) -> GatewayResult<u64> {
        let mut state = self.enter("mark_read")?;
        let at = next_tick(&mut state);
        let mut changed = Vec::new();
        for m in state.messages.iter_mut() {
            if m.conversation_id == conversation_id && m.receiver_id == receiver_id && !m.is_read {
                m.is_read = true;
                m.updated_at = at;
                changed.push(m.clone());
            }
        }
        for m in &changed {
            emit_locked(&state, MessageChange::Update(m.clone()));
        }
        Ok(changed.len() as u64)
    }

    async fn insert_report(&self, reporter_id: Uuid, report: CreateReportRequest) -> GatewayResult<Report> {
        let mut state = self.enter("insert_report")?;
        if let Some(product_id) = report.product_id {
            if !state.products.contains_key(&product_id) {
                return Err(GatewayError::new(ErrorCode::ForeignKey, "product does not exist"));
            }
        }
        if let Some(user_id) = report.reported_user_id {
            if !state.profiles.contains_key(&user_id) {
                return Err(GatewayError::new(ErrorCode::ForeignKey, "user does not exist"));
            }
        }
        let duplicate = state.reports.iter().any(|r| {
            r.reporter_id == reporter_id
                && r.product_id == report.product_id
                && r.reported_user_id == report.reported_user_id
        });
        if duplicate {
            return Err(GatewayError::new(ErrorCode::Conflict, "already reported"));
        }
        let at = next_tick(&mut state);
        let row = Report {
            id: Uuid::new_v4(),
            reporter_id,
            product_id: report.product_id,
            reported_user_id: report.reported_user_id,
            reason: report.reason,
            details: report.details,
            created_at: at,
        };
        state.reports.push(row.clone());
        Ok(row)
    }

    async fn subscribe(&self, user_id: Uuid) -> GatewayResult<ChangeFeed> {
        let mut state = self.enter("subscribe")?;
        let (tx, rx) = mpsc::unbounded_channel();
        state.feeds.push((user_id, tx));
        Ok(ChangeFeed::new(rx))
    }
}
