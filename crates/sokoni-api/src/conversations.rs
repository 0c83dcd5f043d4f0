use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use sokoni_types::api::{Claims, CountResponse, CreateConversationRequest, SendMessageRequest};
use sokoni_types::events::GatewayEvent;
use sokoni_types::models::{Conversation, Message};

use crate::error::ApiError;
use crate::state::{AppState, run_db};

const MAX_MESSAGE_CHARS: usize = 2000;

/// Load a conversation the caller takes part in.
async fn participant_conversation(state: &AppState, id: Uuid, user_id: Uuid) -> Result<Conversation, ApiError> {
    let conversation = run_db(state, move |db| db.get_conversation(id))
        .await?
        .ok_or_else(|| ApiError::not_found("Conversation"))?;
    if !conversation.involves(user_id) {
        return Err(ApiError::forbidden("You are not a participant in this conversation"));
    }
    Ok(conversation)
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = claims.sub;
    let conversations = run_db(&state, move |db| db.conversations_for_user(user)).await?;
    Ok(Json(conversations))
}

pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.other_user_id == claims.sub {
        return Err(ApiError::validation("You cannot start a conversation with yourself"));
    }

    let me = claims.sub;
    let other = req.other_user_id;
    let conversation = run_db(&state, move |db| {
        if db.get_profile(other)?.is_none() {
            return Ok(None);
        }
        db.get_or_create_conversation(me, other, req.product_id, Utc::now()).map(Some)
    })
    .await?
    .ok_or_else(|| ApiError::not_found("User"))?;

    Ok(Json(conversation))
}

pub async fn touch_conversation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    participant_conversation(&state, id, claims.sub).await?;
    run_db(&state, move |db| db.touch_conversation(id, Utc::now())).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    participant_conversation(&state, id, claims.sub).await?;
    let messages = run_db(&state, move |db| db.get_messages(id)).await?;
    Ok(Json(messages))
}

pub async fn latest_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    participant_conversation(&state, id, claims.sub).await?;
    let latest = run_db(&state, move |db| db.latest_message(id)).await?;
    Ok(Json(latest))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    participant_conversation(&state, id, claims.sub).await?;
    let me = claims.sub;
    let count = run_db(&state, move |db| db.unread_count(id, me)).await?;
    Ok(Json(CountResponse { count }))
}

/// Persist a message and push it to both participants.
pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::validation("Message cannot be empty"));
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::validation(format!(
            "Message is longer than {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    if req.message_type.trim().is_empty() {
        return Err(ApiError::validation("message_type cannot be empty"));
    }

    let conversation = participant_conversation(&state, id, claims.sub).await?;
    if conversation.other_participant(claims.sub) != Some(req.receiver_id) {
        return Err(ApiError::forbidden("Receiver is not the other participant"));
    }

    let now = Utc::now();
    let message = Message {
        id: Uuid::new_v4(),
        conversation_id: id,
        sender_id: claims.sub,
        receiver_id: req.receiver_id,
        content,
        message_type: req.message_type,
        is_read: false,
        product_id: req.product_id.or(conversation.product_id),
        created_at: now,
        updated_at: now,
    };

    let row = message.clone();
    run_db(&state, move |db| db.insert_message(&row)).await?;

    let reached = state
        .dispatcher
        .publish(GatewayEvent::MessageInsert {
            message: message.clone(),
        })
        .await;
    debug!("Message {} pushed to {} connected participants", message.id, reached);

    Ok((StatusCode::CREATED, Json(message)))
}

/// Flip every unread message addressed to the caller and push the updates.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    participant_conversation(&state, id, claims.sub).await?;
    let me = claims.sub;
    let changed = run_db(&state, move |db| db.mark_read(id, me, Utc::now())).await?;

    let count = changed.len() as u64;
    for message in changed {
        state.dispatcher.publish(GatewayEvent::MessageUpdate { message }).await;
    }
    if count > 0 {
        info!("{} read {} messages in {}", claims.username, count, id);
    }

    Ok(Json(CountResponse { count }))
}
