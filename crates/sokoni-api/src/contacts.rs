use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use sokoni_types::api::{ActiveSessionQuery, Claims, NewContactSession, SessionInsert};
use sokoni_types::models::ContactSession;

use crate::error::ApiError;
use crate::state::{AppState, run_db};

/// The caller's reveal history, newest first.
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let buyer = claims.sub;
    let sessions = run_db(&state, move |db| db.sessions_for_buyer(buyer)).await?;
    Ok(Json(sessions))
}

/// Newest unexpired session for the caller, product and channel, or `null`.
pub async fn active_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ActiveSessionQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let buyer = claims.sub;
    let session = run_db(&state, move |db| {
        db.find_active_session(buyer, query.product_id, query.contact_type, Utc::now())
    })
    .await?;
    Ok(Json(session))
}

/// Record a reveal. The revealed value must be the one the listing actually
/// offers, and the expiry is capped at the configured lifetime. Answers 201
/// for a new row and 200 with the already active row otherwise.
pub async fn create_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<NewContactSession>,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    if req.expires_at <= now {
        return Err(ApiError::validation("expires_at must be in the future"));
    }

    let product_id = req.product_id;
    let (product, seller) = run_db(&state, move |db| {
        let Some(product) = db.get_product(product_id)? else {
            return Ok((None, None));
        };
        let seller = db.get_profile(product.seller_id)?;
        Ok((Some(product), seller))
    })
    .await?;
    let product = product.ok_or_else(|| ApiError::not_found("Product"))?;

    if product.seller_id != req.seller_id {
        return Err(ApiError::validation("seller_id does not match the listing"));
    }
    let offered = product
        .contact(req.contact_type)
        .or_else(|| seller.as_ref().and_then(|s| s.contact(req.contact_type)));
    if offered != Some(req.revealed_contact.as_str()) {
        warn!(
            "{} tried to record a {} contact the listing {} does not offer",
            claims.username, req.contact_type, product_id
        );
        return Err(ApiError::validation("Contact does not match the listing"));
    }

    let expires_at = match now.checked_add_signed(state.session_ttl) {
        Some(cap) => req.expires_at.min(cap),
        None => req.expires_at,
    };
    let session = ContactSession {
        id: Uuid::new_v4(),
        product_id,
        buyer_id: claims.sub,
        seller_id: req.seller_id,
        contact_type: req.contact_type,
        revealed_contact: req.revealed_contact,
        created_at: now,
        expires_at,
        is_verified: true,
        verification_method: "none".into(),
    };

    let outcome = run_db(&state, move |db| db.insert_contact_session(&session, now)).await?;
    let status = match &outcome {
        SessionInsert::Created(s) => {
            info!("{} revealed {} for product {} (session {})", claims.username, s.contact_type, product_id, s.id);
            StatusCode::CREATED
        }
        SessionInsert::Existing(_) => StatusCode::OK,
    };

    Ok((status, Json(outcome)))
}
