use axum::{Json, extract::State, response::IntoResponse};
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sokoni_types::api::MpesaAck;

use crate::error::ApiError;
use crate::state::{AppState, run_db};

/// Validation callback. Every payment is accepted.
pub async fn validation(body: String) -> impl IntoResponse {
    debug!("M-Pesa validation: {}", body);
    Json(MpesaAck::accepted())
}

/// Confirmation callback. The body is logged and stored verbatim.
pub async fn confirmation(State(state): State<AppState>, body: String) -> Result<impl IntoResponse, ApiError> {
    info!("M-Pesa confirmation: {}", body);
    if serde_json::from_str::<serde_json::Value>(&body).is_err() {
        warn!("M-Pesa confirmation body is not JSON, storing it as received");
    }

    let id = Uuid::new_v4();
    run_db(&state, move |db| db.insert_billing_event(id, "mpesa", &body, Utc::now())).await?;

    Ok(Json(MpesaAck::accepted()))
}
