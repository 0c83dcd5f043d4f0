use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use sokoni_types::api::{Claims, CreateReportRequest, ErrorCode};
use sokoni_types::models::Report;

use crate::error::ApiError;
use crate::state::{AppState, run_db};

/// File a report. A second report by the same user on the same target is
/// `conflict`; a target that does not exist is `foreign_key`.
pub async fn create_report(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateReportRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let reason = req.reason.trim().to_string();
    if reason.is_empty() {
        return Err(ApiError::validation("A reason is required"));
    }
    if req.product_id.is_none() && req.reported_user_id.is_none() {
        return Err(ApiError::validation("Report a product, a user, or both"));
    }
    if req.reported_user_id == Some(claims.sub) {
        return Err(ApiError::validation("You cannot report yourself"));
    }

    let report = Report {
        id: Uuid::new_v4(),
        reporter_id: claims.sub,
        product_id: req.product_id,
        reported_user_id: req.reported_user_id,
        reason,
        details: req.details.filter(|d| !d.trim().is_empty()),
        created_at: Utc::now(),
    };

    let row = report.clone();
    run_db(&state, move |db| db.insert_report(&row))
        .await
        .map_err(|e| match e.code {
            ErrorCode::Conflict => ApiError::conflict("You have already reported this"),
            _ => e,
        })?;
    info!("{} filed report {}", claims.username, report.id);

    Ok((StatusCode::CREATED, Json(report)))
}
