use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use uuid::Uuid;

use sokoni_types::api::{Claims, ProfilesQuery};

use crate::error::ApiError;
use crate::state::{AppState, run_db};

const MAX_BATCH: usize = 100;

pub async fn get_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let id = claims.sub;
    let profile = run_db(&state, move |db| db.get_profile(id))
        .await?
        .ok_or_else(|| ApiError::not_found("Profile"))?;
    Ok(Json(profile))
}

pub async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = run_db(&state, move |db| db.get_profile(id))
        .await?
        .ok_or_else(|| ApiError::not_found("Profile"))?;
    Ok(Json(profile))
}

/// `GET /profiles?ids=a,b,c`: unknown ids are skipped.
pub async fn get_profiles(
    State(state): State<AppState>,
    Query(query): Query<ProfilesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let ids = parse_ids(&query.ids)?;
    if ids.len() > MAX_BATCH {
        return Err(ApiError::validation(format!("At most {} ids per request", MAX_BATCH)));
    }
    let profiles = run_db(&state, move |db| db.get_profiles(&ids)).await?;
    Ok(Json(profiles))
}

fn parse_ids(raw: &str) -> Result<Vec<Uuid>, ApiError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|_| ApiError::validation(format!("Invalid id '{}'", s))))
        .collect()
}
