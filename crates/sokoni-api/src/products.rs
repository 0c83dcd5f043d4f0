use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use sokoni_types::api::{Claims, CreateProductRequest};
use sokoni_types::models::Product;

use crate::error::ApiError;
use crate::state::{AppState, run_db};

pub async fn create_product(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateProductRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = req.title.trim().to_string();
    if title.is_empty() || title.len() > 120 {
        return Err(ApiError::validation("Title must be 1-120 characters"));
    }
    if req.price < 0 {
        return Err(ApiError::validation("Price cannot be negative"));
    }

    let product = Product {
        id: Uuid::new_v4(),
        seller_id: claims.sub,
        title,
        price: req.price,
        phone: req.phone.filter(|v| !v.trim().is_empty()),
        whatsapp: req.whatsapp.filter(|v| !v.trim().is_empty()),
        created_at: Utc::now(),
    };

    let row = product.clone();
    run_db(&state, move |db| db.insert_product(&row)).await?;
    info!("{} listed product {}", claims.username, product.id);

    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let product = run_db(&state, move |db| db.get_product(id))
        .await?
        .ok_or_else(|| ApiError::not_found("Product"))?;
    Ok(Json(product))
}
