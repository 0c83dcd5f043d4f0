use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info};
use uuid::Uuid;

use sokoni_db::queries::NewProfile;
use sokoni_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::error::ApiError;
use crate::state::{AppState, run_db};

const TOKEN_LIFETIME_DAYS: i64 = 30;

fn valid_username(username: &str) -> bool {
    (3..=32).contains(&username.len())
        && username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !valid_username(&req.username) {
        return Err(ApiError::validation(
            "Username must be 3-32 characters of letters, digits, '_' or '.'",
        ));
    }
    if req.password.len() < 8 {
        return Err(ApiError::validation("Password must be at least 8 characters"));
    }

    let username = req.username.clone();
    let taken = run_db(&state, move |db| db.get_user_by_username(&username)).await?;
    if taken.is_some() {
        return Err(ApiError::conflict("Username already taken"));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| {
            error!("Password hashing failed: {}", e);
            ApiError::internal()
        })?
        .to_string();

    let user_id = Uuid::new_v4();
    let profile = NewProfile {
        full_name: non_blank(req.full_name),
        phone: non_blank(req.phone),
        whatsapp: non_blank(req.whatsapp),
    };
    let username = req.username.clone();
    run_db(&state, move |db| {
        db.create_account(&user_id.to_string(), &username, &password_hash, &profile)
    })
    .await?;

    let token = create_token(&state.jwt_secret, user_id, &req.username)?;
    info!("Registered {} ({})", req.username, user_id);

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.clone();
    let user = run_db(&state, move |db| db.get_user_by_username(&username))
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid username or password"))?;

    let parsed_hash = PasswordHash::new(&user.password).map_err(|e| {
        error!("Stored hash for {} is unreadable: {}", user.username, e);
        ApiError::internal()
    })?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::unauthorized("Invalid username or password"))?;

    let user_id: Uuid = user.id.parse().map_err(|e| {
        error!("Corrupt user id '{}': {}", user.id, e);
        ApiError::internal()
    })?;

    let token = create_token(&state.jwt_secret, user_id, &user.username)?;

    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        token,
    }))
}

pub fn create_token(secret: &str, user_id: Uuid, username: &str) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_LIFETIME_DAYS)).timestamp() as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).map_err(|e| {
        error!("Token signing failed: {}", e);
        ApiError::internal()
    })
}
