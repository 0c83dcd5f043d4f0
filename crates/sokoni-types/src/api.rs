use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ContactChannel, ContactSession};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the realtime gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Errors --

/// Machine-readable failure class carried in every error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    Unauthorized,
    Forbidden,
    Validation,
    Conflict,
    ForeignKey,
    Unavailable,
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::ForeignKey => "foreign_key",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

// -- Auth --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub whatsapp: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Products --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateProductRequest {
    pub title: String,
    pub price: i64,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub whatsapp: Option<String>,
}

// -- Contact sessions --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewContactSession {
    pub product_id: Uuid,
    pub seller_id: Uuid,
    pub contact_type: ContactChannel,
    pub revealed_contact: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of a contact session insert. The store answers with the already
/// active row instead of writing a second one for the same tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "session", rename_all = "snake_case")]
pub enum SessionInsert {
    Created(ContactSession),
    Existing(ContactSession),
}

impl SessionInsert {
    pub fn session(&self) -> &ContactSession {
        match self {
            Self::Created(s) | Self::Existing(s) => s,
        }
    }

    pub fn into_session(self) -> ContactSession {
        match self {
            Self::Created(s) | Self::Existing(s) => s,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActiveSessionQuery {
    pub product_id: Uuid,
    pub contact_type: ContactChannel,
}

// -- Profiles --

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfilesQuery {
    /// Comma-separated profile ids.
    pub ids: String,
}

// -- Conversations & messages --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConversationRequest {
    pub other_user_id: Uuid,
    #[serde(default)]
    pub product_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub receiver_id: Uuid,
    pub content: String,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    #[serde(default)]
    pub product_id: Option<Uuid>,
}

pub fn default_message_type() -> String {
    "text".into()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

// -- Reports --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateReportRequest {
    #[serde(default)]
    pub product_id: Option<Uuid>,
    #[serde(default)]
    pub reported_user_id: Option<Uuid>,
    pub reason: String,
    #[serde(default)]
    pub details: Option<String>,
}

// -- Payments --

/// Acknowledgement body the mobile-money provider expects from both callbacks.
#[derive(Debug, Serialize, Deserialize)]
pub struct MpesaAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl MpesaAck {
    pub fn accepted() -> Self {
        Self {
            result_code: 0,
            result_desc: "Accepted".into(),
        }
    }
}
