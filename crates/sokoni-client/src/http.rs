//! [`Gateway`] over the Sokoni HTTP API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use sokoni_core::error::{ErrorCode, GatewayError, GatewayResult};
use sokoni_core::gateway::{ChangeFeed, Gateway};
use sokoni_types::api::{
    ActiveSessionQuery, CountResponse, CreateConversationRequest, CreateProductRequest, CreateReportRequest,
    ErrorBody, LoginRequest, LoginResponse, NewContactSession, RegisterRequest, RegisterResponse,
    SendMessageRequest, SessionInsert,
};
use sokoni_types::models::{ContactChannel, ContactSession, Conversation, Message, Profile, Product, Report};

use crate::realtime;

/// Signed-in connection to a Sokoni server. Every row-level call is made as
/// this user; asking on behalf of anyone else fails locally with `forbidden`.
#[derive(Clone)]
pub struct HttpGateway {
    http: Client,
    base_url: String,
    user_id: Uuid,
    username: String,
    token: String,
}

impl HttpGateway {
    pub fn from_token(base_url: &str, user_id: Uuid, username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id,
            username: username.into(),
            token: token.into(),
        }
    }

    pub async fn login(base_url: &str, username: &str, password: &str) -> GatewayResult<Self> {
        let http = Client::new();
        let base = base_url.trim_end_matches('/');
        let resp = http
            .post(format!("{}/auth/login", base))
            .json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await
            .map_err(transport)?;
        let login: LoginResponse = decode(resp).await?;
        Ok(Self::from_token(base, login.user_id, login.username, login.token))
    }

    pub async fn register(base_url: &str, req: RegisterRequest) -> GatewayResult<Self> {
        let http = Client::new();
        let base = base_url.trim_end_matches('/');
        let username = req.username.clone();
        let resp = http
            .post(format!("{}/auth/register", base))
            .json(&req)
            .send()
            .await
            .map_err(transport)?;
        let registered: RegisterResponse = decode(resp).await?;
        Ok(Self::from_token(base, registered.user_id, username, registered.token))
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// The signed-in user's own profile.
    pub async fn me(&self) -> GatewayResult<Profile> {
        self.fetch(self.http.get(self.url("/profiles/me"))).await
    }

    pub async fn create_product(&self, req: &CreateProductRequest) -> GatewayResult<Product> {
        self.fetch(self.http.post(self.url("/products")).json(req)).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn ensure_self(&self, user_id: Uuid) -> GatewayResult<()> {
        if user_id != self.user_id {
            return Err(GatewayError::new(
                ErrorCode::Forbidden,
                "Request made on behalf of a different user",
            ));
        }
        Ok(())
    }

    async fn send(&self, req: RequestBuilder) -> GatewayResult<Response> {
        req.bearer_auth(&self.token).send().await.map_err(transport)
    }

    async fn fetch<T: DeserializeOwned>(&self, req: RequestBuilder) -> GatewayResult<T> {
        decode(self.send(req).await?).await
    }

    /// Like [`fetch`](Self::fetch), but `not_found` becomes `None`.
    async fn fetch_optional<T: DeserializeOwned>(&self, req: RequestBuilder) -> GatewayResult<Option<T>> {
        match self.fetch(req).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.code == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> GatewayResult<T> {
        self.fetch(self.http.post(self.url(path)).json(body)).await
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn profile(&self, id: Uuid) -> GatewayResult<Option<Profile>> {
        self.fetch_optional(self.http.get(self.url(&format!("/profiles/{}", id)))).await
    }

    async fn profiles(&self, ids: &[Uuid]) -> GatewayResult<Vec<Profile>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(",");
        self.fetch(self.http.get(self.url("/profiles")).query(&[("ids", joined)])).await
    }

    async fn product(&self, id: Uuid) -> GatewayResult<Option<Product>> {
        self.fetch_optional(self.http.get(self.url(&format!("/products/{}", id)))).await
    }

    /// The server decides what "active" means with its own clock.
    async fn active_contact_session(
        &self,
        buyer_id: Uuid,
        product_id: Uuid,
        channel: ContactChannel,
        _now: DateTime<Utc>,
    ) -> GatewayResult<Option<ContactSession>> {
        self.ensure_self(buyer_id)?;
        let query = ActiveSessionQuery {
            product_id,
            contact_type: channel,
        };
        self.fetch(self.http.get(self.url("/contact-sessions/active")).query(&query)).await
    }

    async fn insert_contact_session(&self, buyer_id: Uuid, session: NewContactSession) -> GatewayResult<SessionInsert> {
        self.ensure_self(buyer_id)?;
        self.post_json("/contact-sessions", &session).await
    }

    async fn contact_sessions(&self, buyer_id: Uuid) -> GatewayResult<Vec<ContactSession>> {
        self.ensure_self(buyer_id)?;
        self.fetch(self.http.get(self.url("/contact-sessions"))).await
    }

    async fn conversations(&self, user_id: Uuid) -> GatewayResult<Vec<Conversation>> {
        self.ensure_self(user_id)?;
        self.fetch(self.http.get(self.url("/conversations"))).await
    }

    async fn get_or_create_conversation(
        &self,
        user_id: Uuid,
        other_user_id: Uuid,
        product_id: Option<Uuid>,
    ) -> GatewayResult<Conversation> {
        self.ensure_self(user_id)?;
        let req = CreateConversationRequest {
            other_user_id,
            product_id,
        };
        self.post_json("/conversations", &req).await
    }

    async fn touch_conversation(&self, conversation_id: Uuid) -> GatewayResult<()> {
        let path = format!("/conversations/{}/touch", conversation_id);
        let resp = self.send(self.http.post(self.url(&path))).await?;
        if resp.status().is_success() {
            return Ok(());
        }
        Err(error_from(resp).await)
    }

    async fn latest_message(&self, conversation_id: Uuid) -> GatewayResult<Option<Message>> {
        let path = format!("/conversations/{}/messages/latest", conversation_id);
        self.fetch(self.http.get(self.url(&path))).await
    }

    async fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> GatewayResult<u64> {
        self.ensure_self(user_id)?;
        let path = format!("/conversations/{}/unread", conversation_id);
        let count: CountResponse = self.fetch(self.http.get(self.url(&path))).await?;
        Ok(count.count)
    }

    async fn messages(&self, conversation_id: Uuid) -> GatewayResult<Vec<Message>> {
        let path = format!("/conversations/{}/messages", conversation_id);
        self.fetch(self.http.get(self.url(&path))).await
    }

    async fn insert_message(
        &self,
        sender_id: Uuid,
        conversation_id: Uuid,
        request: SendMessageRequest,
    ) -> GatewayResult<Message> {
        self.ensure_self(sender_id)?;
        let path = format!("/conversations/{}/messages", conversation_id);
        self.post_json(&path, &request).await
    }

    async fn mark_read(&self, conversation_id: Uuid, receiver_id: Uuid) -> GatewayResult<u64> {
        self.ensure_self(receiver_id)?;
        let path = format!("/conversations/{}/read", conversation_id);
        let count: CountResponse = self.fetch(self.http.post(self.url(&path))).await?;
        Ok(count.count)
    }

    async fn insert_report(&self, reporter_id: Uuid, report: CreateReportRequest) -> GatewayResult<Report> {
        self.ensure_self(reporter_id)?;
        self.post_json("/reports", &report).await
    }

    async fn subscribe(&self, user_id: Uuid) -> GatewayResult<ChangeFeed> {
        self.ensure_self(user_id)?;
        debug!("Opening realtime feed for {}", self.username);
        realtime::connect(&self.base_url, &self.token).await
    }
}

fn transport(err: reqwest::Error) -> GatewayError {
    warn!("HTTP transport error: {}", err);
    GatewayError::unavailable(format!("Could not reach server: {}", err))
}

async fn decode<T: DeserializeOwned>(resp: Response) -> GatewayResult<T> {
    if !resp.status().is_success() {
        return Err(error_from(resp).await);
    }
    resp.json::<T>()
        .await
        .map_err(|e| GatewayError::new(ErrorCode::Internal, format!("Unreadable response: {}", e)))
}

/// Turn an error response into a [`GatewayError`], preferring the server's
/// `{ code, message }` body and falling back to the status line.
async fn error_from(resp: Response) -> GatewayError {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => GatewayError::new(body.code, body.message),
        Err(_) => GatewayError::new(code_for_status(status), format!("Server answered {}", status)),
    }
}

pub(crate) fn code_for_status(status: StatusCode) -> ErrorCode {
    match status {
        StatusCode::BAD_REQUEST => ErrorCode::Validation,
        StatusCode::UNAUTHORIZED => ErrorCode::Unauthorized,
        StatusCode::FORBIDDEN => ErrorCode::Forbidden,
        StatusCode::NOT_FOUND => ErrorCode::NotFound,
        StatusCode::CONFLICT => ErrorCode::Conflict,
        StatusCode::UNPROCESSABLE_ENTITY => ErrorCode::ForeignKey,
        s if s == StatusCode::BAD_GATEWAY
            || s == StatusCode::SERVICE_UNAVAILABLE
            || s == StatusCode::GATEWAY_TIMEOUT =>
        {
            ErrorCode::Unavailable
        }
        _ => ErrorCode::Internal,
    }
}
