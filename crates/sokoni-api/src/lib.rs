pub mod auth;
pub mod contacts;
pub mod conversations;
pub mod error;
pub mod middleware;
pub mod mpesa;
pub mod products;
pub mod profiles;
pub mod reports;
pub mod state;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use sokoni_gateway::connection;

pub use error::ApiError;
pub use state::{AppState, AppStateInner};

/// Build the full HTTP surface: public auth and webhook routes, the
/// JWT-protected marketplace routes and the realtime gateway.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/mpesa/validation", post(mpesa::validation))
        .route("/mpesa/confirmation", post(mpesa::confirmation))
        .route("/gateway", get(ws_upgrade));

    let protected_routes = Router::new()
        .route("/profiles", get(profiles::get_profiles))
        .route("/profiles/me", get(profiles::get_me))
        .route("/profiles/{id}", get(profiles::get_profile))
        .route("/products", post(products::create_product))
        .route("/products/{id}", get(products::get_product))
        .route("/contact-sessions", get(contacts::list_sessions).post(contacts::create_session))
        .route("/contact-sessions/active", get(contacts::active_session))
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route("/conversations/{id}/touch", post(conversations::touch_conversation))
        .route(
            "/conversations/{id}/messages",
            get(conversations::get_messages).post(conversations::send_message),
        )
        .route("/conversations/{id}/messages/latest", get(conversations::latest_message))
        .route("/conversations/{id}/unread", get(conversations::unread_count))
        .route("/conversations/{id}/read", post(conversations::mark_read))
        .route("/reports", post(reports::create_report))
        .layer(from_fn_with_state(state.clone(), middleware::require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let dispatcher = state.dispatcher.clone();
    let jwt_secret = state.jwt_secret.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, jwt_secret))
}
