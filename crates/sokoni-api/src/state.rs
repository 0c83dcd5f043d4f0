use std::sync::Arc;

use chrono::Duration;
use tracing::error;

use sokoni_db::Database;
use sokoni_gateway::Dispatcher;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    /// Upper bound on a contact session's lifetime.
    pub session_ttl: Duration,
}

impl AppStateInner {
    pub fn new(db: Database, jwt_secret: String, session_ttl: Duration) -> AppState {
        Arc::new(Self {
            db,
            jwt_secret,
            dispatcher: Dispatcher::new(),
            session_ttl,
        })
    }
}

/// Run blocking DB work off the async runtime.
pub async fn run_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::internal()
        })?
        .map_err(ApiError::from)
}
