use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use sokoni_core::error::{ErrorCode, GatewayError, GatewayResult};
use sokoni_core::gateway::ChangeFeed;
use sokoni_types::events::{GatewayCommand, GatewayEvent};

const READY_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn ws_url(base_url: &str) -> String {
    let base = base_url
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);
    format!("{}/gateway", base.trim_end_matches('/'))
}

fn unavailable(context: &str, err: impl std::fmt::Display) -> GatewayError {
    GatewayError::unavailable(format!("{}: {}", context, err))
}

/// Open the realtime gateway, identify with `token` and wait for `Ready`.
/// The returned feed yields message changes until it is dropped or the
/// server goes away.
pub async fn connect(base_url: &str, token: &str) -> GatewayResult<ChangeFeed> {
    let url = ws_url(base_url);
    let (ws_stream, _) = connect_async(&url)
        .await
        .map_err(|e| unavailable("Realtime connect failed", e))?;
    let (mut sink, mut stream) = ws_stream.split();

    let identify = serde_json::to_string(&GatewayCommand::Identify {
        token: token.to_string(),
    })
    .map_err(|e| unavailable("Could not encode Identify", e))?;
    sink.send(Message::Text(identify.into()))
        .await
        .map_err(|e| unavailable("Realtime handshake failed", e))?;

    let ready = tokio::time::timeout(READY_TIMEOUT, async {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Ok(GatewayEvent::Ready { user_id, username }) = serde_json::from_str(&text) {
                        return Some((user_id, username));
                    }
                }
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
        None
    })
    .await
    .ok()
    .flatten();

    let Some((user_id, username)) = ready else {
        return Err(GatewayError::new(
            ErrorCode::Unauthorized,
            "Realtime gateway refused the session",
        ));
    };
    info!("Realtime feed ready for {} ({})", username, user_id);

    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<GatewayEvent>(&text) {
                    Ok(event) => {
                        if let Some(change) = event.into_change() {
                            if tx.send(change).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => warn!("Unreadable gateway event: {}", e),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Realtime feed error: {}", e);
                    break;
                }
            }
        }
        let _ = sink.close().await;
        debug!("Realtime feed for {} closed", user_id);
    });

    Ok(ChangeFeed::with_task(rx, task))
}
