use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sokoni_types::api::Claims;
use sokoni_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_MISSED_PONGS: u8 = 2;

/// How long a fresh socket may stay silent before it must identify.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle one realtime connection: `Identify` handshake, `Ready`, then
/// forward this user's message changes until either side goes away.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let Some((user_id, username)) = wait_for_identify(&mut receiver, &jwt_secret).await else {
        warn!("WebSocket client failed to identify, closing");
        return;
    };

    info!("{} ({}) connected to gateway", username, user_id);

    // Register before Ready so nothing published after the client sees
    // Ready can be missed.
    let (conn_id, user_rx) = dispatcher.register_user_channel(user_id).await;

    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        dispatcher.unregister_user_channel(user_id, conn_id).await;
        return;
    }

    run_connection_loop(sender, receiver, user_rx, user_id, &username).await;

    dispatcher.unregister_user_channel(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

/// Pong bookkeeping shared by the send and receive halves.
#[derive(Default)]
struct Liveness {
    answered: AtomicBool,
    missed: AtomicU8,
}

impl Liveness {
    fn pong(&self) {
        self.answered.store(true, Ordering::Release);
    }

    /// Called on every heartbeat tick. False once the peer has ignored
    /// `MAX_MISSED_PONGS` pings in a row.
    fn still_alive(&self) -> bool {
        if self.answered.swap(false, Ordering::Acquire) {
            self.missed.store(0, Ordering::Relaxed);
            return true;
        }
        self.missed.fetch_add(1, Ordering::Relaxed) + 1 < MAX_MISSED_PONGS
    }
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut user_rx: mpsc::UnboundedReceiver<GatewayEvent>,
    user_id: Uuid,
    username: &str,
) {
    let liveness = Arc::new(Liveness {
        answered: AtomicBool::new(true),
        missed: AtomicU8::new(0),
    });
    let send_liveness = liveness.clone();

    let mut send_task = tokio::spawn(async move {
        let mut ticks = tokio::time::interval(HEARTBEAT_INTERVAL);
        ticks.tick().await;

        loop {
            tokio::select! {
                event = user_rx.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = ticks.tick() => {
                    if !send_liveness.still_alive() {
                        warn!("No pong for {} heartbeats, dropping {}", MAX_MISSED_PONGS, user_id);
                        break;
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let who = format!("{} ({})", username, user_id);
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = receiver.next().await {
            match frame {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(GatewayCommand::Identify { .. }) => debug!("{} sent Identify twice, ignoring", who),
                    Err(e) => {
                        let raw: String = text.chars().take(200).collect();
                        warn!("{} sent an unreadable command: {} -- raw: {}", who, e, raw);
                    }
                },
                Message::Pong(_) => liveness.pong(),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, jwt_secret: &str) -> Option<(Uuid, String)> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(&text) {
                    return verify_token(&token, jwt_secret);
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify).await.ok().flatten()
}

/// Decode a bearer token into (user_id, username).
pub fn verify_token(token: &str, jwt_secret: &str) -> Option<(Uuid, String)> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;
    Some((data.claims.sub, data.claims.username))
}
