use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use sokoni_types::events::GatewayEvent;

/// Routes row-change events to the connected participants.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// Per-user send channels: user_id -> (conn_id, sender). A newer
    /// connection for the same user replaces the older one.
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a per-user channel. Returns (conn_id, receiver).
    pub async fn register_user_channel(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.user_channels.write().await.insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a per-user channel, but only if conn_id still owns it.
    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if channels.get(&user_id).is_some_and(|(stored, _)| *stored == conn_id) {
            channels.remove(&user_id);
        }
    }

    /// Deliver an event to everyone it concerns. Returns how many
    /// connected users it reached.
    pub async fn publish(&self, event: GatewayEvent) -> usize {
        let recipients = event.recipients();
        let channels = self.inner.user_channels.read().await;
        let mut delivered = 0;
        for user_id in recipients {
            if let Some((_, tx)) = channels.get(&user_id) {
                if tx.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        debug!("Published event to {} connected users", delivered);
        delivered
    }
}
