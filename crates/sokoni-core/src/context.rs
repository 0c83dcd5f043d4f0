use uuid::Uuid;

/// How far the current network connection can be trusted with private data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkTrust {
    Trusted,
    #[default]
    Unverified,
    /// Known-hostile network (open hotspot, intercepted TLS). Contact details
    /// are never revealed on it.
    Danger,
}

/// Signed-in caller, passed explicitly into every controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: Uuid,
    pub network: NetworkTrust,
}

impl SessionContext {
    pub fn new(user_id: Uuid, network: NetworkTrust) -> Self {
        Self { user_id, network }
    }
}
