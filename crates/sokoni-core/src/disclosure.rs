//! # Contact disclosure
//!
//! Gates revealing a seller's phone/WhatsApp number to a buyer. A reveal
//! mints a 24h contact session; while it is active, repeated requests reuse it
//! instead of writing new rows. Sessions are never updated or deleted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sokoni_types::api::{NewContactSession, SessionInsert};
use sokoni_types::models::{ContactChannel, ContactSession, Product};

use crate::context::{NetworkTrust, SessionContext};
use crate::error::{GatewayError, Notice};
use crate::gateway::Gateway;
use crate::masking::{format_expiry, format_masked_number};

pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum DisclosureError {
    #[error("Your connection is not secure. Switch to a trusted network to view contact details.")]
    InsecureNetwork,

    #[error("Product not found")]
    ProductNotFound,

    #[error("Seller {0} contact not available")]
    ContactUnavailable(ContactChannel),

    #[error("Failed to reveal contact")]
    Gateway(#[source] GatewayError),
}

impl DisclosureError {
    pub fn notice(&self) -> Notice {
        match self {
            Self::InsecureNetwork => Notice::warning(self.to_string()),
            _ => Notice::error(self.to_string()),
        }
    }
}

/// Outcome of a successful reveal.
#[derive(Debug, Clone, PartialEq)]
pub enum Reveal {
    /// An active session already existed; nothing was written.
    Reused(ContactSession),
    /// A new session row was written.
    Created(ContactSession),
}

impl Reveal {
    pub fn session(&self) -> &ContactSession {
        match self {
            Self::Reused(s) | Self::Created(s) => s,
        }
    }

    pub fn contact(&self) -> &str {
        &self.session().revealed_contact
    }

    pub fn notice(&self) -> Notice {
        match self {
            Self::Reused(_) => Notice::info("Contact already revealed"),
            Self::Created(s) => Notice::success(format!("{} number revealed", channel_label(s.contact_type))),
        }
    }
}

fn channel_label(channel: ContactChannel) -> &'static str {
    match channel {
        ContactChannel::Phone => "Phone",
        ContactChannel::Whatsapp => "WhatsApp",
    }
}

/// One row of a buyer's reveal history.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactHistoryEntry {
    pub session: ContactSession,
    pub product_title: String,
    pub masked_contact: String,
    pub expiry_text: String,
    pub active: bool,
}

pub struct ContactDisclosure {
    gateway: Arc<dyn Gateway>,
    ttl: Duration,
}

impl ContactDisclosure {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self::with_ttl(gateway, Duration::hours(DEFAULT_SESSION_TTL_HOURS))
    }

    pub fn with_ttl(gateway: Arc<dyn Gateway>, ttl: Duration) -> Self {
        Self { gateway, ttl }
    }

    pub async fn reveal(
        &self,
        ctx: &SessionContext,
        product_id: Uuid,
        channel: ContactChannel,
    ) -> Result<Reveal, DisclosureError> {
        self.reveal_at(ctx, product_id, channel, Utc::now()).await
    }

    /// Reveal with an explicit clock.
    pub async fn reveal_at(
        &self,
        ctx: &SessionContext,
        product_id: Uuid,
        channel: ContactChannel,
        now: DateTime<Utc>,
    ) -> Result<Reveal, DisclosureError> {
        if ctx.network == NetworkTrust::Danger {
            warn!("Refusing {} reveal for product {} on untrusted network", channel, product_id);
            return Err(DisclosureError::InsecureNetwork);
        }

        let existing = self
            .gateway
            .active_contact_session(ctx.user_id, product_id, channel, now)
            .await
            .map_err(DisclosureError::Gateway)?;
        if let Some(session) = existing {
            debug!("Reusing contact session {} for product {}", session.id, product_id);
            return Ok(Reveal::Reused(session));
        }

        let product = self
            .gateway
            .product(product_id)
            .await
            .map_err(DisclosureError::Gateway)?
            .ok_or(DisclosureError::ProductNotFound)?;

        let contact = self.resolve_contact(&product, channel).await?;

        let inserted = self
            .gateway
            .insert_contact_session(
                ctx.user_id,
                NewContactSession {
                    product_id,
                    seller_id: product.seller_id,
                    contact_type: channel,
                    revealed_contact: contact,
                    expires_at: now + self.ttl,
                },
            )
            .await
            .map_err(|e| {
                warn!("Contact session insert failed for product {}: {}", product_id, e);
                DisclosureError::Gateway(e)
            })?;

        Ok(match inserted {
            SessionInsert::Created(session) => {
                info!(
                    "Contact session {} created: buyer {} product {} via {}",
                    session.id, ctx.user_id, product_id, channel
                );
                Reveal::Created(session)
            }
            // Another request for the same tuple won the race.
            SessionInsert::Existing(session) => Reveal::Reused(session),
        })
    }

    /// Product's own value first, then the seller's profile.
    async fn resolve_contact(&self, product: &Product, channel: ContactChannel) -> Result<String, DisclosureError> {
        if let Some(value) = product.contact(channel) {
            return Ok(value.to_string());
        }

        let seller = self
            .gateway
            .profile(product.seller_id)
            .await
            .map_err(DisclosureError::Gateway)?;

        seller
            .as_ref()
            .and_then(|p| p.contact(channel))
            .map(str::to_string)
            .ok_or(DisclosureError::ContactUnavailable(channel))
    }

    pub async fn history(&self, ctx: &SessionContext) -> Result<Vec<ContactHistoryEntry>, DisclosureError> {
        self.history_at(ctx, Utc::now()).await
    }

    /// Every session the buyer opened, newest first. A listing that cannot be
    /// loaded gets a placeholder title instead of failing the whole list.
    pub async fn history_at(
        &self,
        ctx: &SessionContext,
        now: DateTime<Utc>,
    ) -> Result<Vec<ContactHistoryEntry>, DisclosureError> {
        let sessions = self
            .gateway
            .contact_sessions(ctx.user_id)
            .await
            .map_err(DisclosureError::Gateway)?;

        let product_ids: Vec<Uuid> = sessions
            .iter()
            .map(|s| s.product_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let lookups = product_ids.iter().map(|id| self.gateway.product(*id));
        let titles: HashMap<Uuid, String> = product_ids
            .iter()
            .zip(join_all(lookups).await)
            .filter_map(|(id, result)| match result {
                Ok(Some(product)) => Some((*id, product.title)),
                Ok(None) => None,
                Err(e) => {
                    warn!("Could not load product {} for contact history: {}", id, e);
                    None
                }
            })
            .collect();

        Ok(sessions
            .into_iter()
            .map(|session| ContactHistoryEntry {
                product_title: titles
                    .get(&session.product_id)
                    .cloned()
                    .unwrap_or_else(|| "Listing unavailable".to_string()),
                masked_contact: format_masked_number(&session.revealed_contact),
                expiry_text: format_expiry(session.expires_at, now),
                active: session.is_active_at(now),
                session,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGateway, base_time};

    struct Fixture {
        gateway: Arc<FakeGateway>,
        disclosure: ContactDisclosure,
        buyer: SessionContext,
        seller: Uuid,
    }

    fn fixture() -> Fixture {
        let gateway = Arc::new(FakeGateway::new());
        let seller = gateway.add_profile("seller", Some("0722000111"), None);
        let buyer = gateway.add_profile("buyer", None, None);
        Fixture {
            disclosure: ContactDisclosure::new(gateway.clone()),
            gateway,
            buyer: SessionContext::new(buyer, NetworkTrust::Trusted),
            seller,
        }
    }

    #[tokio::test]
    async fn test_first_reveal_creates_session() {
        let f = fixture();
        let product = f.gateway.add_product(f.seller, Some("254712345678"), None);
        let t0 = base_time();

        let reveal = f.disclosure.reveal_at(&f.buyer, product, ContactChannel::Phone, t0).await.unwrap();

        let Reveal::Created(session) = &reveal else {
            panic!("expected a new session, got {:?}", reveal);
        };
        assert_eq!(session.revealed_contact, "254712345678");
        assert_eq!(session.expires_at, t0 + Duration::hours(24));
        assert!(session.is_verified);
        assert_eq!(session.verification_method, "none");
        assert_eq!(session.seller_id, f.seller);
        assert_eq!(f.gateway.session_rows(), 1);
    }

    #[tokio::test]
    async fn test_reveal_within_window_reuses_session() {
        let f = fixture();
        let product = f.gateway.add_product(f.seller, Some("254712345678"), None);
        let t0 = base_time();

        let first = f.disclosure.reveal_at(&f.buyer, product, ContactChannel::Phone, t0).await.unwrap();
        let again = f
            .disclosure
            .reveal_at(&f.buyer, product, ContactChannel::Phone, t0 + Duration::hours(1))
            .await
            .unwrap();

        assert!(matches!(again, Reveal::Reused(_)));
        assert_eq!(again.contact(), first.contact());
        assert_eq!(again.session().id, first.session().id);
        assert_eq!(again.notice().text, "Contact already revealed");
        assert_eq!(f.gateway.session_rows(), 1);
        assert_eq!(f.gateway.calls("insert_contact_session"), 1);
    }

    #[tokio::test]
    async fn test_reveal_after_expiry_mints_fresh_session() {
        let f = fixture();
        let product = f.gateway.add_product(f.seller, Some("0712345678"), None);
        let t0 = base_time();

        let first = f.disclosure.reveal_at(&f.buyer, product, ContactChannel::Phone, t0).await.unwrap();
        let t1 = t0 + Duration::hours(25);
        let later = f.disclosure.reveal_at(&f.buyer, product, ContactChannel::Phone, t1).await.unwrap();

        assert!(matches!(later, Reveal::Created(_)));
        assert_ne!(later.session().id, first.session().id);
        assert_eq!(later.session().expires_at, t1 + Duration::hours(24));
        // The expired row stays as an audit trail.
        assert_eq!(f.gateway.session_rows(), 2);
    }

    #[tokio::test]
    async fn test_channels_are_tracked_separately() {
        let f = fixture();
        let product = f.gateway.add_product(f.seller, Some("0712345678"), Some("0799888777"));
        let t0 = base_time();

        f.disclosure.reveal_at(&f.buyer, product, ContactChannel::Phone, t0).await.unwrap();
        let wa = f.disclosure.reveal_at(&f.buyer, product, ContactChannel::Whatsapp, t0).await.unwrap();

        assert!(matches!(wa, Reveal::Created(_)));
        assert_eq!(wa.contact(), "0799888777");
        assert_eq!(f.gateway.session_rows(), 2);
    }

    #[tokio::test]
    async fn test_falls_back_to_seller_profile() {
        let f = fixture();
        let product = f.gateway.add_product(f.seller, None, None);

        let reveal = f
            .disclosure
            .reveal_at(&f.buyer, product, ContactChannel::Phone, base_time())
            .await
            .unwrap();
        assert_eq!(reveal.contact(), "0722000111");
    }

    #[tokio::test]
    async fn test_missing_contact_writes_nothing() {
        let f = fixture();
        let product = f.gateway.add_product(f.seller, None, None);

        let err = f
            .disclosure
            .reveal_at(&f.buyer, product, ContactChannel::Whatsapp, base_time())
            .await
            .unwrap_err();
        assert!(matches!(err, DisclosureError::ContactUnavailable(ContactChannel::Whatsapp)));
        assert_eq!(f.gateway.session_rows(), 0);
    }

    #[tokio::test]
    async fn test_dangerous_network_rejected_before_any_call() {
        let f = fixture();
        let product = f.gateway.add_product(f.seller, Some("0712345678"), None);
        let ctx = SessionContext::new(f.buyer.user_id, NetworkTrust::Danger);

        let err = f.disclosure.reveal_at(&ctx, product, ContactChannel::Phone, base_time()).await.unwrap_err();
        assert!(matches!(err, DisclosureError::InsecureNetwork));
        assert_eq!(err.notice().level, crate::error::NoticeLevel::Warning);
        assert_eq!(f.gateway.calls("active_contact_session"), 0);
        assert_eq!(f.gateway.session_rows(), 0);
    }

    #[tokio::test]
    async fn test_unverified_network_is_allowed() {
        let f = fixture();
        let product = f.gateway.add_product(f.seller, Some("0712345678"), None);
        let ctx = SessionContext::new(f.buyer.user_id, NetworkTrust::Unverified);

        assert!(f.disclosure.reveal_at(&ctx, product, ContactChannel::Phone, base_time()).await.is_ok());
    }

    #[tokio::test]
    async fn test_insert_failure_is_generic_and_not_retried() {
        let f = fixture();
        let product = f.gateway.add_product(f.seller, Some("0712345678"), None);
        f.gateway.fail("insert_contact_session");

        let err = f
            .disclosure
            .reveal_at(&f.buyer, product, ContactChannel::Phone, base_time())
            .await
            .unwrap_err();
        assert!(matches!(err, DisclosureError::Gateway(_)));
        assert_eq!(err.to_string(), "Failed to reveal contact");
        assert_eq!(f.gateway.calls("insert_contact_session"), 1);
    }

    #[tokio::test]
    async fn test_unknown_product() {
        let f = fixture();
        let err = f
            .disclosure
            .reveal_at(&f.buyer, Uuid::new_v4(), ContactChannel::Phone, base_time())
            .await
            .unwrap_err();
        assert!(matches!(err, DisclosureError::ProductNotFound));
    }

    #[tokio::test]
    async fn test_history_masks_and_flags_expiry() {
        let f = fixture();
        let product = f.gateway.add_product(f.seller, Some("254712345678"), None);
        let t0 = base_time();
        f.disclosure.reveal_at(&f.buyer, product, ContactChannel::Phone, t0).await.unwrap();

        let entries = f.disclosure.history_at(&f.buyer, t0 + Duration::minutes(90)).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].product_title, "Samsung A14");
        assert_eq!(entries[0].masked_contact, "0712 XXX 678");
        assert_eq!(entries[0].expiry_text, "Expires in 22h 30m");
        assert!(entries[0].active);

        let entries = f.disclosure.history_at(&f.buyer, t0 + Duration::hours(30)).await.unwrap();
        assert!(!entries[0].active);
        assert_eq!(entries[0].expiry_text, "Expired");
    }

    #[tokio::test]
    async fn test_history_survives_product_lookup_failure() {
        let f = fixture();
        let product = f.gateway.add_product(f.seller, Some("0712345678"), None);
        f.disclosure.reveal_at(&f.buyer, product, ContactChannel::Phone, base_time()).await.unwrap();
        f.gateway.fail("product");

        let entries = f.disclosure.history_at(&f.buyer, base_time()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].product_title, "Listing unavailable");
    }
}
