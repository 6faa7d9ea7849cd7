//! # Capability Token Service
//!
//! Stateless, signed, time-bound credentials that let an unauthenticated
//! customer act on exactly one NDR event.
//!
//! Wire format: `base64url(claims JSON) "." hex(HMAC-SHA256(secret, first part))`.
//!
//! Nothing is stored per token. Revocation is implicit: [`CapabilityTokenService::verify`]
//! re-reads the bound event and rejects the token once the event is terminal,
//! even before the token's nominal expiry.

use crate::constants::TOKEN_PURPOSE;
use crate::models::NdrEvent;
use crate::state_machine::NdrStatus;
use crate::store::{EventStore, StoreError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Token signature does not match")]
    BadSignature,

    #[error("Token issued for purpose {0}")]
    WrongPurpose(String),

    #[error("Token has expired")]
    Expired,

    #[error("Token refers to unknown event {0}")]
    EventNotFound(Uuid),

    #[error("Event {event_id} is already {status}")]
    EventAlreadyTerminal { event_id: Uuid, status: NdrStatus },

    #[error("Token signing key rejected: {0}")]
    Key(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Signed claims carried by a token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Token id, for audit correlation
    pub tid: Uuid,
    /// Bound event
    pub eid: Uuid,
    pub pur: String,
    /// Issued-at, unix seconds
    pub iat: i64,
    /// Expiry, unix seconds
    pub exp: i64,
}

impl TokenClaims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub token_id: Uuid,
    pub event_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// A token that passed every check, with the event as read during verification
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub claims: TokenClaims,
    pub event: NdrEvent,
}

impl VerifiedToken {
    pub fn event_id(&self) -> Uuid {
        self.claims.eid
    }
}

#[derive(Clone)]
pub struct CapabilityTokenService {
    secret: Arc<Vec<u8>>,
    ttl: Duration,
    store: Arc<dyn EventStore>,
}

impl std::fmt::Debug for CapabilityTokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityTokenService")
            .field("secret", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl CapabilityTokenService {
    pub fn new(secret: impl Into<Vec<u8>>, ttl: Duration, store: Arc<dyn EventStore>) -> Self {
        Self {
            secret: Arc::new(secret.into()),
            ttl,
            store,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sign a token for one event, valid for the configured TTL from `now`
    pub fn issue(&self, event_id: Uuid, now: DateTime<Utc>) -> Result<IssuedToken, TokenError> {
        let claims = TokenClaims {
            tid: Uuid::new_v4(),
            eid: event_id,
            pur: TOKEN_PURPOSE.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        // Report the instant the signed claim actually stops verifying
        let expires_at = claims.expires_at();

        let json = serde_json::to_vec(&claims).map_err(|e| TokenError::Malformed(e.to_string()))?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let signature = self.sign(payload.as_bytes())?;

        info!(
            event_id = %event_id,
            token_id = %claims.tid,
            expires_at = %expires_at,
            "Issued resolution token"
        );

        Ok(IssuedToken {
            token: format!("{payload}.{signature}"),
            token_id: claims.tid,
            event_id,
            expires_at,
        })
    }

    /// Check signature, purpose and expiry. Does not look at the event.
    pub fn decode(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, TokenError> {
        let (payload, signature) = token
            .trim()
            .split_once('.')
            .ok_or_else(|| TokenError::Malformed("missing signature".to_string()))?;

        let provided =
            hex::decode(signature).map_err(|_| TokenError::Malformed("signature is not hex".to_string()))?;
        let expected = hex::decode(self.sign(payload.as_bytes())?)
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        if provided.len() != expected.len() || !bool::from(expected.ct_eq(provided.as_slice())) {
            return Err(TokenError::BadSignature);
        }

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed("payload is not base64url".to_string()))?;
        let claims: TokenClaims =
            serde_json::from_slice(&json).map_err(|e| TokenError::Malformed(e.to_string()))?;

        if claims.pur != TOKEN_PURPOSE {
            return Err(TokenError::WrongPurpose(claims.pur));
        }
        if claims.is_expired(now) {
            debug!(event_id = %claims.eid, token_id = %claims.tid, "Resolution token expired");
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    /// Full verification: signature, purpose, expiry and the bound event still being non-terminal
    pub async fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<VerifiedToken, TokenError> {
        let claims = self.decode(token, now)?;
        let event = self
            .store
            .get(claims.eid)
            .await?
            .ok_or(TokenError::EventNotFound(claims.eid))?;

        if event.is_terminal() {
            return Err(TokenError::EventAlreadyTerminal {
                event_id: event.event_id,
                status: event.status,
            });
        }
        Ok(VerifiedToken { claims, event })
    }

    fn sign(&self, payload: &[u8]) -> Result<String, TokenError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|e| TokenError::Key(e.to_string()))?;
        mac.update(payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CarrierSignal, ClassificationSource, NdrCategory, NormalizedSignal, SignalKind};
    use crate::store::InMemoryEventStore;

    const SECRET: &str = "test-secret-with-enough-entropy-0123456789";

    async fn setup() -> (CapabilityTokenService, Arc<InMemoryEventStore>, NdrEvent) {
        let store = Arc::new(InMemoryEventStore::new());
        let now = Utc::now();
        let signal = CarrierSignal {
            carrier_id: "X".to_string(),
            shipment_reference: "S1".to_string(),
            status_code: "BAD_ADDRESS".to_string(),
            remarks: String::new(),
            attempt_number: Some(1),
            timestamp: now,
            carrier_event_key: None,
        };
        let normalized = NormalizedSignal {
            kind: SignalKind::NonDelivery,
            category: NdrCategory::AddressIssue,
            confidence: 95,
            source: ClassificationSource::StatusCode,
            ambiguous: false,
        };
        let event = NdrEvent::detect(&signal, &normalized, "k1", now, Duration::hours(48));
        store.create_if_absent(event.clone()).await.unwrap();

        let service = CapabilityTokenService::new(SECRET, Duration::days(7), store.clone());
        (service, store, event)
    }

    #[tokio::test]
    async fn test_issue_and_verify() {
        let (service, _, event) = setup().await;
        let now = Utc::now();
        let issued = service.issue(event.event_id, now).unwrap();

        assert_eq!(issued.expires_at.timestamp(), (now + Duration::days(7)).timestamp());
        let verified = service.verify(&issued.token, now).await.unwrap();
        assert_eq!(verified.event_id(), event.event_id);
        assert_eq!(verified.claims.pur, TOKEN_PURPOSE);
    }

    #[tokio::test]
    async fn test_expired_token() {
        let (service, _, event) = setup().await;
        let now = Utc::now();
        let issued = service.issue(event.event_id, now).unwrap();

        let later = now + Duration::days(7) + Duration::seconds(1);
        assert!(matches!(
            service.verify(&issued.token, later).await,
            Err(TokenError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_reported_expiry_matches_verification() {
        let (service, _, event) = setup().await;
        let now = Utc.timestamp_opt(1_772_442_000, 750_000_000).single().unwrap();
        let issued = service.issue(event.event_id, now).unwrap();

        assert!(issued.expires_at <= now + Duration::days(7));
        let just_before = issued.expires_at - Duration::milliseconds(1);
        assert!(service.verify(&issued.token, just_before).await.is_ok());
        assert!(matches!(
            service.verify(&issued.token, issued.expires_at).await,
            Err(TokenError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_tampered_token_rejected() {
        let (service, _, event) = setup().await;
        let issued = service.issue(event.event_id, Utc::now()).unwrap();

        let (payload, signature) = issued.token.split_once('.').unwrap();
        let forged_claims = TokenClaims {
            tid: Uuid::new_v4(),
            eid: Uuid::new_v4(),
            pur: TOKEN_PURPOSE.to_string(),
            iat: 0,
            exp: i64::MAX,
        };
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());
        assert_ne!(forged_payload, payload);

        let forged = format!("{forged_payload}.{signature}");
        assert!(matches!(
            service.decode(&forged, Utc::now()),
            Err(TokenError::BadSignature)
        ));
        assert!(matches!(
            service.decode("not-a-token", Utc::now()),
            Err(TokenError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_token_from_other_key_rejected() {
        let (service, store, event) = setup().await;
        let other = CapabilityTokenService::new("another-secret-entirely-0123456789", Duration::days(7), store);
        let issued = other.issue(event.event_id, Utc::now()).unwrap();

        assert!(matches!(
            service.decode(&issued.token, Utc::now()),
            Err(TokenError::BadSignature)
        ));
    }

    #[tokio::test]
    async fn test_token_scoped_to_one_event() {
        let (service, store, event_a) = setup().await;
        let now = Utc::now();
        let mut event_b = event_a.clone();
        event_b.event_id = Uuid::new_v4();
        event_b.shipment_reference = "S2".to_string();
        store.create_if_absent(event_b.clone()).await.unwrap();

        let issued = service.issue(event_a.event_id, now).unwrap();
        let verified = service.verify(&issued.token, now).await.unwrap();
        assert_eq!(verified.event.event_id, event_a.event_id);

        // Rebinding the claims to event B invalidates the signature
        let (payload, signature) = issued.token.split_once('.').unwrap();
        let mut claims: TokenClaims =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap();
        claims.eid = event_b.event_id;
        let rebound = format!(
            "{}.{signature}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap())
        );
        assert!(matches!(
            service.verify(&rebound, now).await,
            Err(TokenError::BadSignature)
        ));
    }

    #[tokio::test]
    async fn test_terminal_event_revokes_token() {
        let (service, store, event) = setup().await;
        let now = Utc::now();
        let issued = service.issue(event.event_id, now).unwrap();

        let mut resolved = event.clone();
        resolved.status = NdrStatus::Resolved;
        store.compare_and_set(resolved).await.unwrap();

        assert!(matches!(
            service.verify(&issued.token, now).await,
            Err(TokenError::EventAlreadyTerminal {
                status: NdrStatus::Resolved,
                ..
            })
        ));
        // Signature and expiry alone still check out
        assert!(service.decode(&issued.token, now).is_ok());
    }
}
