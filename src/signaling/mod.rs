//! Signaling: ephemeral credential issuance and session description exchange

mod http;

pub use http::OpenAiSignaling;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::error::SignalingError;
use crate::transport::SessionDescription;

/// Short-lived secret authorizing one description exchange
#[derive(Clone, PartialEq, Eq)]
pub struct EphemeralCredential {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl EphemeralCredential {
    pub fn new(value: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

impl fmt::Debug for EphemeralCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralCredential")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[async_trait]
pub trait Signaling: Send + Sync {
    async fn obtain_credential(&self) -> Result<EphemeralCredential, SignalingError>;

    /// Send the local offer, return the remote answer
    async fn exchange_description(
        &self,
        credential: &EphemeralCredential,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, SignalingError>;

    /// Release anything held for the session; called once during teardown
    async fn release(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_credential_expiry() {
        let now = Utc::now();
        let fresh = EphemeralCredential::new("ek_1", Some(now + Duration::seconds(60)));
        assert!(!fresh.is_expired_at(now));
        assert!(fresh.is_expired_at(now + Duration::seconds(61)));

        let stale = EphemeralCredential::new("ek_2", Some(now - Duration::seconds(1)));
        assert!(stale.is_expired());

        let open_ended = EphemeralCredential::new("ek_3", None);
        assert!(!open_ended.is_expired());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let credential = EphemeralCredential::new("ek_secret", None);
        let printed = format!("{:?}", credential);
        assert!(!printed.contains("ek_secret"));
        assert!(printed.contains("redacted"));
    }
}
