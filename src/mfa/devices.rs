//! Trusted device registry.
//!
//! Fingerprints are opaque client-supplied identifiers; the registry hashes
//! them before storage and does not validate their derivation — collision
//! resistance is the client's responsibility, outside this trust boundary.
//! A minimum length is enforced to reject trivially guessable values.

use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::{
    error::{Error, Result},
    models::{AuthContext, TrustedDevice},
    store::TrustedDeviceStore,
};

pub const DEFAULT_TRUST_TTL_DAYS: i64 = 30;
const MIN_FINGERPRINT_LEN: usize = 16;

/// Caller opt-in to remember the current device after a successful
/// verification.
#[derive(Debug, Clone)]
pub struct TrustRequest {
    pub fingerprint: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub ttl_days: Option<i64>,
}

#[derive(Clone)]
pub struct DeviceRegistry {
    store: Arc<dyn TrustedDeviceStore>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn TrustedDeviceStore>) -> Self {
        Self { store }
    }

    /// True iff a non-expired trust record matches the fingerprint.
    ///
    /// # Errors
    /// Returns an error when storage fails.
    pub async fn is_trusted(&self, ctx: &AuthContext, fingerprint: &str) -> Result<bool> {
        if fingerprint.len() < MIN_FINGERPRINT_LEN {
            return Ok(false);
        }
        let hash = fingerprint_hash(fingerprint);
        let device = self
            .store
            .find(ctx.user_id, ctx.tenant_id, &hash)
            .await?;
        Ok(device.is_some_and(|device| !device.is_expired(Utc::now())))
    }

    /// Record (or refresh) trust for a device, extending its expiry.
    ///
    /// # Errors
    /// `PolicyViolation` for fingerprints too short to trust; storage errors
    /// otherwise.
    pub async fn trust(&self, ctx: &AuthContext, request: TrustRequest) -> Result<()> {
        if request.fingerprint.len() < MIN_FINGERPRINT_LEN {
            return Err(Error::PolicyViolation(
                "device fingerprint is too short to trust".to_string(),
            ));
        }
        let now = Utc::now();
        let ttl_days = request.ttl_days.unwrap_or(DEFAULT_TRUST_TTL_DAYS).max(1);
        let device = TrustedDevice {
            id: Uuid::new_v4(),
            user_id: ctx.user_id,
            tenant_id: ctx.tenant_id,
            fingerprint_hash: fingerprint_hash(&request.fingerprint),
            user_agent: request.user_agent,
            ip_address: request.ip_address,
            created_at: now,
            expires_at: now + Duration::days(ttl_days),
        };
        self.store.upsert(device).await?;
        debug!(user_id = %ctx.user_id, ttl_days, "device trusted");
        Ok(())
    }
}

fn fingerprint_hash(fingerprint: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_bytes());
    hasher.finalize().to_vec()
}
