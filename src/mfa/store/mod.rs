//! Storage contracts for the MFA core.
//!
//! The traits below carry the concurrency guarantees the services rely on:
//! challenge issuance is invalidate-previous-then-insert, attempt accounting
//! is a conditional decrement that never goes below zero, and consumption is
//! a compare-and-set. Two implementations exist: [`MemoryStore`] (development
//! default and test double) and [`PgStore`] (PostgreSQL via sqlx). Both
//! uphold the same contracts; callers never see the difference.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::models::{
    ChallengePurpose, FactorType, MfaFactor, OtpChallenge, RecoveryCodeSet, TenantMfaPolicy,
    TrustedDevice,
};

/// Factor rows and their lifecycle transitions.
#[async_trait]
pub trait FactorStore: Send + Sync {
    /// Insert a pending factor, replacing any prior pending row of the same
    /// (user, type).
    async fn insert_pending(&self, factor: MfaFactor) -> Result<()>;

    async fn get(&self, user_id: Uuid, factor_id: Uuid) -> Result<Option<MfaFactor>>;

    async fn get_pending(
        &self,
        user_id: Uuid,
        factor_type: FactorType,
    ) -> Result<Option<MfaFactor>>;

    async fn get_active(&self, user_id: Uuid, factor_type: FactorType)
    -> Result<Option<MfaFactor>>;

    async fn list_active(&self, user_id: Uuid, tenant_id: Uuid) -> Result<Vec<MfaFactor>>;

    /// Atomically promote a pending factor to active, demoting any other
    /// active factor of the same type. Returns the updated row, or `None`
    /// when the factor is not pending.
    async fn activate(
        &self,
        user_id: Uuid,
        factor_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<MfaFactor>>;

    /// Soft-disable an active factor. Returns false when no active row
    /// matched.
    async fn disable(&self, user_id: Uuid, factor_id: Uuid) -> Result<bool>;
}

/// One-time code challenges keyed by (user, purpose).
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Atomically invalidate any existing challenge for the challenge's
    /// (user, purpose) and insert this one in its place.
    async fn replace(&self, challenge: OtpChallenge) -> Result<()>;

    /// The current challenge for (user, purpose), spent or not. Liveness
    /// (expiry, attempts) is the caller's decision.
    async fn get_current(
        &self,
        user_id: Uuid,
        purpose: ChallengePurpose,
    ) -> Result<Option<OtpChallenge>>;

    /// Atomically spend one attempt if any remain. Returns the attempts left
    /// afterwards; never goes below zero.
    async fn spend_attempt(&self, challenge_id: Uuid) -> Result<i32>;

    /// Atomically consume the challenge: only succeeds while it is
    /// unconsumed, unexpired, and has attempts remaining. Consumption zeroes
    /// the remaining attempts.
    async fn consume(&self, challenge_id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// Drop any challenge for (user, purpose).
    async fn invalidate(&self, user_id: Uuid, purpose: ChallengePurpose) -> Result<()>;
}

/// Recovery code sets; regeneration replaces the whole set atomically.
#[async_trait]
pub trait RecoveryCodeStore: Send + Sync {
    async fn replace_set(&self, set: RecoveryCodeSet) -> Result<()>;

    async fn get_set(&self, user_id: Uuid) -> Result<Option<RecoveryCodeSet>>;

    /// Atomically mark one code used if it is still unused. Returns false
    /// when it was already spent or does not exist.
    async fn mark_used(
        &self,
        user_id: Uuid,
        batch_id: Uuid,
        code_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Devices exempted from challenges until their trust expires.
#[async_trait]
pub trait TrustedDeviceStore: Send + Sync {
    /// Insert or refresh the record for (user, tenant, fingerprint),
    /// extending its expiry.
    async fn upsert(&self, device: TrustedDevice) -> Result<()>;

    async fn find(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        fingerprint_hash: &[u8],
    ) -> Result<Option<TrustedDevice>>;
}

/// Tenant MFA policies. Read-mostly; writes come from tenant administration.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get(&self, tenant_id: Uuid) -> Result<Option<TenantMfaPolicy>>;

    async fn upsert(&self, policy: TenantMfaPolicy) -> Result<()>;
}

/// The five store handles the core is wired with.
#[derive(Clone)]
pub struct StoreHandles {
    pub factors: Arc<dyn FactorStore>,
    pub challenges: Arc<dyn ChallengeStore>,
    pub recovery: Arc<dyn RecoveryCodeStore>,
    pub devices: Arc<dyn TrustedDeviceStore>,
    pub policies: Arc<dyn PolicyStore>,
}

impl StoreHandles {
    #[must_use]
    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            factors: store.clone(),
            challenges: store.clone(),
            recovery: store.clone(),
            devices: store.clone(),
            policies: store,
        }
    }

    #[must_use]
    pub fn from_postgres(store: Arc<PgStore>) -> Self {
        Self {
            factors: store.clone(),
            challenges: store.clone(),
            recovery: store.clone(),
            devices: store.clone(),
            policies: store,
        }
    }
}
