//! In-memory store.
//!
//! Mutex-guarded maps holding the same rows the PostgreSQL store would.
//! Development default and the test double for the whole core; the atomicity
//! contracts hold because every conditional update runs under one lock.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    ChallengeStore, FactorStore, PolicyStore, RecoveryCodeStore, TrustedDeviceStore,
};
use crate::mfa::models::{
    ChallengePurpose, FactorStatus, FactorType, MfaFactor, OtpChallenge, RecoveryCodeSet,
    TenantMfaPolicy, TrustedDevice,
};

#[derive(Default)]
pub struct MemoryStore {
    factors: Mutex<HashMap<Uuid, MfaFactor>>,
    challenges: Mutex<HashMap<(Uuid, ChallengePurpose), OtpChallenge>>,
    recovery: Mutex<HashMap<Uuid, RecoveryCodeSet>>,
    devices: Mutex<HashMap<(Uuid, Uuid, Vec<u8>), TrustedDevice>>,
    policies: Mutex<HashMap<Uuid, TenantMfaPolicy>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FactorStore for MemoryStore {
    async fn insert_pending(&self, factor: MfaFactor) -> Result<()> {
        let mut factors = self.factors.lock().await;
        factors.retain(|_, existing| {
            !(existing.user_id == factor.user_id
                && existing.factor_type == factor.factor_type
                && existing.status == FactorStatus::Pending)
        });
        factors.insert(factor.id, factor);
        Ok(())
    }

    async fn get(&self, user_id: Uuid, factor_id: Uuid) -> Result<Option<MfaFactor>> {
        let factors = self.factors.lock().await;
        Ok(factors
            .get(&factor_id)
            .filter(|factor| factor.user_id == user_id)
            .cloned())
    }

    async fn get_pending(
        &self,
        user_id: Uuid,
        factor_type: FactorType,
    ) -> Result<Option<MfaFactor>> {
        let factors = self.factors.lock().await;
        Ok(factors
            .values()
            .find(|factor| {
                factor.user_id == user_id
                    && factor.factor_type == factor_type
                    && factor.status == FactorStatus::Pending
            })
            .cloned())
    }

    async fn get_active(
        &self,
        user_id: Uuid,
        factor_type: FactorType,
    ) -> Result<Option<MfaFactor>> {
        let factors = self.factors.lock().await;
        Ok(factors
            .values()
            .find(|factor| {
                factor.user_id == user_id
                    && factor.factor_type == factor_type
                    && factor.status == FactorStatus::Active
            })
            .cloned())
    }

    async fn list_active(&self, user_id: Uuid, tenant_id: Uuid) -> Result<Vec<MfaFactor>> {
        let factors = self.factors.lock().await;
        let mut active: Vec<MfaFactor> = factors
            .values()
            .filter(|factor| {
                factor.user_id == user_id
                    && factor.tenant_id == tenant_id
                    && factor.status == FactorStatus::Active
            })
            .cloned()
            .collect();
        active.sort_by_key(|factor| factor.created_at);
        Ok(active)
    }

    async fn activate(
        &self,
        user_id: Uuid,
        factor_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<MfaFactor>> {
        let mut factors = self.factors.lock().await;
        let factor_type = match factors.get(&factor_id) {
            Some(target) if target.user_id == user_id && target.status == FactorStatus::Pending => {
                target.factor_type
            }
            _ => return Ok(None),
        };

        for factor in factors.values_mut() {
            if factor.user_id == user_id
                && factor.factor_type == factor_type
                && factor.status == FactorStatus::Active
            {
                factor.status = FactorStatus::Disabled;
            }
        }

        Ok(factors.get_mut(&factor_id).map(|factor| {
            factor.status = FactorStatus::Active;
            factor.activated_at = Some(at);
            factor.clone()
        }))
    }

    async fn disable(&self, user_id: Uuid, factor_id: Uuid) -> Result<bool> {
        let mut factors = self.factors.lock().await;
        match factors.get_mut(&factor_id) {
            Some(factor)
                if factor.user_id == user_id && factor.status == FactorStatus::Active =>
            {
                factor.status = FactorStatus::Disabled;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl ChallengeStore for MemoryStore {
    async fn replace(&self, challenge: OtpChallenge) -> Result<()> {
        let mut challenges = self.challenges.lock().await;
        challenges.insert((challenge.user_id, challenge.purpose), challenge);
        Ok(())
    }

    async fn get_current(
        &self,
        user_id: Uuid,
        purpose: ChallengePurpose,
    ) -> Result<Option<OtpChallenge>> {
        let challenges = self.challenges.lock().await;
        Ok(challenges.get(&(user_id, purpose)).cloned())
    }

    async fn spend_attempt(&self, challenge_id: Uuid) -> Result<i32> {
        let mut challenges = self.challenges.lock().await;
        for challenge in challenges.values_mut() {
            if challenge.id == challenge_id {
                if challenge.attempts_remaining > 0 {
                    challenge.attempts_remaining -= 1;
                }
                return Ok(challenge.attempts_remaining);
            }
        }
        Ok(0)
    }

    async fn consume(&self, challenge_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut challenges = self.challenges.lock().await;
        for challenge in challenges.values_mut() {
            if challenge.id == challenge_id {
                if challenge.consumed_at.is_none()
                    && challenge.attempts_remaining > 0
                    && !challenge.is_expired(at)
                {
                    challenge.consumed_at = Some(at);
                    challenge.attempts_remaining = 0;
                    return Ok(true);
                }
                return Ok(false);
            }
        }
        Ok(false)
    }

    async fn invalidate(&self, user_id: Uuid, purpose: ChallengePurpose) -> Result<()> {
        let mut challenges = self.challenges.lock().await;
        challenges.remove(&(user_id, purpose));
        Ok(())
    }
}

#[async_trait]
impl RecoveryCodeStore for MemoryStore {
    async fn replace_set(&self, set: RecoveryCodeSet) -> Result<()> {
        let mut recovery = self.recovery.lock().await;
        recovery.insert(set.user_id, set);
        Ok(())
    }

    async fn get_set(&self, user_id: Uuid) -> Result<Option<RecoveryCodeSet>> {
        let recovery = self.recovery.lock().await;
        Ok(recovery.get(&user_id).cloned())
    }

    async fn mark_used(
        &self,
        user_id: Uuid,
        batch_id: Uuid,
        code_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut recovery = self.recovery.lock().await;
        let Some(set) = recovery.get_mut(&user_id) else {
            return Ok(false);
        };
        if set.batch_id != batch_id {
            return Ok(false);
        }
        for code in &mut set.codes {
            if code.hash == code_hash && code.used_at.is_none() {
                code.used_at = Some(at);
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl TrustedDeviceStore for MemoryStore {
    async fn upsert(&self, device: TrustedDevice) -> Result<()> {
        let mut devices = self.devices.lock().await;
        let key = (
            device.user_id,
            device.tenant_id,
            device.fingerprint_hash.clone(),
        );
        match devices.get_mut(&key) {
            Some(existing) => {
                existing.expires_at = device.expires_at;
                existing.user_agent = device.user_agent;
                existing.ip_address = device.ip_address;
            }
            None => {
                devices.insert(key, device);
            }
        }
        Ok(())
    }

    async fn find(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        fingerprint_hash: &[u8],
    ) -> Result<Option<TrustedDevice>> {
        let devices = self.devices.lock().await;
        Ok(devices
            .get(&(user_id, tenant_id, fingerprint_hash.to_vec()))
            .cloned())
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn get(&self, tenant_id: Uuid) -> Result<Option<TenantMfaPolicy>> {
        let policies = self.policies.lock().await;
        Ok(policies.get(&tenant_id).cloned())
    }

    async fn upsert(&self, policy: TenantMfaPolicy) -> Result<()> {
        let mut policies = self.policies.lock().await;
        policies.insert(policy.tenant_id, policy);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn challenge(user_id: Uuid, attempts: i32, expires_in: Duration) -> OtpChallenge {
        let now = Utc::now();
        OtpChallenge {
            id: Uuid::new_v4(),
            user_id,
            tenant_id: Uuid::new_v4(),
            purpose: ChallengePurpose::Login,
            factor_type: FactorType::Sms,
            code_hash: vec![1, 2, 3],
            expires_at: now + expires_in,
            attempts_remaining: attempts,
            consumed_at: None,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn replacing_a_challenge_drops_the_previous_one() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let first = challenge(user, 5, Duration::minutes(10));
        let second = challenge(user, 5, Duration::minutes(10));
        let first_id = first.id;

        store.replace(first).await.unwrap();
        store.replace(second.clone()).await.unwrap();

        let current = store
            .get_current(user, ChallengePurpose::Login)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.id, second.id);
        // The invalidated challenge cannot be consumed anymore.
        assert!(!store.consume(first_id, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn spend_attempt_never_goes_below_zero() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let challenge = challenge(user, 1, Duration::minutes(10));
        let id = challenge.id;
        store.replace(challenge).await.unwrap();

        assert_eq!(store.spend_attempt(id).await.unwrap(), 0);
        assert_eq!(store.spend_attempt(id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn consume_is_single_shot() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let challenge = challenge(user, 5, Duration::minutes(10));
        let id = challenge.id;
        store.replace(challenge).await.unwrap();

        assert!(store.consume(id, Utc::now()).await.unwrap());
        assert!(!store.consume(id, Utc::now()).await.unwrap());

        let current = store
            .get_current(user, ChallengePurpose::Login)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.attempts_remaining, 0);
        assert!(current.consumed_at.is_some());
    }

    #[tokio::test]
    async fn consume_refuses_expired_challenges() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let challenge = challenge(user, 5, Duration::minutes(-1));
        let id = challenge.id;
        store.replace(challenge).await.unwrap();

        assert!(!store.consume(id, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn activation_demotes_the_previous_active_factor() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let tenant = Uuid::new_v4();
        let now = Utc::now();

        let old = MfaFactor {
            id: Uuid::new_v4(),
            user_id: user,
            tenant_id: tenant,
            factor_type: FactorType::Totp,
            status: FactorStatus::Active,
            secret: None,
            destination: None,
            created_at: now - Duration::days(1),
            activated_at: Some(now - Duration::days(1)),
        };
        let pending = MfaFactor {
            id: Uuid::new_v4(),
            user_id: user,
            tenant_id: tenant,
            factor_type: FactorType::Totp,
            status: FactorStatus::Pending,
            secret: None,
            destination: None,
            created_at: now,
            activated_at: None,
        };
        let pending_id = pending.id;
        let old_id = old.id;

        store.factors.lock().await.insert(old_id, old);
        store.insert_pending(pending).await.unwrap();

        let activated = store.activate(user, pending_id, now).await.unwrap().unwrap();
        assert_eq!(activated.status, FactorStatus::Active);

        let listed = store.list_active(user, tenant).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, pending_id);
    }

    #[tokio::test]
    async fn recovery_codes_mark_used_once() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let batch = Uuid::new_v4();
        let set = RecoveryCodeSet {
            user_id: user,
            tenant_id: Uuid::new_v4(),
            batch_id: batch,
            generated_at: Utc::now(),
            codes: vec![crate::mfa::models::RecoveryCode {
                hash: "hash-a".to_string(),
                used_at: None,
            }],
        };
        store.replace_set(set).await.unwrap();

        assert!(store.mark_used(user, batch, "hash-a", Utc::now()).await.unwrap());
        assert!(!store.mark_used(user, batch, "hash-a", Utc::now()).await.unwrap());
    }
}
