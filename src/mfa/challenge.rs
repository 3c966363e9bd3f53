//! One-time code challenge issuance and verification.
//!
//! A challenge is bound to a purpose (enrollment or login) and a user;
//! issuing a new one atomically invalidates the previous one, so at most one
//! code is ever valid per (user, purpose). Only a hash of the code is
//! stored, bound to the challenge id so hashes cannot be replayed between
//! challenges. TOTP never goes through here: authenticator codes are checked
//! directly against the user's sealed secret.

use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    error::{Error, Result},
    models::{AuthContext, ChallengePurpose, FactorType, OtpChallenge},
    notify::{CodeNotification, Notifier, NotifyChannel},
    otp,
    store::ChallengeStore,
};

const DEFAULT_ENROLL_TTL_SECONDS: i64 = 5 * 60;
// Login codes live longer to tolerate notification latency.
const DEFAULT_LOGIN_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_ATTEMPT_BUDGET: i32 = 5;
const DEFAULT_CODE_DIGITS: usize = 6;

/// Tunables for challenge issuance.
#[derive(Clone, Copy, Debug)]
pub struct ChallengeConfig {
    enroll_ttl_seconds: i64,
    login_ttl_seconds: i64,
    attempt_budget: i32,
    code_digits: usize,
}

impl ChallengeConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            enroll_ttl_seconds: DEFAULT_ENROLL_TTL_SECONDS,
            login_ttl_seconds: DEFAULT_LOGIN_TTL_SECONDS,
            attempt_budget: DEFAULT_ATTEMPT_BUDGET,
            code_digits: DEFAULT_CODE_DIGITS,
        }
    }

    #[must_use]
    pub fn with_enroll_ttl_seconds(mut self, seconds: i64) -> Self {
        self.enroll_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_login_ttl_seconds(mut self, seconds: i64) -> Self {
        self.login_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_attempt_budget(mut self, budget: i32) -> Self {
        self.attempt_budget = budget;
        self
    }

    #[must_use]
    pub fn with_code_digits(mut self, digits: usize) -> Self {
        self.code_digits = digits;
        self
    }

    #[must_use]
    pub fn attempt_budget(&self) -> i32 {
        self.attempt_budget
    }

    fn ttl_seconds(&self, purpose: ChallengePurpose) -> i64 {
        match purpose {
            ChallengePurpose::Enroll => self.enroll_ttl_seconds,
            ChallengePurpose::Login => self.login_ttl_seconds,
        }
    }
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct ChallengeService {
    store: Arc<dyn ChallengeStore>,
    notifier: Arc<dyn Notifier>,
    config: ChallengeConfig,
}

impl ChallengeService {
    #[must_use]
    pub fn new(
        store: Arc<dyn ChallengeStore>,
        notifier: Arc<dyn Notifier>,
        config: ChallengeConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    /// Issue a fresh challenge, invalidating any live one for the same
    /// (user, purpose), and dispatch the code out of band.
    ///
    /// The challenge is persisted before dispatch; a delivery failure is
    /// logged and left to the caller to retry via a new issue.
    ///
    /// # Errors
    /// Returns an error when the factor type has no delivery channel or
    /// storage fails.
    pub async fn issue(
        &self,
        ctx: &AuthContext,
        purpose: ChallengePurpose,
        factor_type: FactorType,
        destination: &str,
    ) -> Result<OtpChallenge> {
        let Some(channel) = NotifyChannel::for_factor(factor_type) else {
            return Err(Error::PolicyViolation(
                "authenticator codes are generated locally and are never issued".to_string(),
            ));
        };

        let code = otp::generate_numeric_otp(self.config.code_digits);
        let now = Utc::now();
        let id = Uuid::new_v4();
        let challenge = OtpChallenge {
            id,
            user_id: ctx.user_id,
            tenant_id: ctx.tenant_id,
            purpose,
            factor_type,
            code_hash: hash_challenge_code(id, &code),
            expires_at: now + Duration::seconds(self.config.ttl_seconds(purpose)),
            attempts_remaining: self.config.attempt_budget,
            consumed_at: None,
            created_at: now,
        };

        self.store.replace(challenge.clone()).await?;

        let notification = CodeNotification {
            channel,
            destination: destination.to_string(),
            code,
            purpose,
        };
        if let Err(err) = self.notifier.send(&notification) {
            warn!(
                user_id = %ctx.user_id,
                purpose = purpose.as_str(),
                "code dispatch failed: {err:#}"
            );
        }

        debug!(
            user_id = %ctx.user_id,
            purpose = purpose.as_str(),
            expires_at = %challenge.expires_at,
            "challenge issued"
        );
        Ok(challenge)
    }

    /// Verify a submitted code against the live (user, purpose) challenge.
    ///
    /// The challenge must have been issued for `factor_type`; a code
    /// dispatched to one channel cannot satisfy a verification against
    /// another.
    ///
    /// # Errors
    /// `ChallengeNotFound` when nothing was issued for this factor type,
    /// `ExpiredCode` past the validity window, `AttemptsExhausted` once the
    /// budget is spent (a consumed challenge counts as spent), `InvalidCode`
    /// on mismatch.
    pub async fn verify(
        &self,
        ctx: &AuthContext,
        purpose: ChallengePurpose,
        factor_type: FactorType,
        submitted: &str,
    ) -> Result<OtpChallenge> {
        let now = Utc::now();
        let challenge = self
            .store
            .get_current(ctx.user_id, purpose)
            .await?
            .ok_or(Error::ChallengeNotFound)?;

        if challenge.factor_type != factor_type {
            return Err(Error::ChallengeNotFound);
        }
        if challenge.is_expired(now) {
            return Err(Error::ExpiredCode);
        }
        if challenge.attempts_remaining <= 0 {
            return Err(Error::AttemptsExhausted);
        }

        if challenge.code_hash != hash_challenge_code(challenge.id, submitted.trim()) {
            let remaining = self.store.spend_attempt(challenge.id).await?;
            debug!(
                user_id = %ctx.user_id,
                purpose = purpose.as_str(),
                remaining,
                "challenge code mismatch"
            );
            return Err(Error::InvalidCode);
        }

        // The compare-and-set loses against a concurrent consumption or a
        // racing attempt that drained the budget.
        if !self.store.consume(challenge.id, now).await? {
            return Err(Error::AttemptsExhausted);
        }
        Ok(challenge)
    }

    /// Drop any challenge for (user, purpose), spent or not.
    ///
    /// # Errors
    /// Returns an error when storage fails.
    pub async fn invalidate(&self, ctx: &AuthContext, purpose: ChallengePurpose) -> Result<()> {
        self.store.invalidate(ctx.user_id, purpose).await?;
        Ok(())
    }
}

/// Hash a code for storage, bound to its challenge id.
fn hash_challenge_code(challenge_id: Uuid, code: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(challenge_id.as_bytes());
    hasher.update(b":");
    hasher.update(code.as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mfa::notify::RecordingNotifier;
    use crate::mfa::store::MemoryStore;
    use chrono::DateTime;

    fn context() -> AuthContext {
        AuthContext::new(Uuid::new_v4(), Uuid::new_v4(), Vec::new())
    }

    fn service(
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
    ) -> ChallengeService {
        ChallengeService::new(store, notifier, ChallengeConfig::new())
    }

    #[tokio::test]
    async fn issued_code_verifies_once() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let service = service(store, notifier.clone());
        let ctx = context();

        service
            .issue(&ctx, ChallengePurpose::Login, FactorType::Sms, "+15550100")
            .await
            .unwrap();
        let code = notifier.last_code().unwrap();

        service
            .verify(&ctx, ChallengePurpose::Login, FactorType::Sms, &code)
            .await
            .unwrap();

        // Consumption zeroes the budget; the same code never works twice.
        let err = service
            .verify(&ctx, ChallengePurpose::Login, FactorType::Sms, &code)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AttemptsExhausted));
    }

    #[tokio::test]
    async fn reissue_invalidates_the_previous_code() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let service = service(store, notifier.clone());
        let ctx = context();

        service
            .issue(&ctx, ChallengePurpose::Login, FactorType::Sms, "+15550100")
            .await
            .unwrap();
        let old_code = notifier.last_code().unwrap();

        service
            .issue(&ctx, ChallengePurpose::Login, FactorType::Sms, "+15550100")
            .await
            .unwrap();
        let new_code = notifier.last_code().unwrap();

        let err = service
            .verify(&ctx, ChallengePurpose::Login, FactorType::Sms, &old_code)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCode));

        service
            .verify(&ctx, ChallengePurpose::Login, FactorType::Sms, &new_code)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn attempt_budget_exhausts_exactly() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let service = service(store, notifier.clone());
        let ctx = context();

        service
            .issue(&ctx, ChallengePurpose::Login, FactorType::Email, "a@b.test")
            .await
            .unwrap();
        let code = notifier.last_code().unwrap();

        for _ in 0..5 {
            let err = service
                .verify(&ctx, ChallengePurpose::Login, FactorType::Email, "000000x")
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidCode));
        }

        // Budget spent: even the correct code is refused now.
        let err = service
            .verify(&ctx, ChallengePurpose::Login, FactorType::Email, &code)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AttemptsExhausted));
    }

    #[tokio::test]
    async fn expired_challenges_are_refused() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let service = service(store.clone(), notifier.clone());
        let ctx = context();

        let issued = service
            .issue(&ctx, ChallengePurpose::Enroll, FactorType::Sms, "+15550100")
            .await
            .unwrap();
        let code = notifier.last_code().unwrap();

        // Rewind the expiry instead of waiting five minutes.
        let mut expired = issued;
        expired.expires_at = DateTime::<Utc>::MIN_UTC + Duration::seconds(1);
        crate::mfa::store::ChallengeStore::replace(store.as_ref(), expired)
            .await
            .unwrap();

        let err = service
            .verify(&ctx, ChallengePurpose::Enroll, FactorType::Sms, &code)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExpiredCode));
    }

    #[tokio::test]
    async fn verifying_without_a_challenge_fails() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let service = service(store, notifier);
        let ctx = context();

        let err = service
            .verify(&ctx, ChallengePurpose::Login, FactorType::Sms, "123456")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChallengeNotFound));
    }

    #[tokio::test]
    async fn totp_never_issues_a_challenge() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let service = service(store, notifier);
        let ctx = context();

        let err = service
            .issue(&ctx, ChallengePurpose::Login, FactorType::Totp, "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PolicyViolation(_)));
    }

    #[test]
    fn code_hash_is_bound_to_the_challenge() {
        let code = "123456";
        let first = hash_challenge_code(Uuid::new_v4(), code);
        let second = hash_challenge_code(Uuid::new_v4(), code);
        assert_ne!(first, second);
    }
}
