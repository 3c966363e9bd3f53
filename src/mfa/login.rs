//! Login challenge orchestration.
//!
//! Composes policy, enrolled factors, trusted devices, challenges, and the
//! recovery vault to answer two questions: does this login need a challenge,
//! and has it been satisfied? Each login attempt resolves to exactly one
//! outcome; the method tag picks exactly one verification strategy.

use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};

use super::{
    audit::{AuditEntry, AuditLog},
    challenge::ChallengeService,
    crypto::{self, MasterKey},
    devices::{DeviceRegistry, TrustRequest},
    directory::UserDirectory,
    enrollment::unix_now,
    error::{Error, Result},
    models::{AuthContext, ChallengePurpose, FactorType, LoginMethod, OtpChallenge},
    policy::PolicyService,
    recovery::RecoveryVault,
    store::FactorStore,
};

/// Resolution of the pre-challenge phase of a login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginGate {
    /// No active factors and policy does not require any.
    NotRequired,
    /// A non-expired trusted device matched; the challenge is waived.
    DeviceTrusted,
    /// A code must be verified through one of these methods.
    ChallengeRequired { methods: Vec<FactorType> },
    /// Policy requires MFA but nothing is enrolled; the caller must route
    /// the user into enrollment.
    EnrollmentRequired,
}

/// Outcome of a successful login-time verification.
#[derive(Debug, Clone)]
pub struct LoginVerification {
    pub method: LoginMethod,
    /// Callers may want to warn the user to regenerate their codes.
    pub used_recovery: bool,
}

#[derive(Clone)]
pub struct LoginOrchestrator {
    factors: Arc<dyn FactorStore>,
    challenges: ChallengeService,
    recovery: RecoveryVault,
    devices: DeviceRegistry,
    policies: PolicyService,
    directory: Arc<dyn UserDirectory>,
    audit: Arc<dyn AuditLog>,
    master_key: Arc<MasterKey>,
}

impl LoginOrchestrator {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        factors: Arc<dyn FactorStore>,
        challenges: ChallengeService,
        recovery: RecoveryVault,
        devices: DeviceRegistry,
        policies: PolicyService,
        directory: Arc<dyn UserDirectory>,
        audit: Arc<dyn AuditLog>,
        master_key: Arc<MasterKey>,
    ) -> Self {
        Self {
            factors,
            challenges,
            recovery,
            devices,
            policies,
            directory,
            audit,
            master_key,
        }
    }

    /// Active factors eligible under tenant policy, for the caller to
    /// present as choices.
    ///
    /// # Errors
    /// Returns an error when storage fails.
    pub async fn methods_for_challenge(&self, ctx: &AuthContext) -> Result<Vec<FactorType>> {
        let allowed = self.policies.allowed_types(ctx.tenant_id).await?;
        let methods = self
            .factors
            .list_active(ctx.user_id, ctx.tenant_id)
            .await?
            .into_iter()
            .map(|factor| factor.factor_type)
            .filter(|factor_type| allowed.contains(factor_type))
            .collect();
        Ok(methods)
    }

    /// Resolve the gate for a login attempt.
    ///
    /// # Errors
    /// Returns an error when storage fails.
    pub async fn evaluate(
        &self,
        ctx: &AuthContext,
        fingerprint: Option<&str>,
    ) -> Result<LoginGate> {
        let methods = self.methods_for_challenge(ctx).await?;
        if methods.is_empty() {
            return Ok(if self.policy_requires(ctx).await? {
                LoginGate::EnrollmentRequired
            } else {
                LoginGate::NotRequired
            });
        }

        if let Some(fingerprint) = fingerprint {
            if self.devices.is_trusted(ctx, fingerprint).await? {
                return Ok(LoginGate::DeviceTrusted);
            }
        }

        Ok(LoginGate::ChallengeRequired { methods })
    }

    /// (Re)issue a login challenge for an out-of-band factor. Each issue
    /// invalidates the previous login challenge.
    ///
    /// # Errors
    /// `NotEnrolled` without an active factor of the type;
    /// `MissingDestination` when no delivery address is known.
    pub async fn send_code(
        &self,
        ctx: &AuthContext,
        factor_type: FactorType,
    ) -> Result<OtpChallenge> {
        if factor_type == FactorType::Totp {
            return Err(Error::PolicyViolation(
                "authenticator codes are generated locally and are never sent".to_string(),
            ));
        }
        self.policies
            .ensure_type_allowed(ctx.tenant_id, factor_type)
            .await?;

        let factor = self
            .factors
            .get_active(ctx.user_id, factor_type)
            .await?
            .ok_or(Error::NotEnrolled(factor_type))?;

        let destination = match factor.destination {
            Some(destination) => destination,
            None => {
                let record = self
                    .directory
                    .lookup(ctx.user_id)
                    .await
                    .context("user directory lookup failed")?;
                match factor_type {
                    FactorType::Sms => record.and_then(|record| record.phone),
                    FactorType::Email => record.and_then(|record| record.email),
                    FactorType::Totp => None,
                }
                .ok_or(Error::MissingDestination)?
            }
        };

        self.challenges
            .issue(ctx, ChallengePurpose::Login, factor_type, &destination)
            .await
    }

    /// Verify a login-time code, dispatching by method tag.
    ///
    /// On success, registers the device when the caller opted in; a failed
    /// trust registration is logged but does not undo the verification.
    ///
    /// # Errors
    /// Verification errors from the underlying strategy; `NotEnrolled` when
    /// the named factor is not active.
    pub async fn verify_for_login(
        &self,
        ctx: &AuthContext,
        method: LoginMethod,
        code: &str,
        trust: Option<TrustRequest>,
    ) -> Result<LoginVerification> {
        let outcome = self.verify_method(ctx, method, code).await;

        if let Err(err) = &outcome {
            info!(
                user_id = %ctx.user_id,
                method = method.as_str(),
                reason = err.code(),
                "login verification failed"
            );
            self.audit.record(
                &AuditEntry::new(ctx.user_id, ctx.tenant_id, "login_verification_failed"),
            );
        }
        outcome?;

        if let Some(trust) = trust {
            if let Err(err) = self.devices.trust(ctx, trust).await {
                warn!(user_id = %ctx.user_id, "device trust registration failed: {err}");
            }
        }

        self.audit.record(
            &AuditEntry::new(ctx.user_id, ctx.tenant_id, "login_verification_succeeded"),
        );
        info!(
            user_id = %ctx.user_id,
            method = method.as_str(),
            "login verification succeeded"
        );
        Ok(LoginVerification {
            method,
            used_recovery: method == LoginMethod::Recovery,
        })
    }

    /// A fresh primary-factor verification, demanded before sensitive
    /// operations such as recovery code regeneration. Recovery codes cannot
    /// vouch for themselves.
    ///
    /// # Errors
    /// `PolicyViolation` for the recovery method; verification errors
    /// otherwise.
    pub async fn reauthenticate(
        &self,
        ctx: &AuthContext,
        method: LoginMethod,
        code: &str,
    ) -> Result<()> {
        if method == LoginMethod::Recovery {
            return Err(Error::PolicyViolation(
                "a primary factor is required to re-authenticate".to_string(),
            ));
        }
        self.verify_for_login(ctx, method, code, None).await?;
        Ok(())
    }

    async fn verify_method(
        &self,
        ctx: &AuthContext,
        method: LoginMethod,
        code: &str,
    ) -> Result<()> {
        match method {
            LoginMethod::Totp => {
                let factor = self
                    .factors
                    .get_active(ctx.user_id, FactorType::Totp)
                    .await?
                    .ok_or(Error::NotEnrolled(FactorType::Totp))?;
                crypto::verify_sealed_totp(&self.master_key, ctx, &factor, code.trim(), unix_now())
            }
            LoginMethod::Sms | LoginMethod::Email => {
                let factor_type = if method == LoginMethod::Sms {
                    FactorType::Sms
                } else {
                    FactorType::Email
                };
                self.factors
                    .get_active(ctx.user_id, factor_type)
                    .await?
                    .ok_or(Error::NotEnrolled(factor_type))?;
                self.challenges
                    .verify(ctx, ChallengePurpose::Login, factor_type, code)
                    .await?;
                Ok(())
            }
            LoginMethod::Recovery => self.recovery.consume(ctx, code).await,
        }
    }

    async fn policy_requires(&self, ctx: &AuthContext) -> Result<bool> {
        let first_login = self
            .directory
            .lookup(ctx.user_id)
            .await
            .context("user directory lookup failed")?
            .and_then(|record| record.first_login_at);
        self.policies.required_for(ctx, first_login).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mfa::audit::TracingAuditLog;
    use crate::mfa::challenge::ChallengeConfig;
    use crate::mfa::directory::NullDirectory;
    use crate::mfa::enrollment::{EnrollmentParams, EnrollmentService};
    use crate::mfa::models::TenantMfaPolicy;
    use crate::mfa::notify::RecordingNotifier;
    use crate::mfa::otp;
    use crate::mfa::recovery_codes::Pepper;
    use crate::mfa::store::{MemoryStore, PolicyStore, StoreHandles};
    use uuid::Uuid;

    struct Fixture {
        orchestrator: LoginOrchestrator,
        enrollment: EnrollmentService,
        notifier: Arc<RecordingNotifier>,
        store: Arc<MemoryStore>,
        ctx: AuthContext,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let handles = StoreHandles::from_memory(store.clone());
        let notifier = Arc::new(RecordingNotifier::new());
        let audit: Arc<dyn AuditLog> = Arc::new(TracingAuditLog);
        let master_key = Arc::new(MasterKey::generate());
        let directory: Arc<dyn UserDirectory> = Arc::new(NullDirectory);

        let challenges = ChallengeService::new(
            handles.challenges.clone(),
            notifier.clone(),
            ChallengeConfig::new(),
        );
        let policies = PolicyService::new(handles.policies.clone());
        let recovery = RecoveryVault::new(
            handles.recovery.clone(),
            Arc::new(Pepper::generate()),
            audit.clone(),
            10,
        );
        let devices = DeviceRegistry::new(handles.devices.clone());

        let enrollment = EnrollmentService::new(
            handles.factors.clone(),
            challenges.clone(),
            policies.clone(),
            directory.clone(),
            audit.clone(),
            master_key.clone(),
            "Gardi".to_string(),
        );
        let orchestrator = LoginOrchestrator::new(
            handles.factors,
            challenges,
            recovery,
            devices,
            policies,
            directory,
            audit,
            master_key,
        );

        Fixture {
            orchestrator,
            enrollment,
            notifier,
            store,
            ctx: AuthContext::new(Uuid::new_v4(), Uuid::new_v4(), vec!["member".to_string()]),
        }
    }

    async fn enroll_totp(fixture: &Fixture) -> Vec<u8> {
        let started = fixture
            .enrollment
            .initiate(&fixture.ctx, FactorType::Totp, &EnrollmentParams::default())
            .await
            .unwrap();
        let provisioning = started.provisioning.unwrap();
        let secret = totp_rs::Secret::Encoded(provisioning.secret_base32)
            .to_bytes()
            .unwrap();
        let code = otp::compute_totp(&secret, otp::TOTP_STEP_SECONDS, otp::TOTP_DIGITS, unix_now());
        fixture
            .enrollment
            .complete(&fixture.ctx, FactorType::Totp, &code)
            .await
            .unwrap();
        secret
    }

    #[tokio::test]
    async fn unenrolled_user_without_policy_passes_through() {
        let fixture = fixture();
        let gate = fixture.orchestrator.evaluate(&fixture.ctx, None).await.unwrap();
        assert_eq!(gate, LoginGate::NotRequired);
    }

    #[tokio::test]
    async fn unenrolled_user_under_policy_is_sent_to_enrollment() {
        let fixture = fixture();
        let mut policy = TenantMfaPolicy::permissive(fixture.ctx.tenant_id);
        policy.required_for_roles = ["member".to_string()].into_iter().collect();
        PolicyStore::upsert(fixture.store.as_ref(), policy)
            .await
            .unwrap();

        let gate = fixture.orchestrator.evaluate(&fixture.ctx, None).await.unwrap();
        assert_eq!(gate, LoginGate::EnrollmentRequired);
    }

    #[tokio::test]
    async fn enrolled_user_is_challenged_then_trusted_device_skips() {
        let fixture = fixture();
        let secret = enroll_totp(&fixture).await;

        let gate = fixture.orchestrator.evaluate(&fixture.ctx, None).await.unwrap();
        assert_eq!(
            gate,
            LoginGate::ChallengeRequired {
                methods: vec![FactorType::Totp]
            }
        );

        let fingerprint = "fingerprint-abcdef0123456789";
        let code = otp::compute_totp(&secret, otp::TOTP_STEP_SECONDS, otp::TOTP_DIGITS, unix_now());
        let verification = fixture
            .orchestrator
            .verify_for_login(
                &fixture.ctx,
                LoginMethod::Totp,
                &code,
                Some(TrustRequest {
                    fingerprint: fingerprint.to_string(),
                    user_agent: None,
                    ip_address: None,
                    ttl_days: None,
                }),
            )
            .await
            .unwrap();
        assert!(!verification.used_recovery);

        let gate = fixture
            .orchestrator
            .evaluate(&fixture.ctx, Some(fingerprint))
            .await
            .unwrap();
        assert_eq!(gate, LoginGate::DeviceTrusted);
    }

    #[tokio::test]
    async fn totp_outside_the_skew_window_fails() {
        let fixture = fixture();
        let secret = enroll_totp(&fixture).await;

        let stale = otp::compute_totp(
            &secret,
            otp::TOTP_STEP_SECONDS,
            otp::TOTP_DIGITS,
            unix_now() - 120,
        );
        let err = fixture
            .orchestrator
            .verify_for_login(&fixture.ctx, LoginMethod::Totp, &stale, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCode));
    }

    #[tokio::test]
    async fn sms_login_round_trip() {
        let fixture = fixture();
        let params = EnrollmentParams {
            phone: Some("+15550100123".to_string()),
            email: None,
        };
        fixture
            .enrollment
            .initiate(&fixture.ctx, FactorType::Sms, &params)
            .await
            .unwrap();
        let enroll_code = fixture.notifier.last_code().unwrap();
        fixture
            .enrollment
            .complete(&fixture.ctx, FactorType::Sms, &enroll_code)
            .await
            .unwrap();

        fixture
            .orchestrator
            .send_code(&fixture.ctx, FactorType::Sms)
            .await
            .unwrap();
        let login_code = fixture.notifier.last_code().unwrap();

        let verification = fixture
            .orchestrator
            .verify_for_login(&fixture.ctx, LoginMethod::Sms, &login_code, None)
            .await
            .unwrap();
        assert!(!verification.used_recovery);
    }

    #[tokio::test]
    async fn send_code_requires_an_active_factor() {
        let fixture = fixture();
        let err = fixture
            .orchestrator
            .send_code(&fixture.ctx, FactorType::Sms)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotEnrolled(FactorType::Sms)));

        let err = fixture
            .orchestrator
            .send_code(&fixture.ctx, FactorType::Totp)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PolicyViolation(_)));
    }

    #[tokio::test]
    async fn recovery_login_reports_the_fallback() {
        let fixture = fixture();
        enroll_totp(&fixture).await;
        let codes = fixture
            .orchestrator
            .recovery
            .generate(&fixture.ctx)
            .await
            .unwrap();

        let verification = fixture
            .orchestrator
            .verify_for_login(&fixture.ctx, LoginMethod::Recovery, &codes[0], None)
            .await
            .unwrap();
        assert!(verification.used_recovery);

        // Recovery codes cannot vouch for a regeneration.
        let err = fixture
            .orchestrator
            .reauthenticate(&fixture.ctx, LoginMethod::Recovery, &codes[1])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PolicyViolation(_)));
    }

    #[tokio::test]
    async fn policy_excluded_factor_is_not_offered() {
        let fixture = fixture();
        enroll_totp(&fixture).await;

        let mut policy = TenantMfaPolicy::permissive(fixture.ctx.tenant_id);
        policy.allowed_factor_types = [FactorType::Sms, FactorType::Email].into_iter().collect();
        PolicyStore::upsert(fixture.store.as_ref(), policy)
            .await
            .unwrap();

        let methods = fixture
            .orchestrator
            .methods_for_challenge(&fixture.ctx)
            .await
            .unwrap();
        assert!(methods.is_empty());
    }
}
