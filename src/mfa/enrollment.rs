//! Factor enrollment lifecycle.
//!
//! State machine per (user, factor type): none → pending → active, with
//! active → disabled as an explicit terminal branch. TOTP enrollment hands
//! the secret to the caller exactly once; out-of-band enrollment proves the
//! destination with an enroll-purpose challenge before activation.

use anyhow::Context;
use chrono::Utc;
use regex::Regex;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{
    audit::{AuditEntry, AuditLog},
    challenge::ChallengeService,
    crypto::{self, MasterKey},
    directory::UserDirectory,
    error::{Error, Result},
    models::{
        AuthContext, ChallengePurpose, FactorStatus, FactorType, MfaFactor, SealedSecret,
    },
    otp::{self, TotpProvisioning},
    policy::PolicyService,
    store::FactorStore,
};

/// Method-specific parameters supplied when enrollment starts.
#[derive(Debug, Clone, Default)]
pub struct EnrollmentParams {
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// What the caller gets back from a started enrollment. The provisioning
/// payload is present for TOTP only and is never retrievable again.
#[derive(Debug, Clone)]
pub struct EnrollmentStarted {
    pub factor_id: Uuid,
    pub factor_type: FactorType,
    pub provisioning: Option<TotpProvisioning>,
    pub code_expires_at: Option<chrono::DateTime<Utc>>,
}

#[derive(Clone)]
pub struct EnrollmentService {
    factors: Arc<dyn FactorStore>,
    challenges: ChallengeService,
    policies: PolicyService,
    directory: Arc<dyn UserDirectory>,
    audit: Arc<dyn AuditLog>,
    master_key: Arc<MasterKey>,
    issuer: String,
}

impl EnrollmentService {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        factors: Arc<dyn FactorStore>,
        challenges: ChallengeService,
        policies: PolicyService,
        directory: Arc<dyn UserDirectory>,
        audit: Arc<dyn AuditLog>,
        master_key: Arc<MasterKey>,
        issuer: String,
    ) -> Self {
        Self {
            factors,
            challenges,
            policies,
            directory,
            audit,
            master_key,
            issuer,
        }
    }

    /// Start enrolling a factor. Creates the pending row, and either returns
    /// the TOTP provisioning payload or dispatches an enrollment code.
    ///
    /// # Errors
    /// `FactorTypeNotPermitted` per tenant policy, `AlreadyEnrolled` when an
    /// active factor of the type exists, `MissingDestination` when no usable
    /// phone/email is available for an out-of-band factor.
    pub async fn initiate(
        &self,
        ctx: &AuthContext,
        factor_type: FactorType,
        params: &EnrollmentParams,
    ) -> Result<EnrollmentStarted> {
        self.policies
            .ensure_type_allowed(ctx.tenant_id, factor_type)
            .await?;

        if self
            .factors
            .get_active(ctx.user_id, factor_type)
            .await?
            .is_some()
        {
            return Err(Error::AlreadyEnrolled(factor_type));
        }

        let factor_id = Uuid::new_v4();
        let now = Utc::now();

        let started = match factor_type {
            FactorType::Totp => {
                let secret = otp::generate_totp_secret();
                let sealed = crypto::seal_secret(
                    &self.master_key,
                    &secret,
                    ctx.tenant_id,
                    ctx.user_id,
                    factor_id,
                )?;
                let account = self
                    .directory
                    .lookup(ctx.user_id)
                    .await
                    .context("user directory lookup failed")?
                    .and_then(|record| record.email)
                    .unwrap_or_else(|| ctx.user_id.to_string());
                let provisioning = otp::provisioning(&secret, &self.issuer, &account);

                self.factors
                    .insert_pending(MfaFactor {
                        id: factor_id,
                        user_id: ctx.user_id,
                        tenant_id: ctx.tenant_id,
                        factor_type,
                        status: FactorStatus::Pending,
                        secret: Some(SealedSecret::new(sealed)),
                        destination: None,
                        created_at: now,
                        activated_at: None,
                    })
                    .await?;

                EnrollmentStarted {
                    factor_id,
                    factor_type,
                    provisioning: Some(provisioning),
                    code_expires_at: None,
                }
            }
            FactorType::Sms | FactorType::Email => {
                let destination = self.resolve_destination(ctx, factor_type, params).await?;

                self.factors
                    .insert_pending(MfaFactor {
                        id: factor_id,
                        user_id: ctx.user_id,
                        tenant_id: ctx.tenant_id,
                        factor_type,
                        status: FactorStatus::Pending,
                        secret: None,
                        destination: Some(destination.clone()),
                        created_at: now,
                        activated_at: None,
                    })
                    .await?;

                let challenge = self
                    .challenges
                    .issue(ctx, ChallengePurpose::Enroll, factor_type, &destination)
                    .await?;

                EnrollmentStarted {
                    factor_id,
                    factor_type,
                    provisioning: None,
                    code_expires_at: Some(challenge.expires_at),
                }
            }
        };

        info!(
            user_id = %ctx.user_id,
            factor = factor_type.as_str(),
            "enrollment initiated"
        );
        Ok(started)
    }

    /// Complete a pending enrollment with the submitted code and activate
    /// the factor.
    ///
    /// # Errors
    /// `NotEnrolled` without a pending factor; verification errors from the
    /// code check; `FactorNotFound` when activation loses a race.
    pub async fn complete(
        &self,
        ctx: &AuthContext,
        factor_type: FactorType,
        code: &str,
    ) -> Result<MfaFactor> {
        let pending = self
            .factors
            .get_pending(ctx.user_id, factor_type)
            .await?
            .ok_or(Error::NotEnrolled(factor_type))?;

        match factor_type {
            FactorType::Totp => {
                let at = unix_now();
                crypto::verify_sealed_totp(&self.master_key, ctx, &pending, code.trim(), at)?;
            }
            FactorType::Sms | FactorType::Email => {
                self.challenges
                    .verify(ctx, ChallengePurpose::Enroll, factor_type, code)
                    .await?;
            }
        }

        let activated = self
            .factors
            .activate(ctx.user_id, pending.id, Utc::now())
            .await?
            .ok_or(Error::FactorNotFound)?;

        self.challenges
            .invalidate(ctx, ChallengePurpose::Enroll)
            .await?;

        self.audit.record(
            &AuditEntry::new(ctx.user_id, ctx.tenant_id, "factor_activated")
                .with_factor(activated.id),
        );
        Ok(activated)
    }

    /// Soft-disable an active factor.
    ///
    /// # Errors
    /// `FactorNotFound` for unknown or non-active factors;
    /// `LastFactorProtected` when this is the last active factor and tenant
    /// policy requires MFA for the caller's current roles.
    pub async fn disable(&self, ctx: &AuthContext, factor_id: Uuid) -> Result<()> {
        let factor = self
            .factors
            .get(ctx.user_id, factor_id)
            .await?
            .ok_or(Error::FactorNotFound)?;
        if factor.status != FactorStatus::Active {
            return Err(Error::FactorNotFound);
        }

        let remaining = self
            .factors
            .list_active(ctx.user_id, ctx.tenant_id)
            .await?
            .into_iter()
            .filter(|other| other.id != factor_id)
            .count();

        if remaining == 0 {
            // Re-evaluated with the roles presented now; see the policy
            // module for the grace semantics.
            let first_login = self
                .directory
                .lookup(ctx.user_id)
                .await
                .context("user directory lookup failed")?
                .and_then(|record| record.first_login_at);
            if self.policies.required_for(ctx, first_login).await? {
                return Err(Error::LastFactorProtected);
            }
        }

        if !self.factors.disable(ctx.user_id, factor_id).await? {
            return Err(Error::FactorNotFound);
        }

        self.audit.record(
            &AuditEntry::new(ctx.user_id, ctx.tenant_id, "factor_disabled")
                .with_factor(factor_id),
        );
        Ok(())
    }

    /// Active factors only; secrets never leave the store.
    ///
    /// # Errors
    /// Returns an error when storage fails.
    pub async fn list(&self, ctx: &AuthContext) -> Result<Vec<MfaFactor>> {
        Ok(self.factors.list_active(ctx.user_id, ctx.tenant_id).await?)
    }

    async fn resolve_destination(
        &self,
        ctx: &AuthContext,
        factor_type: FactorType,
        params: &EnrollmentParams,
    ) -> Result<String> {
        let record = self
            .directory
            .lookup(ctx.user_id)
            .await
            .context("user directory lookup failed")?;

        let candidate = match factor_type {
            FactorType::Sms => params
                .phone
                .clone()
                .or_else(|| record.and_then(|record| record.phone)),
            FactorType::Email => params
                .email
                .clone()
                .or_else(|| record.and_then(|record| record.email)),
            FactorType::Totp => None,
        };

        let destination = candidate.ok_or(Error::MissingDestination)?;
        let valid = match factor_type {
            FactorType::Sms => valid_phone(&destination),
            FactorType::Email => valid_email(&destination),
            FactorType::Totp => false,
        };
        if !valid {
            return Err(Error::MissingDestination);
        }
        Ok(destination)
    }
}

fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email.trim()))
}

fn valid_phone(phone: &str) -> bool {
    let compact: String = phone
        .chars()
        .filter(|ch| !matches!(ch, ' ' | '-' | '(' | ')'))
        .collect();
    Regex::new(r"^\+?[0-9]{7,15}$").is_ok_and(|regex| regex.is_match(&compact))
}

pub(crate) fn unix_now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or_default()
}
