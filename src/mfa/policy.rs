//! Tenant policy evaluation.
//!
//! Decides whether MFA is required for a caller and which factor types a
//! tenant permits. Tenants without a stored policy fall back to the
//! permissive default.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::{
    error::{Error, Result},
    models::{AuthContext, FactorType, TenantMfaPolicy},
    store::PolicyStore,
};

/// MFA is required when the caller holds a covered role, enforcement has
/// started, and the caller is outside any grace window. Grace applies only
/// when the first login is known; unknown history gets none.
#[must_use]
pub fn is_required(
    policy: &TenantMfaPolicy,
    roles: &[String],
    first_login_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    if !roles
        .iter()
        .any(|role| policy.required_for_roles.contains(role))
    {
        return false;
    }
    if let Some(enforced_from) = policy.enforced_from {
        if now < enforced_from {
            return false;
        }
    }
    if policy.grace_period_days > 0 {
        if let Some(first_login) = first_login_at {
            let grace_ends = first_login + Duration::days(i64::from(policy.grace_period_days));
            if now < grace_ends {
                return false;
            }
        }
    }
    true
}

#[derive(Clone)]
pub struct PolicyService {
    store: Arc<dyn PolicyStore>,
}

impl PolicyService {
    #[must_use]
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self { store }
    }

    /// The tenant's policy, or the permissive default when none is stored.
    ///
    /// # Errors
    /// Returns an error when storage fails.
    pub async fn get(&self, tenant_id: uuid::Uuid) -> Result<TenantMfaPolicy> {
        Ok(self
            .store
            .get(tenant_id)
            .await?
            .unwrap_or_else(|| TenantMfaPolicy::permissive(tenant_id)))
    }

    /// Replace the tenant's policy.
    ///
    /// # Errors
    /// Returns an error when storage fails.
    pub async fn put(&self, policy: TenantMfaPolicy) -> Result<()> {
        self.store.upsert(policy).await?;
        Ok(())
    }

    /// Whether the caller must present a second factor.
    ///
    /// # Errors
    /// Returns an error when storage fails.
    pub async fn required_for(
        &self,
        ctx: &AuthContext,
        first_login_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let policy = self.get(ctx.tenant_id).await?;
        Ok(is_required(&policy, &ctx.roles, first_login_at, Utc::now()))
    }

    /// Factor types the tenant permits for enrollment.
    ///
    /// # Errors
    /// Returns an error when storage fails.
    pub async fn allowed_types(&self, tenant_id: uuid::Uuid) -> Result<BTreeSet<FactorType>> {
        Ok(self.get(tenant_id).await?.allowed_factor_types)
    }

    /// Reject enrollment of a type the tenant does not permit.
    ///
    /// # Errors
    /// `FactorTypeNotPermitted` when the type is excluded by policy.
    pub async fn ensure_type_allowed(
        &self,
        tenant_id: uuid::Uuid,
        factor_type: FactorType,
    ) -> Result<()> {
        if self.get(tenant_id).await?.allows(factor_type) {
            Ok(())
        } else {
            Err(Error::FactorTypeNotPermitted(factor_type))
        }
    }
}
