//! Core MFA entities and the identity context they are keyed by.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, postgres::PgRow};
use std::collections::BTreeSet;
use utoipa::ToSchema;
use uuid::Uuid;

/// Kind of authentication factor a user can enroll.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum FactorType {
    Totp,
    Sms,
    Email,
}

impl FactorType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::Sms => "sms",
            Self::Email => "email",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "totp" => Some(Self::Totp),
            "sms" => Some(Self::Sms),
            "email" => Some(Self::Email),
            _ => None,
        }
    }

    /// Parse the persisted textual value into a typed enum.
    pub(crate) fn from_db(value: &str) -> Result<Self, sqlx::Error> {
        Self::from_str(value).ok_or_else(|| decode_error("factor_type", value))
    }

    #[must_use]
    pub fn all() -> [Self; 3] {
        [Self::Totp, Self::Sms, Self::Email]
    }
}

/// Lifecycle status of an enrolled factor.
///
/// `Disabled` is terminal and soft: the row is kept for its audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FactorStatus {
    Pending,
    Active,
    Disabled,
}

impl FactorStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }

    pub(crate) fn from_db(value: &str) -> Result<Self, sqlx::Error> {
        Self::from_str(value).ok_or_else(|| decode_error("status", value))
    }
}

/// What a one-time code challenge is allowed to prove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChallengePurpose {
    Enroll,
    Login,
}

impl ChallengePurpose {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enroll => "enroll",
            Self::Login => "login",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "enroll" => Some(Self::Enroll),
            "login" => Some(Self::Login),
            _ => None,
        }
    }

    pub(crate) fn from_db(value: &str) -> Result<Self, sqlx::Error> {
        Self::from_str(value).ok_or_else(|| decode_error("purpose", value))
    }
}

/// How a login-time verification is performed.
///
/// One verification strategy per tag, selected once at the orchestrator
/// boundary; recovery codes are a method here even though they are not an
/// enrollable factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LoginMethod {
    Totp,
    Sms,
    Email,
    Recovery,
}

impl LoginMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::Sms => "sms",
            Self::Email => "email",
            Self::Recovery => "recovery",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "totp" => Some(Self::Totp),
            "sms" => Some(Self::Sms),
            "email" => Some(Self::Email),
            "recovery" => Some(Self::Recovery),
            _ => None,
        }
    }

    /// The enrollable factor behind this method, if any.
    #[must_use]
    pub fn factor_type(self) -> Option<FactorType> {
        match self {
            Self::Totp => Some(FactorType::Totp),
            Self::Sms => Some(FactorType::Sms),
            Self::Email => Some(FactorType::Email),
            Self::Recovery => None,
        }
    }
}

/// Ciphertext handle for a factor secret.
///
/// The raw secret never appears in this layer; only the sealed blob is
/// stored, and the debug representation stays opaque.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedSecret(Vec<u8>);

impl SealedSecret {
    #[must_use]
    pub fn new(ciphertext: Vec<u8>) -> Self {
        Self(ciphertext)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SealedSecret({} bytes)", self.0.len())
    }
}

/// An enrolled (or in-flight) authentication factor.
///
/// At most one active factor per (user, type); a new enrollment replaces any
/// prior pending row of the same type.
#[derive(Debug, Clone)]
pub struct MfaFactor {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub factor_type: FactorType,
    pub status: FactorStatus,
    pub secret: Option<SealedSecret>,
    pub destination: Option<String>,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for MfaFactor {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let factor_type: String = row.try_get("factor_type")?;
        let status: String = row.try_get("status")?;
        let secret: Option<Vec<u8>> = row.try_get("secret")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            tenant_id: row.try_get("tenant_id")?,
            factor_type: FactorType::from_db(&factor_type)?,
            status: FactorStatus::from_db(&status)?,
            secret: secret.map(SealedSecret::new),
            destination: row.try_get("destination")?,
            created_at: row.try_get("created_at")?,
            activated_at: row.try_get("activated_at")?,
        })
    }
}

/// A live (or spent) one-time code challenge.
///
/// Exactly one per (user, purpose); issuing a new one replaces the old.
#[derive(Debug, Clone)]
pub struct OtpChallenge {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub purpose: ChallengePurpose,
    pub factor_type: FactorType,
    pub code_hash: Vec<u8>,
    pub expires_at: DateTime<Utc>,
    pub attempts_remaining: i32,
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OtpChallenge {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl<'r> FromRow<'r, PgRow> for OtpChallenge {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let purpose: String = row.try_get("purpose")?;
        let factor_type: String = row.try_get("factor_type")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            tenant_id: row.try_get("tenant_id")?,
            purpose: ChallengePurpose::from_db(&purpose)?,
            factor_type: FactorType::from_db(&factor_type)?,
            code_hash: row.try_get("code_hash")?,
            expires_at: row.try_get("expires_at")?,
            attempts_remaining: row.try_get("attempts_remaining")?,
            consumed_at: row.try_get("consumed_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// One stored recovery code: hash plus consumption marker (kept for audit).
#[derive(Debug, Clone)]
pub struct RecoveryCode {
    pub hash: String,
    pub used_at: Option<DateTime<Utc>>,
}

/// The full recovery code set for a user; regeneration replaces it whole.
#[derive(Debug, Clone)]
pub struct RecoveryCodeSet {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub batch_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub codes: Vec<RecoveryCode>,
}

impl RecoveryCodeSet {
    /// Codes still available for consumption.
    pub fn unused(&self) -> impl Iterator<Item = &RecoveryCode> {
        self.codes.iter().filter(|code| code.used_at.is_none())
    }
}

/// A device exempted from future challenges until its trust expires.
#[derive(Debug, Clone)]
pub struct TrustedDevice {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub fingerprint_hash: Vec<u8>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TrustedDevice {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl<'r> FromRow<'r, PgRow> for TrustedDevice {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            tenant_id: row.try_get("tenant_id")?,
            fingerprint_hash: row.try_get("fingerprint_hash")?,
            user_agent: row.try_get("user_agent")?,
            ip_address: row.try_get("ip_address")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

/// Per-tenant MFA enforcement configuration.
///
/// Owned by tenant administration; the MFA core treats it as read-mostly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantMfaPolicy {
    pub tenant_id: Uuid,
    pub required_for_roles: BTreeSet<String>,
    pub allowed_factor_types: BTreeSet<FactorType>,
    pub grace_period_days: u32,
    pub enforced_from: Option<DateTime<Utc>>,
}

impl TenantMfaPolicy {
    /// Default for tenants without a stored policy: MFA optional, every
    /// factor type allowed, no grace window.
    #[must_use]
    pub fn permissive(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            required_for_roles: BTreeSet::new(),
            allowed_factor_types: FactorType::all().into_iter().collect(),
            grace_period_days: 0,
            enforced_from: None,
        }
    }

    #[must_use]
    pub fn allows(&self, factor_type: FactorType) -> bool {
        self.allowed_factor_types.contains(&factor_type)
    }
}

impl<'r> FromRow<'r, PgRow> for TenantMfaPolicy {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let roles: Vec<String> = row.try_get("required_for_roles")?;
        let types: Vec<String> = row.try_get("allowed_factor_types")?;
        let mut allowed_factor_types = BTreeSet::new();
        for value in &types {
            allowed_factor_types.insert(FactorType::from_db(value)?);
        }
        let grace: i32 = row.try_get("grace_period_days")?;
        Ok(Self {
            tenant_id: row.try_get("tenant_id")?,
            required_for_roles: roles.into_iter().collect(),
            allowed_factor_types,
            grace_period_days: u32::try_from(grace).unwrap_or(0),
            enforced_from: row.try_get("enforced_from")?,
        })
    }
}

/// Identity of the caller, resolved by the fronting web layer and passed
/// explicitly into every core operation.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub roles: Vec<String>,
}

impl AuthContext {
    #[must_use]
    pub fn new(user_id: Uuid, tenant_id: Uuid, roles: Vec<String>) -> Self {
        Self {
            user_id,
            tenant_id,
            roles,
        }
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|held| held == role)
    }
}

fn decode_error(column: &str, value: &str) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("invalid {column} value: {value}"),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn factor_type_round_trips() {
        for factor_type in FactorType::all() {
            assert_eq!(FactorType::from_str(factor_type.as_str()), Some(factor_type));
        }
        assert_eq!(FactorType::from_str("webauthn"), None);
    }

    #[test]
    fn login_method_maps_to_factor_type() {
        assert_eq!(LoginMethod::Totp.factor_type(), Some(FactorType::Totp));
        assert_eq!(LoginMethod::Sms.factor_type(), Some(FactorType::Sms));
        assert_eq!(LoginMethod::Email.factor_type(), Some(FactorType::Email));
        assert_eq!(LoginMethod::Recovery.factor_type(), None);
    }

    #[test]
    fn permissive_policy_allows_every_type() {
        let policy = TenantMfaPolicy::permissive(Uuid::new_v4());
        for factor_type in FactorType::all() {
            assert!(policy.allows(factor_type));
        }
        assert!(policy.required_for_roles.is_empty());
    }

    #[test]
    fn trusted_device_expiry_is_inclusive() {
        let now = Utc::now();
        let device = TrustedDevice {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            fingerprint_hash: vec![1, 2, 3],
            user_agent: None,
            ip_address: None,
            created_at: now - Duration::days(30),
            expires_at: now,
        };
        assert!(device.is_expired(now));
        assert!(!device.is_expired(now - Duration::seconds(1)));
    }

    #[test]
    fn sealed_secret_debug_stays_opaque() {
        let sealed = SealedSecret::new(vec![0xAA; 48]);
        assert_eq!(format!("{sealed:?}"), "SealedSecret(48 bytes)");
    }

    #[test]
    fn auth_context_role_lookup() {
        let ctx = AuthContext::new(Uuid::new_v4(), Uuid::new_v4(), vec!["admin".to_string()]);
        assert!(ctx.has_role("admin"));
        assert!(!ctx.has_role("member"));
    }
}
