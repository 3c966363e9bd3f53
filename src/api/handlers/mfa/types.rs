//! Request/response types for the MFA endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::mfa::models::{FactorType, LoginMethod, MfaFactor};

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct EnrollStartRequest {
    /// Destination phone number for SMS enrollment.
    pub phone: Option<String>,
    /// Destination address for email enrollment.
    pub email: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct EnrollStartResponse {
    pub factor_id: String,
    pub factor_type: FactorType,
    /// TOTP only; shown exactly once and never retrievable again.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// TOTP only; QR-encodable provisioning URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otpauth_uri: Option<String>,
    /// SMS/Email only; expiry of the dispatched code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_expires_at: Option<DateTime<Utc>>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct EnrollVerifyRequest {
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct FactorResponse {
    pub id: String,
    pub factor_type: FactorType,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
}

impl From<MfaFactor> for FactorResponse {
    fn from(factor: MfaFactor) -> Self {
        Self {
            id: factor.id.to_string(),
            factor_type: factor.factor_type,
            created_at: factor.created_at,
            activated_at: factor.activated_at,
        }
    }
}

/// Pre-challenge resolution of a login attempt.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    NotRequired,
    DeviceTrusted,
    ChallengeRequired,
    EnrollmentRequired,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MethodsResponse {
    pub gate: GateKind,
    pub methods: Vec<FactorType>,
}

#[derive(IntoParams, Deserialize, Debug)]
#[into_params(parameter_in = Query)]
pub struct MethodsQuery {
    /// Opaque device fingerprint to test against the trusted registry.
    pub fingerprint: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SendCodeRequest {
    pub method: FactorType,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SendCodeResponse {
    pub expires_at: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ChallengeVerifyRequest {
    pub method: LoginMethod,
    pub code: String,
    /// Remember this device and skip future challenges until trust expires.
    #[serde(default)]
    pub trust_device: bool,
    /// Required when `trust_device` is set; opaque client identifier.
    pub fingerprint: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ChallengeVerifyResponse {
    pub verified: bool,
    /// Set when a recovery code was consumed; the UI should suggest
    /// regeneration.
    pub used_recovery: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_codes_remaining: Option<usize>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RecoveryGenerateRequest {
    /// Fresh primary-factor proof; recovery codes cannot vouch for
    /// themselves.
    pub method: LoginMethod,
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RecoveryGenerateResponse {
    /// Plaintext codes, returned exactly once.
    pub codes: Vec<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PolicyBody {
    pub required_for_roles: Vec<String>,
    pub allowed_factor_types: Vec<FactorType>,
    pub grace_period_days: u32,
    pub enforced_from: Option<DateTime<Utc>>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PolicyResponse {
    pub tenant_id: Uuid,
    #[serde(flatten)]
    pub policy: PolicyBody,
}
