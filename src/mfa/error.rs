//! Error taxonomy for the MFA core.
//!
//! Every verification failure is recoverable by the caller (retry, re-issue,
//! fall back to a recovery code) except `AttemptsExhausted`, which requires a
//! fresh challenge. Code values and secrets never appear in error output.

use super::models::FactorType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("an active {} factor is already enrolled", .0.as_str())]
    AlreadyEnrolled(FactorType),
    #[error("factor type {} is not permitted by tenant policy", .0.as_str())]
    FactorTypeNotPermitted(FactorType),
    #[error("invalid code")]
    InvalidCode,
    #[error("code expired")]
    ExpiredCode,
    #[error("verification attempts exhausted")]
    AttemptsExhausted,
    #[error("invalid recovery code")]
    InvalidRecoveryCode,
    #[error("cannot disable the last active factor while policy requires one")]
    LastFactorProtected,
    #[error("no enrolled {} factor", .0.as_str())]
    NotEnrolled(FactorType),
    #[error("no live challenge for this purpose")]
    ChallengeNotFound,
    #[error("factor not found")]
    FactorNotFound,
    #[error("no destination available for code delivery")]
    MissingDestination,
    #[error("{0}")]
    PolicyViolation(String),
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable machine-readable identifier, used in API error payloads.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyEnrolled(_) => "already_enrolled",
            Self::FactorTypeNotPermitted(_) => "factor_type_not_permitted",
            Self::InvalidCode => "invalid_code",
            Self::ExpiredCode => "expired_code",
            Self::AttemptsExhausted => "attempts_exhausted",
            Self::InvalidRecoveryCode => "invalid_recovery_code",
            Self::LastFactorProtected => "last_factor_protected",
            Self::NotEnrolled(_) => "not_enrolled",
            Self::ChallengeNotFound => "challenge_not_found",
            Self::FactorNotFound => "factor_not_found",
            Self::MissingDestination => "missing_destination",
            Self::PolicyViolation(_) => "policy_violation",
            Self::Storage(_) => "internal",
        }
    }
}
