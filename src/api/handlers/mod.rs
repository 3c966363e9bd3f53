//! HTTP handlers and shared handler state.

pub mod health;
pub mod mfa;
pub mod policy;
pub mod principal;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

use crate::mfa::{MfaCore, error::Error, rate_limit::RateLimiter};

/// Everything the handlers need, injected as one extension.
pub struct ApiState {
    core: MfaCore,
    rate_limiter: Arc<dyn RateLimiter>,
    pool: Option<PgPool>,
}

impl ApiState {
    #[must_use]
    pub fn new(core: MfaCore, rate_limiter: Arc<dyn RateLimiter>, pool: Option<PgPool>) -> Self {
        Self {
            core,
            rate_limiter,
            pool,
        }
    }

    #[must_use]
    pub fn core(&self) -> &MfaCore {
        &self.core
    }

    pub(crate) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    pub(crate) fn pool(&self) -> Option<&PgPool> {
        self.pool.as_ref()
    }
}

/// Machine-readable error payload. Never carries code values or secrets.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ApiError {
    pub error: String,
    pub message: String,
}

/// Map a core error onto an HTTP response.
///
/// Storage failures are logged and collapsed into an opaque 500; everything
/// else carries its taxonomy code so the UI can pick the next action.
pub(crate) fn error_response(err: Error) -> Response {
    if let Error::Storage(inner) = &err {
        error!("storage failure: {inner:#}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError {
                error: "internal".to_string(),
                message: "internal error".to_string(),
            }),
        )
            .into_response();
    }

    let status = match &err {
        Error::AlreadyEnrolled(_) | Error::LastFactorProtected => StatusCode::CONFLICT,
        Error::FactorTypeNotPermitted(_) | Error::PolicyViolation(_) => StatusCode::FORBIDDEN,
        Error::InvalidCode | Error::InvalidRecoveryCode => StatusCode::BAD_REQUEST,
        Error::ExpiredCode => StatusCode::GONE,
        Error::AttemptsExhausted => StatusCode::TOO_MANY_REQUESTS,
        Error::NotEnrolled(_) | Error::ChallengeNotFound | Error::FactorNotFound => {
            StatusCode::NOT_FOUND
        }
        Error::MissingDestination => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ApiError {
            error: err.code().to_string(),
            message: err.to_string(),
        }),
    )
        .into_response()
}
