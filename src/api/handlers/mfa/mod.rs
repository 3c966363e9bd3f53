//! MFA endpoints: enrollment, login challenges, factor management.
//!
//! Handlers are thin: identity comes from the gateway headers, rate limits
//! are checked up front, and everything else is delegated to the core
//! services. Failures map onto the error taxonomy; code values never appear
//! in responses or logs.

pub(crate) mod recovery;
pub(crate) mod types;

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::handlers::{
    ApiError, ApiState, error_response,
    principal::{extract_client_ip, require_auth, user_agent},
};
use crate::mfa::{
    devices::TrustRequest,
    enrollment::EnrollmentParams,
    login::LoginGate,
    models::FactorType,
    rate_limit::{RateLimitAction, RateLimitDecision},
};

use self::types::{
    ChallengeVerifyRequest, ChallengeVerifyResponse, EnrollStartRequest, EnrollStartResponse,
    EnrollVerifyRequest, FactorResponse, GateKind, MethodsQuery, MethodsResponse,
    SendCodeRequest, SendCodeResponse,
};

/// Start enrolling a factor.
#[utoipa::path(
    post,
    path = "/v1/mfa/enroll/{method}",
    params(("method" = String, Path, description = "Factor type: totp, sms, or email")),
    request_body = EnrollStartRequest,
    responses(
        (status = 200, description = "Enrollment started", body = EnrollStartResponse),
        (status = 400, description = "Unknown method"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Factor type not permitted", body = ApiError),
        (status = 409, description = "Already enrolled", body = ApiError)
    ),
    tag = "mfa"
)]
pub async fn enroll_start(
    Path(method): Path<String>,
    headers: HeaderMap,
    state: Extension<Arc<ApiState>>,
    payload: Option<Json<EnrollStartRequest>>,
) -> axum::response::Response {
    let ctx = match require_auth(&headers) {
        Ok(ctx) => ctx,
        Err(status) => return status.into_response(),
    };
    let Some(factor_type) = FactorType::from_str(&method) else {
        return (StatusCode::BAD_REQUEST, "Unknown method").into_response();
    };
    if limited(&state, &headers, ctx.user_id, RateLimitAction::Enroll) {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited").into_response();
    }

    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let params = EnrollmentParams {
        phone: request.phone,
        email: request.email,
    };

    match state.core().enrollment.initiate(&ctx, factor_type, &params).await {
        Ok(started) => {
            let (secret, otpauth_uri) = match started.provisioning {
                Some(provisioning) => {
                    (Some(provisioning.secret_base32), Some(provisioning.otpauth_uri))
                }
                None => (None, None),
            };
            (
                StatusCode::OK,
                Json(EnrollStartResponse {
                    factor_id: started.factor_id.to_string(),
                    factor_type: started.factor_type,
                    secret,
                    otpauth_uri,
                    code_expires_at: started.code_expires_at,
                }),
            )
                .into_response()
        }
        Err(err) => error_response(err),
    }
}

/// Complete enrollment with the submitted code.
#[utoipa::path(
    post,
    path = "/v1/mfa/verify/{method}",
    params(("method" = String, Path, description = "Factor type: totp, sms, or email")),
    request_body = EnrollVerifyRequest,
    responses(
        (status = 200, description = "Factor activated", body = FactorResponse),
        (status = 400, description = "Invalid code", body = ApiError),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "No pending enrollment", body = ApiError),
        (status = 410, description = "Code expired", body = ApiError),
        (status = 429, description = "Attempts exhausted", body = ApiError)
    ),
    tag = "mfa"
)]
pub async fn enroll_verify(
    Path(method): Path<String>,
    headers: HeaderMap,
    state: Extension<Arc<ApiState>>,
    payload: Option<Json<EnrollVerifyRequest>>,
) -> axum::response::Response {
    let ctx = match require_auth(&headers) {
        Ok(ctx) => ctx,
        Err(status) => return status.into_response(),
    };
    let Some(factor_type) = FactorType::from_str(&method) else {
        return (StatusCode::BAD_REQUEST, "Unknown method").into_response();
    };
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    match state
        .core()
        .enrollment
        .complete(&ctx, factor_type, &request.code)
        .await
    {
        Ok(factor) => (StatusCode::OK, Json(FactorResponse::from(factor))).into_response(),
        Err(err) => error_response(err),
    }
}

/// Active factors and the gate for the current login attempt.
#[utoipa::path(
    get,
    path = "/v1/mfa/methods",
    params(MethodsQuery),
    responses(
        (status = 200, description = "Eligible methods", body = MethodsResponse),
        (status = 401, description = "Unauthorized")
    ),
    tag = "mfa"
)]
pub async fn methods(
    headers: HeaderMap,
    state: Extension<Arc<ApiState>>,
    Query(query): Query<MethodsQuery>,
) -> axum::response::Response {
    let ctx = match require_auth(&headers) {
        Ok(ctx) => ctx,
        Err(status) => return status.into_response(),
    };

    let gate = match state
        .core()
        .login
        .evaluate(&ctx, query.fingerprint.as_deref())
        .await
    {
        Ok(gate) => gate,
        Err(err) => return error_response(err),
    };

    let (gate, methods) = match gate {
        LoginGate::NotRequired => (GateKind::NotRequired, Vec::new()),
        LoginGate::EnrollmentRequired => (GateKind::EnrollmentRequired, Vec::new()),
        LoginGate::DeviceTrusted => {
            match state.core().login.methods_for_challenge(&ctx).await {
                Ok(methods) => (GateKind::DeviceTrusted, methods),
                Err(err) => return error_response(err),
            }
        }
        LoginGate::ChallengeRequired { methods } => (GateKind::ChallengeRequired, methods),
    };

    (StatusCode::OK, Json(MethodsResponse { gate, methods })).into_response()
}

/// (Re)issue a login challenge for an out-of-band factor.
#[utoipa::path(
    post,
    path = "/v1/mfa/send-code",
    request_body = SendCodeRequest,
    responses(
        (status = 200, description = "Code dispatched", body = SendCodeResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "No active factor of the type", body = ApiError),
        (status = 429, description = "Rate limited")
    ),
    tag = "mfa"
)]
pub async fn send_code(
    headers: HeaderMap,
    state: Extension<Arc<ApiState>>,
    payload: Option<Json<SendCodeRequest>>,
) -> axum::response::Response {
    let ctx = match require_auth(&headers) {
        Ok(ctx) => ctx,
        Err(status) => return status.into_response(),
    };
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };
    if limited(&state, &headers, ctx.user_id, RateLimitAction::SendCode) {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited").into_response();
    }

    match state.core().login.send_code(&ctx, request.method).await {
        Ok(challenge) => (
            StatusCode::OK,
            Json(SendCodeResponse {
                expires_at: challenge.expires_at,
            }),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

/// Verify a login-time code.
#[utoipa::path(
    post,
    path = "/v1/mfa/challenge",
    request_body = ChallengeVerifyRequest,
    responses(
        (status = 200, description = "Verification succeeded", body = ChallengeVerifyResponse),
        (status = 400, description = "Invalid code", body = ApiError),
        (status = 401, description = "Unauthorized"),
        (status = 410, description = "Code expired", body = ApiError),
        (status = 429, description = "Attempts exhausted or rate limited", body = ApiError)
    ),
    tag = "mfa"
)]
pub async fn challenge(
    headers: HeaderMap,
    state: Extension<Arc<ApiState>>,
    payload: Option<Json<ChallengeVerifyRequest>>,
) -> axum::response::Response {
    let ctx = match require_auth(&headers) {
        Ok(ctx) => ctx,
        Err(status) => return status.into_response(),
    };
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };
    if limited(&state, &headers, ctx.user_id, RateLimitAction::VerifyCode) {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited").into_response();
    }

    let trust = if request.trust_device {
        let Some(fingerprint) = request.fingerprint.clone() else {
            return (
                StatusCode::BAD_REQUEST,
                "trust_device requires a fingerprint",
            )
                .into_response();
        };
        Some(TrustRequest {
            fingerprint,
            user_agent: user_agent(&headers),
            ip_address: extract_client_ip(&headers),
            ttl_days: None,
        })
    } else {
        None
    };

    match state
        .core()
        .login
        .verify_for_login(&ctx, request.method, &request.code, trust)
        .await
    {
        Ok(verification) => {
            let recovery_codes_remaining = if verification.used_recovery {
                state.core().recovery.remaining(&ctx).await.ok()
            } else {
                None
            };
            (
                StatusCode::OK,
                Json(ChallengeVerifyResponse {
                    verified: true,
                    used_recovery: verification.used_recovery,
                    recovery_codes_remaining,
                }),
            )
                .into_response()
        }
        Err(err) => error_response(err),
    }
}

/// Soft-disable a factor.
#[utoipa::path(
    post,
    path = "/v1/mfa/disable/{factor_id}",
    params(("factor_id" = Uuid, Path, description = "Factor to disable")),
    responses(
        (status = 204, description = "Factor disabled"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Factor not found", body = ApiError),
        (status = 409, description = "Last factor protected", body = ApiError)
    ),
    tag = "mfa"
)]
pub async fn disable(
    Path(factor_id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<Arc<ApiState>>,
) -> axum::response::Response {
    let ctx = match require_auth(&headers) {
        Ok(ctx) => ctx,
        Err(status) => return status.into_response(),
    };

    match state.core().enrollment.disable(&ctx, factor_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

/// List active factors.
#[utoipa::path(
    get,
    path = "/v1/mfa/factors",
    responses(
        (status = 200, description = "Active factors", body = [FactorResponse]),
        (status = 401, description = "Unauthorized")
    ),
    tag = "mfa"
)]
pub async fn factors(
    headers: HeaderMap,
    state: Extension<Arc<ApiState>>,
) -> axum::response::Response {
    let ctx = match require_auth(&headers) {
        Ok(ctx) => ctx,
        Err(status) => return status.into_response(),
    };

    match state.core().enrollment.list(&ctx).await {
        Ok(factors) => {
            let factors: Vec<FactorResponse> =
                factors.into_iter().map(FactorResponse::from).collect();
            (StatusCode::OK, Json(factors)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) fn limited(
    state: &ApiState,
    headers: &HeaderMap,
    user_id: Uuid,
    action: RateLimitAction,
) -> bool {
    let ip = extract_client_ip(headers);
    state.rate_limiter().check_ip(ip.as_deref(), action) == RateLimitDecision::Limited
        || state.rate_limiter().check_user(user_id, action) == RateLimitDecision::Limited
}
