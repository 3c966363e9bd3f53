//! Recovery code endpoint.
//!
//! Regeneration is gated on a fresh primary-factor verification carried in
//! the request body; a recovery code cannot vouch for its own replacement.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::info;

use crate::api::handlers::{ApiError, ApiState, error_response, principal::require_auth};
use crate::mfa::rate_limit::RateLimitAction;

use super::limited;
use super::types::{RecoveryGenerateRequest, RecoveryGenerateResponse};

/// (Re)generate the caller's recovery code set.
#[utoipa::path(
    post,
    path = "/v1/mfa/recovery-codes/generate",
    request_body = RecoveryGenerateRequest,
    responses(
        (status = 200, description = "Fresh codes, shown exactly once", body = RecoveryGenerateResponse),
        (status = 400, description = "Re-authentication failed", body = ApiError),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Recovery codes cannot re-authenticate", body = ApiError),
        (status = 429, description = "Rate limited")
    ),
    tag = "mfa"
)]
pub async fn generate(
    headers: HeaderMap,
    state: Extension<Arc<ApiState>>,
    payload: Option<Json<RecoveryGenerateRequest>>,
) -> axum::response::Response {
    let ctx = match require_auth(&headers) {
        Ok(ctx) => ctx,
        Err(status) => return status.into_response(),
    };
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };
    if limited(&state, &headers, ctx.user_id, RateLimitAction::Recovery) {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited").into_response();
    }

    if let Err(err) = state
        .core()
        .login
        .reauthenticate(&ctx, request.method, &request.code)
        .await
    {
        return error_response(err);
    }

    match state.core().recovery.generate(&ctx).await {
        Ok(codes) => {
            info!(user_id = %ctx.user_id, "recovery codes regenerated");
            (StatusCode::OK, Json(RecoveryGenerateResponse { codes })).into_response()
        }
        Err(err) => error_response(err),
    }
}
