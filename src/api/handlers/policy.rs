//! Tenant MFA policy endpoints (admin-only).

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::handlers::{
    ApiError, ApiState, error_response,
    mfa::types::{PolicyBody, PolicyResponse},
    principal::require_auth,
};
use crate::mfa::models::{AuthContext, TenantMfaPolicy};

const ADMIN_ROLE: &str = "admin";

/// Read the tenant's MFA policy.
#[utoipa::path(
    get,
    path = "/v1/tenants/{tenant_id}/mfa/policy",
    params(("tenant_id" = Uuid, Path, description = "Tenant to read")),
    responses(
        (status = 200, description = "Current policy", body = PolicyResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin role required")
    ),
    tag = "policy"
)]
pub async fn get_policy(
    Path(tenant_id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<Arc<ApiState>>,
) -> axum::response::Response {
    let ctx = match require_admin(&headers, tenant_id) {
        Ok(ctx) => ctx,
        Err(status) => return status.into_response(),
    };

    match state.core().policies.get(ctx.tenant_id).await {
        Ok(policy) => (
            StatusCode::OK,
            Json(PolicyResponse {
                tenant_id: policy.tenant_id,
                policy: PolicyBody {
                    required_for_roles: policy.required_for_roles.into_iter().collect(),
                    allowed_factor_types: policy.allowed_factor_types.into_iter().collect(),
                    grace_period_days: policy.grace_period_days,
                    enforced_from: policy.enforced_from,
                },
            }),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

/// Update the tenant's MFA policy.
#[utoipa::path(
    post,
    path = "/v1/tenants/{tenant_id}/mfa/policy",
    params(("tenant_id" = Uuid, Path, description = "Tenant to update")),
    request_body = PolicyBody,
    responses(
        (status = 204, description = "Policy updated"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin role required"),
        (status = 500, description = "Storage failure", body = ApiError)
    ),
    tag = "policy"
)]
pub async fn update_policy(
    Path(tenant_id): Path<Uuid>,
    headers: HeaderMap,
    state: Extension<Arc<ApiState>>,
    payload: Option<Json<PolicyBody>>,
) -> axum::response::Response {
    let ctx = match require_admin(&headers, tenant_id) {
        Ok(ctx) => ctx,
        Err(status) => return status.into_response(),
    };
    let Some(Json(body)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    let policy = TenantMfaPolicy {
        tenant_id: ctx.tenant_id,
        required_for_roles: body.required_for_roles.into_iter().collect(),
        allowed_factor_types: body.allowed_factor_types.into_iter().collect(),
        grace_period_days: body.grace_period_days,
        enforced_from: body.enforced_from,
    };

    match state.core().policies.put(policy).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

/// Admins may only touch their own tenant's policy.
fn require_admin(headers: &HeaderMap, tenant_id: Uuid) -> Result<AuthContext, StatusCode> {
    let ctx = require_auth(headers)?;
    if ctx.tenant_id != tenant_id || !ctx.has_role(ADMIN_ROLE) {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(ctx)
}
