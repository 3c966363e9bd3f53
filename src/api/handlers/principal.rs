//! Caller identity extraction.
//!
//! The fronting web layer authenticates the user (sessions, tokens — out of
//! scope here) and forwards the resolved identity in trusted headers. These
//! headers are only as trustworthy as the gateway that sets them; this
//! service must never be exposed without one stripping inbound copies.

use axum::http::{HeaderMap, StatusCode};
use uuid::Uuid;

use crate::mfa::models::AuthContext;

pub const HEADER_USER: &str = "x-gardi-user";
pub const HEADER_TENANT: &str = "x-gardi-tenant";
pub const HEADER_ROLES: &str = "x-gardi-roles";

/// Build the caller's [`AuthContext`] from gateway headers, or 401.
///
/// # Errors
/// Returns `401 Unauthorized` when either identity header is missing or not
/// a UUID.
pub fn require_auth(headers: &HeaderMap) -> Result<AuthContext, StatusCode> {
    let user_id = header_uuid(headers, HEADER_USER).ok_or(StatusCode::UNAUTHORIZED)?;
    let tenant_id = header_uuid(headers, HEADER_TENANT).ok_or(StatusCode::UNAUTHORIZED)?;
    let roles = headers
        .get(HEADER_ROLES)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|role| !role.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();
    Ok(AuthContext::new(user_id, tenant_id, roles))
}

/// Extract a client IP for rate limiting from common proxy headers.
pub(crate) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// The caller's user agent, for trust records and audit entries.
pub(crate) fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

fn header_uuid(headers: &HeaderMap, name: &str) -> Option<Uuid> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
}
