//! HTTP surface: router construction and server startup.

use anyhow::{Context, Result, anyhow};
use axum::{
    Extension,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Method, Request, header::CONTENT_TYPE},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

pub mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use handlers::ApiState;
pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Start the server.
///
/// # Errors
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve(
    state: Arc<ApiState>,
    port: u16,
    allowed_origin: Option<String>,
) -> Result<()> {
    let cors = cors_layer(allowed_origin.as_deref())?;

    let (router, api_doc) = router().split_for_parts();
    let app = router
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", api_doc))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(state)),
        );

    let listener = TcpListener::bind(("::", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;

    info!("Listening on [::]:{port}");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

/// Without a configured origin, cross-origin requests stay blocked (the
/// default CORS posture); the gateway normally fronts this service anyway.
fn cors_layer(allowed_origin: Option<&str>) -> Result<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_headers([
            CONTENT_TYPE,
            HeaderName::from_static(handlers::principal::HEADER_USER),
            HeaderName::from_static(handlers::principal::HEADER_TENANT),
            HeaderName::from_static(handlers::principal::HEADER_ROLES),
        ])
        .allow_methods([Method::GET, Method::POST]);

    match allowed_origin {
        Some(origin) => Ok(layer.allow_origin(AllowOrigin::exact(origin_header(origin)?))),
        None => Ok(layer),
    }
}

fn origin_header(allowed_origin: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(allowed_origin)
        .with_context(|| format!("Invalid allowed origin: {allowed_origin}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Allowed origin must include a valid host: {allowed_origin}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build origin header")
}
