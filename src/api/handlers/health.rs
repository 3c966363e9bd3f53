//! Liveness and dependency status.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::Connection;
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

use super::ApiState;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    name: String,
    version: String,
    store: String,
    status: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service and store are healthy", body = Health),
        (status = 503, description = "Store is unreachable", body = Health)
    ),
    tag = "health"
)]
pub async fn health(state: Extension<Arc<ApiState>>) -> impl IntoResponse {
    let (store, healthy) = match state.pool() {
        Some(pool) => ("postgres", ping(pool).await),
        None => ("memory", true),
    };

    let body = Health {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: store.to_string(),
        status: if healthy { "ok" } else { "unavailable" }.to_string(),
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn ping(pool: &sqlx::PgPool) -> bool {
    match pool.acquire().await {
        Ok(mut conn) => match conn.ping().await {
            Ok(()) => true,
            Err(err) => {
                error!("failed to ping database: {err}");
                false
            }
        },
        Err(err) => {
            error!("failed to acquire database connection: {err}");
            false
        }
    }
}
