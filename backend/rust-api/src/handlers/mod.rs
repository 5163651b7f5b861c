use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics;
use crate::services::AppState;

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mongodb = match &state.mongo {
        Some(mongo) => {
            ping_dependency(
                "MongoDB",
                Duration::from_secs(1),
                mongo.run_command(mongodb::bson::doc! { "ping": 1 }),
            )
            .await
        }
        None => json!({ "status": "not_configured" }),
    };
    let redis = match &state.redis {
        Some(redis) => {
            let mut conn = redis.clone();
            ping_dependency(
                "Redis",
                Duration::from_millis(500),
                redis::cmd("PING").query_async::<String>(&mut conn),
            )
            .await
        }
        None => json!({ "status": "not_configured" }),
    };

    let healthy = [&mongodb, &redis]
        .iter()
        .all(|dependency| dependency["status"] != "unhealthy");
    let (status_code, status) = if healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status_code,
        Json(json!({
            "status": status,
            "service": "examprep-api",
            "version": env!("CARGO_PKG_VERSION"),
            "dependencies": { "mongodb": mongodb, "redis": redis }
        })),
    )
}

/// Runs one dependency ping with a deadline and reports it as a JSON status object.
async fn ping_dependency<F, T, E>(name: &str, limit: Duration, ping: F) -> serde_json::Value
where
    F: IntoFuture<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(limit, ping).await {
        Ok(Ok(_)) => json!({ "status": "healthy" }),
        Ok(Err(e)) => json!({
            "status": "unhealthy",
            "error": format!("{} error: {}", name, e),
        }),
        Err(_) => json!({
            "status": "unhealthy",
            "error": format!("{} timeout after {}ms", name, limit.as_millis()),
        }),
    }
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}

/// Basic auth guard for `/metrics`. Without configured credentials the endpoint stays closed.
pub async fn metrics_auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let expected = state.config.metrics_auth.as_deref().ok_or_else(|| {
        tracing::warn!("METRICS_AUTH is not configured, refusing /metrics");
        StatusCode::UNAUTHORIZED
    })?;

    let encoded = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let decoded = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

    if credentials != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

pub mod admin;
pub mod sessions;
pub mod sse;
