use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::sessions::SessionApiError;
use crate::{error::SessionError, middlewares::auth::JwtClaims, services::AppState};

#[derive(Debug, Deserialize)]
pub struct CleanupOldQuery {
    #[serde(rename = "olderThanDays", alias = "older_than_days")]
    pub older_than_days: Option<i64>,
}

/// POST /api/v1/sessions/admin/cleanup-expired - runs one expiry pass immediately
pub async fn cleanup_expired(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, SessionApiError> {
    let report = state
        .sweeper
        .expire_overdue()
        .await
        .map_err(|e| SessionError::Internal(format!("{:#}", e)))?;

    tracing::info!(
        admin = %claims.sub,
        expired = report.expired,
        skipped = report.skipped,
        "Manual expiration sweep"
    );
    Ok(Json(report))
}

/// DELETE /api/v1/sessions/admin/cleanup-old?olderThanDays=N
pub async fn cleanup_old(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<CleanupOldQuery>,
) -> Result<impl IntoResponse, SessionApiError> {
    let days = query
        .older_than_days
        .unwrap_or(state.config.sessions.retention_days);
    if days < 1 {
        return Err(SessionApiError::BadRequest(
            "olderThanDays must be at least 1".to_string(),
        ));
    }

    let deleted = state
        .sweeper
        .purge_older_than(days)
        .await
        .map_err(|e| SessionError::Internal(format!("{:#}", e)))?;

    tracing::info!(admin = %claims.sub, deleted, days, "Manual retention sweep");
    Ok(Json(json!({
        "deleted": deleted,
        "older_than_days": days,
    })))
}
