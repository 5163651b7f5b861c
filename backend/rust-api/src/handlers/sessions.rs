use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::SessionError,
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::{
        answer::{FlagRequest, NavigateRequest, SkipRequest, SubmitAnswerRequest},
        CreateSessionRequest, ListSessionsQuery, SyncRequest,
    },
    services::{
        answer_ledger::{AnswerCommand, FlagCommand, NavigateCommand, SkipCommand},
        session_service::Actor,
        sync_reconciler::ReconcileCommand,
        AppState,
    },
};

#[derive(Debug)]
pub enum SessionApiError {
    BadRequest(String),
    Session(SessionError),
}

impl SessionApiError {
    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        SessionApiError::BadRequest(message.into())
    }
}

impl From<SessionError> for SessionApiError {
    fn from(err: SessionError) -> Self {
        SessionApiError::Session(err)
    }
}

fn status_for(err: &SessionError) -> StatusCode {
    match err {
        SessionError::NotFound { .. } => StatusCode::NOT_FOUND,
        SessionError::InvalidTransition(_) | SessionError::Conflict(_) => StatusCode::CONFLICT,
        SessionError::Forbidden(_) => StatusCode::FORBIDDEN,
        SessionError::MaxAttemptsExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SessionError::ScoringUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::Validation { .. } => StatusCode::BAD_REQUEST,
        SessionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for SessionApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            SessionApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "bad_request",
                    "message": message,
                    "retryable": false,
                }),
            ),
            SessionApiError::Session(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    tracing::error!(code = err.code(), "Session request failed: {}", err);
                }
                let mut body = json!({
                    "error": err.code(),
                    "message": err.to_string(),
                    "retryable": err.is_retryable(),
                });
                if let SessionError::Validation {
                    question_id: Some(question_id),
                    ..
                } = &err
                {
                    body["question_id"] = json!(question_id);
                }
                (status, body)
            }
        };
        (status, Json(body)).into_response()
    }
}

fn validate<T: Validate>(req: &T) -> Result<(), SessionApiError> {
    req.validate()
        .map_err(|e| SessionApiError::bad_request(format!("Validation error: {}", e)))
}

/// POST /api/v1/sessions
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<CreateSessionRequest>,
) -> Result<impl IntoResponse, SessionApiError> {
    validate(&req)?;
    let created = state
        .sessions
        .create_session(&Actor::from_claims(&claims), &req.quiz_id)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/v1/sessions/{id}
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, SessionApiError> {
    let snapshot = state
        .sessions
        .get_session(&Actor::from_claims(&claims), &session_id)
        .await?;
    Ok(Json(snapshot))
}

/// GET /api/v1/sessions/{id}/answers
pub async fn get_answers(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, SessionApiError> {
    let answers = state
        .sessions
        .get_answers(&Actor::from_claims(&claims), &session_id)
        .await?;
    Ok(Json(answers))
}

pub async fn start_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, SessionApiError> {
    let snapshot = state
        .sessions
        .start(&Actor::from_claims(&claims), &session_id)
        .await?;
    Ok(Json(snapshot))
}

pub async fn pause_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, SessionApiError> {
    let snapshot = state
        .sessions
        .pause(&Actor::from_claims(&claims), &session_id)
        .await?;
    Ok(Json(snapshot))
}

pub async fn resume_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, SessionApiError> {
    let snapshot = state
        .sessions
        .resume(&Actor::from_claims(&claims), &session_id)
        .await?;
    Ok(Json(snapshot))
}

/// POST /api/v1/sessions/{id}/complete - the response carries the final score
pub async fn complete_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, SessionApiError> {
    let snapshot = state
        .sessions
        .complete(&Actor::from_claims(&claims), &session_id)
        .await?;
    Ok(Json(snapshot))
}

/// POST /api/v1/sessions/{id}/answer
pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, SessionApiError> {
    validate(&req)?;
    let command = AnswerCommand {
        question_id: req.question_id,
        selected_answer: req.selected_answer,
        flagged: req.flagged,
        skipped: req.skipped,
        client_seq: req.client_seq,
        final_submission: req.final_submission,
    };
    let ack = state
        .sessions
        .submit_answer(&Actor::from_claims(&claims), &session_id, command)
        .await?;
    Ok(Json(ack))
}

pub async fn navigate(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<NavigateRequest>,
) -> Result<impl IntoResponse, SessionApiError> {
    validate(&req)?;
    let command = NavigateCommand {
        question_index: req.question_index,
        client_seq: req.client_seq,
    };
    let ack = state
        .sessions
        .navigate(&Actor::from_claims(&claims), &session_id, command)
        .await?;
    Ok(Json(ack))
}

/// POST /api/v1/sessions/{id}/flag/{question_id}
pub async fn flag_question(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path((session_id, question_id)): Path<(String, String)>,
    AppJson(req): AppJson<FlagRequest>,
) -> Result<impl IntoResponse, SessionApiError> {
    validate(&req)?;
    let command = FlagCommand {
        question_id,
        flagged: req.flagged,
        client_seq: req.client_seq,
    };
    let ack = state
        .sessions
        .flag(&Actor::from_claims(&claims), &session_id, command)
        .await?;
    Ok(Json(ack))
}

/// POST /api/v1/sessions/{id}/skip/{question_id}
pub async fn skip_question(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path((session_id, question_id)): Path<(String, String)>,
    AppJson(req): AppJson<SkipRequest>,
) -> Result<impl IntoResponse, SessionApiError> {
    validate(&req)?;
    let command = SkipCommand {
        question_id,
        skipped: req.skipped,
        client_seq: req.client_seq,
    };
    let ack = state
        .sessions
        .skip(&Actor::from_claims(&claims), &session_id, command)
        .await?;
    Ok(Json(ack))
}

/// POST /api/v1/sessions/{id}/sync - offline batch
pub async fn sync_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<SyncRequest>,
) -> Result<impl IntoResponse, SessionApiError> {
    validate(&req)?;
    let command = ReconcileCommand {
        device_info: req.device_info,
        events: req.events,
        current_question_index: req.current_question_index,
    };
    let response = state
        .sessions
        .reconcile(&Actor::from_claims(&claims), &session_id, command)
        .await?;
    Ok(Json(response))
}

/// GET /api/v1/sessions/active
pub async fn list_active(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<impl IntoResponse, SessionApiError> {
    let sessions = state
        .sessions
        .list_active(&Actor::from_claims(&claims), query.quiz_id, query.limit)
        .await?;
    Ok(Json(sessions))
}

/// GET /api/v1/sessions/history
pub async fn list_history(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<impl IntoResponse, SessionApiError> {
    let sessions = state
        .sessions
        .list_history(&Actor::from_claims(&claims), query.quiz_id, query.limit)
        .await?;
    Ok(Json(sessions))
}
