/// Failure of a session-store operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session {0} not found")]
    NotFound(String),

    /// The conditional write lost against a concurrent writer.
    #[error("session {id} was modified concurrently (expected version {expected})")]
    VersionConflict { id: String, expected: i64 },

    #[error("session {0} already exists")]
    Duplicate(String),

    #[error("session store failure: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Failure of an external collaborator (quiz catalog, question bank, attempt counter).
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("{0} is unreachable")]
    Unavailable(String),

    #[error("catalog failure: {0}")]
    Backend(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("session {0} is being modified concurrently, retry later")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("maximum attempts ({max_attempts}) reached for quiz {quiz_id}")]
    MaxAttemptsExceeded { quiz_id: String, max_attempts: u32 },

    #[error("scoring is temporarily unavailable: {0}")]
    ScoringUnavailable(String),

    #[error("validation failed: {message}")]
    Validation {
        question_id: Option<String>,
        message: String,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    pub fn session_not_found(id: impl Into<String>) -> Self {
        SessionError::NotFound {
            entity: "session",
            id: id.into(),
        }
    }

    pub fn invalid_transition(message: impl Into<String>) -> Self {
        SessionError::InvalidTransition(message.into())
    }

    pub fn validation(question_id: impl Into<String>, message: impl Into<String>) -> Self {
        let question_id = question_id.into();
        SessionError::Validation {
            message: format!("question {}: {}", question_id, message.into()),
            question_id: Some(question_id),
        }
    }

    /// Stable machine-readable code used in API error bodies and metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NotFound { .. } => "not_found",
            SessionError::InvalidTransition(_) => "invalid_transition",
            SessionError::Conflict(_) => "conflict",
            SessionError::Forbidden(_) => "forbidden",
            SessionError::MaxAttemptsExceeded { .. } => "max_attempts_exceeded",
            SessionError::ScoringUnavailable(_) => "scoring_unavailable",
            SessionError::Validation { .. } => "validation_error",
            SessionError::Internal(_) => "internal",
        }
    }

    /// Whether a client may retry the same request with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::Conflict(_) | SessionError::ScoringUnavailable(_)
        )
    }
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => SessionError::session_not_found(id),
            StoreError::VersionConflict { id, .. } => SessionError::Conflict(id),
            StoreError::Duplicate(id) => {
                SessionError::Internal(format!("duplicate session id {}", id))
            }
            StoreError::Backend(e) => SessionError::Internal(format!("{:#}", e)),
        }
    }
}

impl From<CatalogError> for SessionError {
    fn from(err: CatalogError) -> Self {
        SessionError::Internal(err.to_string())
    }
}
