use axum::{
    extract::{FromRequest, Request},
    response::{IntoResponse, Response},
    Json,
};

use crate::handlers::sessions::SessionApiError;

/// `Json` whose rejections are reported with the session API error body.
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|rejection| {
            tracing::warn!(error = %rejection.body_text(), "Rejected request body");
            SessionApiError::bad_request(format!("Malformed request body: {}", rejection.body_text()))
                .into_response()
        })?;
        Ok(AppJson(value))
    }
}
