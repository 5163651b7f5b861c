use axum::{
    http::{header, Method},
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler).layer(middleware::from_fn_with_state(
                app_state.clone(),
                handlers::metrics_auth_middleware,
            )),
        )
        // Protected endpoints (require JWT)
        .nest(
            "/api/v1/sessions",
            sessions_routes(app_state.clone()).layer(cors),
        )
        .with_state(app_state)
        .layer(middleware::from_fn(middlewares::metrics::metrics_middleware))
        .layer(middleware::from_fn(middlewares::trace::trace_context_middleware))
        .layer(TraceLayer::new_for_http())
}

fn sessions_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    let admin_routes = Router::new()
        .route(
            "/admin/cleanup-expired",
            post(handlers::admin::cleanup_expired),
        )
        .route("/admin/cleanup-old", delete(handlers::admin::cleanup_old))
        .route_layer(middleware::from_fn(
            middlewares::auth::admin_guard_middleware,
        ));

    Router::new()
        .route("/", post(handlers::sessions::create_session))
        .route("/active", get(handlers::sessions::list_active))
        .route("/history", get(handlers::sessions::list_history))
        .route("/{id}", get(handlers::sessions::get_session))
        .route("/{id}/start", post(handlers::sessions::start_session))
        .route("/{id}/pause", post(handlers::sessions::pause_session))
        .route("/{id}/resume", post(handlers::sessions::resume_session))
        .route("/{id}/complete", post(handlers::sessions::complete_session))
        .route("/{id}/answers", get(handlers::sessions::get_answers))
        .route("/{id}/answer", post(handlers::sessions::submit_answer))
        .route("/{id}/navigate", post(handlers::sessions::navigate))
        .route(
            "/{id}/flag/{question_id}",
            post(handlers::sessions::flag_question),
        )
        .route(
            "/{id}/skip/{question_id}",
            post(handlers::sessions::skip_question),
        )
        .route("/{id}/sync", post(handlers::sessions::sync_session))
        .route("/{id}/stream", get(handlers::sse::session_stream))
        .merge(admin_routes)
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::auth::auth_middleware,
        ))
}
