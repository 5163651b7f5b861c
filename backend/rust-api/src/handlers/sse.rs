use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Extension,
};
use futures::stream::{self, Stream};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use super::sessions::SessionApiError;
use crate::{
    metrics::SSE_CONNECTIONS_ACTIVE,
    middlewares::auth::JwtClaims,
    models::timer::TimerEvent,
    services::{session_service::Actor, AppState},
};

/// SSE endpoint for timer events
/// GET /api/v1/sessions/{id}/stream
///
/// Every tick re-reads the session, so the remaining time always comes from the server
/// clock and an overdue session is expired by the read itself.
pub async fn session_stream(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, SessionApiError> {
    let actor = Actor::from_claims(&claims);
    // Fail fast with a plain HTTP error for unknown or foreign sessions
    state.sessions.get_session(&actor, &session_id).await?;

    let tick_interval = tick_interval_ms();
    tracing::info!(
        "Starting SSE stream: session={}, tick_interval={}ms",
        session_id,
        tick_interval
    );

    let stream = create_timer_stream(
        state,
        actor,
        session_id,
        Duration::from_millis(tick_interval),
        Duration::from_secs(max_stream_duration_seconds()),
    );
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn max_stream_duration_seconds() -> u64 {
    std::env::var("SSE_MAX_STREAM_SECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(3 * 3600)
}

fn tick_interval_ms() -> u64 {
    std::env::var("SSE_TICK_INTERVAL_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(1000)
}

/// Keeps the connection gauge accurate however the stream ends.
struct ConnectionGuard;

impl ConnectionGuard {
    fn open() -> Self {
        SSE_CONNECTIONS_ACTIVE.inc();
        ConnectionGuard
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        SSE_CONNECTIONS_ACTIVE.dec();
    }
}

struct StreamState {
    app: Arc<AppState>,
    actor: Actor,
    session_id: String,
    tick: Duration,
    closes_at: Instant,
    first: bool,
    finished: bool,
    _guard: ConnectionGuard,
}

/// Emits a tick per interval until the session reaches a terminal state, then one final event.
fn create_timer_stream(
    app: Arc<AppState>,
    actor: Actor,
    session_id: String,
    tick: Duration,
    max_duration: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let initial = StreamState {
        app,
        actor,
        session_id,
        tick,
        closes_at: Instant::now() + max_duration,
        first: true,
        finished: false,
        _guard: ConnectionGuard::open(),
    };

    stream::unfold(initial, |mut st| async move {
        if st.finished || Instant::now() >= st.closes_at {
            return None;
        }
        if !st.first {
            sleep(st.tick).await;
        }
        st.first = false;

        let event = match st.app.sessions.get_session(&st.actor, &st.session_id).await {
            Ok(snapshot) => {
                let timer_event = TimerEvent::from_snapshot(&snapshot, st.app.sessions.now());
                if timer_event.is_final() {
                    tracing::info!(
                        "Timer stream closing: session={}, status={}",
                        st.session_id,
                        snapshot.status
                    );
                    st.finished = true;
                }
                Event::default()
                    .event(timer_event.event_name())
                    .data(timer_event.to_sse_data())
            }
            Err(err) => {
                tracing::warn!("Timer stream aborted: session={}, error={}", st.session_id, err);
                st.finished = true;
                Event::default().event("error").data(
                    json!({
                        "error": err.code(),
                        "message": err.to_string(),
                        "retryable": err.is_retryable(),
                    })
                    .to_string(),
                )
            }
        };

        Some((Ok(event), st))
    })
}
