use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::{SessionSnapshot, SessionStatus};

/// Events pushed over `GET /sessions/{id}/stream`. Values come from the server clock.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TimerEvent {
    TimerTick(TimerTick),
    TimeExpired(SessionClosed),
    SessionClosed(SessionClosed),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimerTick {
    pub session_id: String,
    pub status: SessionStatus,
    pub remaining_seconds: u32,
    pub elapsed_seconds: u32,
    pub total_seconds: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionClosed {
    pub session_id: String,
    pub status: SessionStatus,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl TimerEvent {
    pub fn from_snapshot(snapshot: &SessionSnapshot, now: DateTime<Utc>) -> Self {
        match snapshot.status {
            SessionStatus::Expired => TimerEvent::TimeExpired(SessionClosed {
                session_id: snapshot.session_id.clone(),
                status: snapshot.status,
                timestamp: now,
                message: "Time limit exceeded".to_string(),
            }),
            SessionStatus::Completed => TimerEvent::SessionClosed(SessionClosed {
                session_id: snapshot.session_id.clone(),
                status: snapshot.status,
                timestamp: now,
                message: "Session completed".to_string(),
            }),
            _ => TimerEvent::TimerTick(TimerTick {
                session_id: snapshot.session_id.clone(),
                status: snapshot.status,
                remaining_seconds: snapshot.remaining_seconds,
                elapsed_seconds: snapshot.time_spent_seconds,
                total_seconds: snapshot.time_limit_seconds,
                timestamp: now,
            }),
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, TimerEvent::TimerTick(_))
    }

    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            TimerEvent::TimerTick(_) => "timer-tick",
            TimerEvent::TimeExpired(_) => "time-expired",
            TimerEvent::SessionClosed(_) => "session-closed",
        }
    }
}
