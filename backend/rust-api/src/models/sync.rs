use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::answer::AnswerValue;
use super::session::{DeviceInfo, SessionSnapshot};

/// Batch of events recorded by a client while offline.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SyncRequest {
    #[serde(default)]
    #[validate(nested)]
    pub device_info: DeviceInfo,
    #[serde(alias = "answers", default)]
    #[validate(length(max = 500))]
    pub events: Vec<SyncEvent>,
    #[serde(default)]
    pub current_question_index: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub client_seq: i64,
    /// Device clock at the time the event was recorded.
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: SyncEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEventKind {
    Answer {
        question_id: String,
        #[serde(default)]
        selected_answer: Option<AnswerValue>,
        #[serde(default)]
        flagged: Option<bool>,
        #[serde(default)]
        skipped: bool,
    },
    Navigate {
        question_index: u32,
    },
    Flag {
        question_id: String,
        #[serde(default = "default_true")]
        flagged: bool,
    },
    Skip {
        question_id: String,
        #[serde(default = "default_true")]
        skipped: bool,
    },
}

fn default_true() -> bool {
    true
}

impl SyncEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            SyncEventKind::Answer { .. } => "answer",
            SyncEventKind::Navigate { .. } => "navigate",
            SyncEventKind::Flag { .. } => "flag",
            SyncEventKind::Skip { .. } => "skip",
        }
    }

    pub fn question_id(&self) -> Option<&str> {
        match self {
            SyncEventKind::Answer { question_id, .. }
            | SyncEventKind::Flag { question_id, .. }
            | SyncEventKind::Skip { question_id, .. } => Some(question_id),
            SyncEventKind::Navigate { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Applied,
    Duplicate,
    Rejected,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Applied => "applied",
            EventStatus::Duplicate => "duplicate",
            EventStatus::Rejected => "rejected",
        }
    }
}

/// Per-event verdict; clients drop accepted events from their outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventResult {
    pub client_seq: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    pub status: EventStatus,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl EventResult {
    pub fn new(event: &SyncEvent, status: EventStatus, reason: Option<String>) -> Self {
        Self {
            client_seq: event.client_seq,
            kind: event.kind.name().to_string(),
            question_id: event.kind.question_id().map(str::to_string),
            status,
            accepted: status != EventStatus::Rejected,
            reason,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub session: SessionSnapshot,
    pub results: Vec<EventResult>,
    pub accepted_count: u32,
    pub rejected_count: u32,
}
