use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::session::SessionStatus;
use crate::utils::time::bson_datetime_as_chrono;

/// Opaque answer value. The session subsystem checks its shape against the question type but
/// never interprets it; only the scorer compares it with the answer key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<AnswerValue>),
}

impl AnswerValue {
    pub fn is_scalar(&self) -> bool {
        !matches!(self, AnswerValue::List(_))
    }

    pub fn shape(&self) -> &'static str {
        match self {
            AnswerValue::Bool(_) => "boolean",
            AnswerValue::Number(_) => "number",
            AnswerValue::Text(_) => "string",
            AnswerValue::List(_) => "array",
        }
    }
}

/// One ledger entry: the live answer state of one question within one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: String,
    #[serde(default)]
    pub selected_answer: Option<AnswerValue>,
    #[serde(default)]
    pub flagged: bool,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub time_spent_seconds: u32,
    #[serde(with = "bson_datetime_as_chrono")]
    pub answered_at: DateTime<Utc>,
    /// Sequence of the last applied answer value (0 = none yet).
    #[serde(default)]
    pub client_seq: i64,
    #[serde(default)]
    pub flag_seq: i64,
    #[serde(default)]
    pub skip_seq: i64,
}

impl AnswerRecord {
    pub fn blank(question_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            question_id: question_id.to_string(),
            selected_answer: None,
            flagged: false,
            skipped: false,
            time_spent_seconds: 0,
            answered_at: now,
            client_seq: 0,
            flag_seq: 0,
            skip_seq: 0,
        }
    }

    pub fn is_answered(&self) -> bool {
        self.selected_answer.is_some() && !self.skipped
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerView {
    pub session_id: String,
    pub question_id: String,
    pub selected_answer: Option<AnswerValue>,
    pub flagged: bool,
    pub skipped: bool,
    pub time_spent_seconds: u32,
    pub answered_at: DateTime<Utc>,
    pub client_seq: i64,
}

impl AnswerView {
    pub fn from_record(session_id: &str, record: &AnswerRecord) -> Self {
        Self {
            session_id: session_id.to_string(),
            question_id: record.question_id.clone(),
            selected_answer: record.selected_answer.clone(),
            flagged: record.flagged,
            skipped: record.skipped,
            time_spent_seconds: record.time_spent_seconds,
            answered_at: record.answered_at,
            client_seq: record.client_seq,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitAnswerRequest {
    #[validate(length(min = 1, max = 128))]
    pub question_id: String,
    #[serde(default)]
    pub selected_answer: Option<AnswerValue>,
    /// Omitted means "leave the flag alone".
    #[serde(default)]
    pub flagged: Option<bool>,
    #[serde(default)]
    pub skipped: bool,
    #[validate(range(min = 1))]
    pub client_seq: i64,
    /// Complete the session in the same write when every question is answered.
    #[serde(default)]
    pub final_submission: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct FlagRequest {
    #[serde(default = "default_true")]
    pub flagged: bool,
    #[validate(range(min = 1))]
    pub client_seq: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SkipRequest {
    #[serde(default = "default_true")]
    pub skipped: bool,
    #[validate(range(min = 1))]
    pub client_seq: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NavigateRequest {
    pub question_index: u32,
    #[validate(range(min = 1))]
    pub client_seq: i64,
}

fn default_true() -> bool {
    true
}

/// Whether a ledger write changed anything. Duplicates still count as accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEffect {
    Applied,
    Duplicate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerAck {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    pub client_seq: i64,
    pub accepted: bool,
    pub effect: LedgerEffect,
    pub session_status: SessionStatus,
    pub version: i64,
}
