use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::answer::AnswerRecord;
use super::quiz::{QuestionType, QuizQuestion};
use super::score::ScoreResult;
use crate::utils::time::{bson_datetime_as_chrono, bson_datetime_as_chrono_option};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    InProgress,
    Paused,
    Completed,
    Expired,
}

impl SessionStatus {
    pub const ACTIVE: [SessionStatus; 3] = [
        SessionStatus::NotStarted,
        SessionStatus::InProgress,
        SessionStatus::Paused,
    ];
    pub const TERMINAL: [SessionStatus; 2] = [SessionStatus::Completed, SessionStatus::Expired];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::NotStarted => "not_started",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Expired)
    }

    /// The edges of the session lifecycle. Everything else is an invalid transition.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus as S;
        matches!(
            (self, next),
            (S::NotStarted, S::InProgress)
                | (S::InProgress, S::Paused)
                | (S::Paused, S::InProgress)
                | (S::InProgress, S::Completed)
                | (S::InProgress, S::Expired)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionQuestion {
    pub question_id: String,
    pub kind: QuestionType,
}

impl From<&QuizQuestion> for SessionQuestion {
    fn from(question: &QuizQuestion) -> Self {
        Self {
            question_id: question.question_id.clone(),
            kind: question.kind,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct DeviceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 128))]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 64))]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 64))]
    pub app_version: Option<String>,
}

/// Last offline reconciliation applied to the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMarker {
    pub device: DeviceInfo,
    #[serde(with = "bson_datetime_as_chrono")]
    pub synced_at: DateTime<Utc>,
    pub accepted_events: u32,
}

/// One attempt by one user at one quiz, stored in MongoDB "quiz_sessions".
///
/// The answer ledger and the final score live inside the record so that every mutation is
/// a single conditional write on `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizSession {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub quiz_id: String,
    pub status: SessionStatus,

    pub time_limit_seconds: u32,
    /// Time accumulated up to `last_resumed_at`; the running interval is added on read.
    pub time_spent_ms: i64,
    pub passing_score: f64,
    pub questions: Vec<SessionQuestion>,
    pub attempt_number: u32,

    pub current_question_index: u32,
    #[serde(default)]
    pub navigation_seq: i64,
    /// Session time (ms) at the last applied answer, used to attribute time to questions.
    #[serde(default)]
    pub ledger_mark_ms: i64,

    #[serde(default, with = "bson_datetime_as_chrono_option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "bson_datetime_as_chrono_option")]
    pub paused_at: Option<DateTime<Utc>>,
    /// For expired sessions this is the instant the time limit was reached.
    #[serde(default, with = "bson_datetime_as_chrono_option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, with = "bson_datetime_as_chrono_option")]
    pub last_resumed_at: Option<DateTime<Utc>>,
    /// Set only while in progress; indexed for the expiration sweeper.
    #[serde(default, with = "bson_datetime_as_chrono_option")]
    pub deadline_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub answers: Vec<AnswerRecord>,
    #[serde(default)]
    pub score: Option<ScoreResult>,
    #[serde(default)]
    pub last_sync: Option<SyncMarker>,

    pub version: i64,
    #[serde(with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

impl QuizSession {
    pub fn time_limit_ms(&self) -> i64 {
        self.time_limit_seconds as i64 * 1000
    }

    /// Time spent as of `now`, including the running interval, capped at the limit.
    pub fn time_spent_ms_at(&self, now: DateTime<Utc>) -> i64 {
        let running = match (self.status, self.last_resumed_at) {
            (SessionStatus::InProgress, Some(resumed)) => {
                (now - resumed).num_milliseconds().max(0)
            }
            _ => 0,
        };
        (self.time_spent_ms + running).min(self.time_limit_ms())
    }

    pub fn remaining_ms_at(&self, now: DateTime<Utc>) -> i64 {
        (self.time_limit_ms() - self.time_spent_ms_at(now)).max(0)
    }

    /// Instant at which the running session reaches its time limit.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        match (self.status, self.last_resumed_at) {
            (SessionStatus::InProgress, Some(resumed)) => Some(
                resumed + Duration::milliseconds((self.time_limit_ms() - self.time_spent_ms).max(0)),
            ),
            _ => None,
        }
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    pub fn question(&self, question_id: &str) -> Option<&SessionQuestion> {
        self.questions.iter().find(|q| q.question_id == question_id)
    }

    pub fn answer(&self, question_id: &str) -> Option<&AnswerRecord> {
        self.answers.iter().find(|a| a.question_id == question_id)
    }

    pub fn answer_mut_or_insert(&mut self, question_id: &str, now: DateTime<Utc>) -> &mut AnswerRecord {
        let index = match self.answers.iter().position(|a| a.question_id == question_id) {
            Some(index) => index,
            None => {
                self.answers.push(AnswerRecord::blank(question_id, now));
                self.answers.len() - 1
            }
        };
        &mut self.answers[index]
    }

    pub fn all_questions_answered(&self) -> bool {
        self.questions.iter().all(|q| {
            self.answer(&q.question_id)
                .is_some_and(|record| record.is_answered())
        })
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            user_id: self.user_id.clone(),
            quiz_id: self.quiz_id.clone(),
            status: self.status,
            time_limit_seconds: self.time_limit_seconds,
            time_spent_seconds: (self.time_spent_ms_at(now) / 1000) as u32,
            remaining_seconds: (self.remaining_ms_at(now) / 1000) as u32,
            started_at: self.started_at,
            paused_at: self.paused_at,
            completed_at: self.completed_at,
            deadline_at: self.deadline(),
            current_question_index: self.current_question_index,
            attempt_number: self.attempt_number,
            total_questions: self.questions.len() as u32,
            answered_count: self.answers.iter().filter(|a| a.is_answered()).count() as u32,
            flagged_count: self.answers.iter().filter(|a| a.flagged).count() as u32,
            version: self.version,
            score: self.score.clone(),
        }
    }
}

/// API view of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub user_id: String,
    pub quiz_id: String,
    pub status: SessionStatus,
    pub time_limit_seconds: u32,
    pub time_spent_seconds: u32,
    pub remaining_seconds: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_at: Option<DateTime<Utc>>,
    pub current_question_index: u32,
    pub attempt_number: u32,
    pub total_questions: u32,
    pub answered_count: u32,
    pub flagged_count: u32,
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<ScoreResult>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSessionRequest {
    #[validate(length(min = 1, max = 128))]
    pub quiz_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub quiz_id: String,
    pub status: SessionStatus,
    pub time_limit_seconds: u32,
    pub attempt_number: u32,
    pub total_questions: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListSessionsQuery {
    pub quiz_id: Option<String>,
    pub limit: Option<usize>,
}
