//! Per-question answer ledger of a session.
//!
//! Every write carries a client-assigned `client_seq`. A field is only overwritten by a write
//! with a strictly greater sequence than the one that last wrote it; anything else is a
//! duplicate and reports success without changing state. These functions do not check the
//! session status: the state machine and the reconciler decide when the ledger may be written.

use chrono::{DateTime, Utc};

use crate::error::SessionError;
use crate::models::{AnswerValue, LedgerEffect, QuestionType, QuizSession, SessionQuestion};

#[derive(Debug, Clone)]
pub struct AnswerCommand {
    pub question_id: String,
    pub selected_answer: Option<AnswerValue>,
    /// `None` leaves the flag as it is.
    pub flagged: Option<bool>,
    pub skipped: bool,
    pub client_seq: i64,
    pub final_submission: bool,
}

#[derive(Debug, Clone)]
pub struct FlagCommand {
    pub question_id: String,
    pub flagged: bool,
    pub client_seq: i64,
}

#[derive(Debug, Clone)]
pub struct SkipCommand {
    pub question_id: String,
    pub skipped: bool,
    pub client_seq: i64,
}

#[derive(Debug, Clone)]
pub struct NavigateCommand {
    pub question_index: u32,
    pub client_seq: i64,
}

/// Checks that a value has the shape the question type expects.
pub fn validate_answer(
    question: &SessionQuestion,
    value: Option<&AnswerValue>,
    skipped: bool,
) -> Result<(), SessionError> {
    let value = match value {
        Some(value) => value,
        None if skipped => return Ok(()),
        None => {
            return Err(SessionError::validation(
                &question.question_id,
                "selected_answer is required unless the question is skipped",
            ))
        }
    };

    let fits = match question.kind {
        QuestionType::SingleChoice => {
            matches!(value, AnswerValue::Text(_) | AnswerValue::Number(_))
        }
        QuestionType::MultipleChoice => match value {
            AnswerValue::List(items) => items.iter().all(AnswerValue::is_scalar),
            _ => false,
        },
        QuestionType::TrueFalse => matches!(value, AnswerValue::Bool(_)),
        QuestionType::Numeric => match value {
            AnswerValue::Number(n) => n.is_finite(),
            _ => false,
        },
        QuestionType::ShortText => matches!(value, AnswerValue::Text(_)),
    };

    if fits {
        Ok(())
    } else {
        Err(SessionError::validation(
            &question.question_id,
            format!(
                "a {} question does not accept a {} answer",
                question.kind.as_str(),
                value.shape()
            ),
        ))
    }
}

fn ensure_sequence(client_seq: i64) -> Result<(), SessionError> {
    if client_seq < 1 {
        return Err(SessionError::Validation {
            question_id: None,
            message: format!("client_seq must be positive, got {}", client_seq),
        });
    }
    Ok(())
}

fn find_question<'a>(
    session: &'a QuizSession,
    question_id: &str,
) -> Result<&'a SessionQuestion, SessionError> {
    session
        .question(question_id)
        .ok_or_else(|| SessionError::NotFound {
            entity: "question",
            id: question_id.to_string(),
        })
}

/// Applies an answer write. `session_time_ms` is the session's time spent at the moment of
/// the write; the time since the previous applied answer is attributed to this question.
pub fn apply_answer(
    session: &mut QuizSession,
    command: &AnswerCommand,
    session_time_ms: i64,
    now: DateTime<Utc>,
) -> Result<LedgerEffect, SessionError> {
    ensure_sequence(command.client_seq)?;
    let question = find_question(session, &command.question_id)?;
    validate_answer(question, command.selected_answer.as_ref(), command.skipped)?;

    let attributed_ms = (session_time_ms - session.ledger_mark_ms).max(0);
    let seq = command.client_seq;
    let record = session.answer_mut_or_insert(&command.question_id, now);
    let mut effect = LedgerEffect::Duplicate;

    if seq > record.client_seq {
        record.selected_answer = command.selected_answer.clone();
        record.client_seq = seq;
        record.answered_at = now;
        record.time_spent_seconds = record
            .time_spent_seconds
            .saturating_add((attributed_ms / 1000) as u32);
        effect = LedgerEffect::Applied;
    }
    if let Some(flagged) = command.flagged {
        if seq > record.flag_seq {
            record.flagged = flagged;
            record.flag_seq = seq;
            effect = LedgerEffect::Applied;
        }
    }
    if seq > record.skip_seq {
        record.skipped = command.skipped;
        record.skip_seq = seq;
        effect = LedgerEffect::Applied;
    }

    if effect == LedgerEffect::Applied {
        session.ledger_mark_ms = session.ledger_mark_ms.max(session_time_ms);
    }

    Ok(effect)
}

pub fn apply_flag(
    session: &mut QuizSession,
    command: &FlagCommand,
    now: DateTime<Utc>,
) -> Result<LedgerEffect, SessionError> {
    ensure_sequence(command.client_seq)?;
    find_question(session, &command.question_id)?;
    let record = session.answer_mut_or_insert(&command.question_id, now);
    if command.client_seq > record.flag_seq {
        record.flagged = command.flagged;
        record.flag_seq = command.client_seq;
        Ok(LedgerEffect::Applied)
    } else {
        Ok(LedgerEffect::Duplicate)
    }
}

pub fn apply_skip(
    session: &mut QuizSession,
    command: &SkipCommand,
    now: DateTime<Utc>,
) -> Result<LedgerEffect, SessionError> {
    ensure_sequence(command.client_seq)?;
    find_question(session, &command.question_id)?;
    let record = session.answer_mut_or_insert(&command.question_id, now);
    if command.client_seq > record.skip_seq {
        record.skipped = command.skipped;
        record.skip_seq = command.client_seq;
        Ok(LedgerEffect::Applied)
    } else {
        Ok(LedgerEffect::Duplicate)
    }
}

pub fn apply_navigation(
    session: &mut QuizSession,
    command: &NavigateCommand,
) -> Result<LedgerEffect, SessionError> {
    ensure_sequence(command.client_seq)?;
    if command.question_index as usize >= session.questions.len() {
        return Err(SessionError::Validation {
            question_id: None,
            message: format!(
                "question_index {} is out of range (quiz has {} questions)",
                command.question_index,
                session.questions.len()
            ),
        });
    }

    if command.client_seq > session.navigation_seq {
        session.current_question_index = command.question_index;
        session.navigation_seq = command.client_seq;
        Ok(LedgerEffect::Applied)
    } else {
        Ok(LedgerEffect::Duplicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SessionStatus, QuizSession};

    fn session() -> QuizSession {
        let now = Utc::now();
        QuizSession {
            id: "s-1".to_string(),
            user_id: "u-1".to_string(),
            quiz_id: "quiz-1".to_string(),
            status: SessionStatus::InProgress,
            time_limit_seconds: 600,
            time_spent_ms: 0,
            passing_score: 50.0,
            questions: vec![
                SessionQuestion {
                    question_id: "q1".to_string(),
                    kind: QuestionType::SingleChoice,
                },
                SessionQuestion {
                    question_id: "q2".to_string(),
                    kind: QuestionType::MultipleChoice,
                },
                SessionQuestion {
                    question_id: "q3".to_string(),
                    kind: QuestionType::TrueFalse,
                },
            ],
            attempt_number: 1,
            current_question_index: 0,
            navigation_seq: 0,
            ledger_mark_ms: 0,
            started_at: Some(now),
            paused_at: None,
            completed_at: None,
            last_resumed_at: Some(now),
            deadline_at: None,
            answers: Vec::new(),
            score: None,
            last_sync: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn answer(question_id: &str, value: AnswerValue, seq: i64) -> AnswerCommand {
        AnswerCommand {
            question_id: question_id.to_string(),
            selected_answer: Some(value),
            flagged: None,
            skipped: false,
            client_seq: seq,
            final_submission: false,
        }
    }

    fn text(value: &str) -> AnswerValue {
        AnswerValue::Text(value.to_string())
    }

    #[test]
    fn replaying_the_same_sequence_is_a_noop() {
        let mut s = session();
        let now = Utc::now();

        let first = apply_answer(&mut s, &answer("q1", text("b"), 1), 5_000, now).unwrap();
        let before = s.clone();
        let replay = apply_answer(&mut s, &answer("q1", text("b"), 1), 9_000, now).unwrap();

        assert_eq!(first, LedgerEffect::Applied);
        assert_eq!(replay, LedgerEffect::Duplicate);
        assert_eq!(s, before);
        assert_eq!(s.answers.len(), 1);
    }

    #[test]
    fn late_lower_sequence_never_regresses_the_answer() {
        let mut s = session();
        let now = Utc::now();

        apply_answer(&mut s, &answer("q1", text("from-5"), 5), 1_000, now).unwrap();
        let late = apply_answer(&mut s, &answer("q1", text("from-3"), 3), 2_000, now).unwrap();

        assert_eq!(late, LedgerEffect::Duplicate);
        let record = s.answer("q1").unwrap();
        assert_eq!(record.selected_answer, Some(text("from-5")));
        assert_eq!(record.client_seq, 5);
    }

    #[test]
    fn greater_sequence_overwrites() {
        let mut s = session();
        let now = Utc::now();

        apply_answer(&mut s, &answer("q1", text("a"), 1), 1_000, now).unwrap();
        apply_answer(&mut s, &answer("q1", text("c"), 2), 2_000, now).unwrap();

        assert_eq!(s.answer("q1").unwrap().selected_answer, Some(text("c")));
    }

    #[test]
    fn flag_and_answer_use_independent_sequences() {
        let mut s = session();
        let now = Utc::now();

        let flag = FlagCommand {
            question_id: "q1".to_string(),
            flagged: true,
            client_seq: 6,
        };
        apply_flag(&mut s, &flag, now).unwrap();
        // answer recorded earlier on the device but delivered after the flag
        let effect = apply_answer(&mut s, &answer("q1", text("a"), 4), 1_000, now).unwrap();

        assert_eq!(effect, LedgerEffect::Applied);
        let record = s.answer("q1").unwrap();
        assert_eq!(record.selected_answer, Some(text("a")));
        assert!(record.flagged, "older answer write must not clear a newer flag");
    }

    #[test]
    fn answer_without_a_flag_keeps_a_later_flag() {
        let mut s = session();
        let now = Utc::now();

        let flag = FlagCommand {
            question_id: "q1".to_string(),
            flagged: true,
            client_seq: 2,
        };
        apply_flag(&mut s, &flag, now).unwrap();
        apply_answer(&mut s, &answer("q1", text("b"), 3), 1_000, now).unwrap();

        let record = s.answer("q1").unwrap();
        assert!(record.flagged);
        assert_eq!(record.flag_seq, 2);
        assert_eq!(record.client_seq, 3);

        let unflag = AnswerCommand {
            flagged: Some(false),
            ..answer("q1", text("b"), 4)
        };
        apply_answer(&mut s, &unflag, 2_000, now).unwrap();
        assert!(!s.answer("q1").unwrap().flagged);
    }

    #[test]
    fn time_since_previous_answer_is_attributed_to_the_question() {
        let mut s = session();
        let now = Utc::now();

        apply_answer(&mut s, &answer("q1", text("a"), 1), 30_000, now).unwrap();
        apply_answer(
            &mut s,
            &answer("q3", AnswerValue::Bool(true), 2),
            75_500,
            now,
        )
        .unwrap();

        assert_eq!(s.answer("q1").unwrap().time_spent_seconds, 30);
        assert_eq!(s.answer("q3").unwrap().time_spent_seconds, 45);
        assert_eq!(s.ledger_mark_ms, 75_500);
    }

    #[test]
    fn answer_shape_is_validated_against_question_type() {
        let mut s = session();
        let now = Utc::now();

        let err = apply_answer(&mut s, &answer("q3", text("yes"), 1), 0, now).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Validation { question_id: Some(ref q), .. } if q == "q3"
        ));

        let err = apply_answer(&mut s, &answer("q2", text("a"), 1), 0, now).unwrap_err();
        assert_eq!(err.code(), "validation_error");
        assert!(s.answers.is_empty());

        let multi = AnswerValue::List(vec![text("a"), text("d")]);
        assert!(apply_answer(&mut s, &answer("q2", multi, 1), 0, now).is_ok());
    }

    #[test]
    fn unknown_question_is_not_found() {
        let mut s = session();
        let err = apply_answer(&mut s, &answer("q99", text("a"), 1), 0, Utc::now()).unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn skipping_without_a_value_is_allowed() {
        let mut s = session();
        let command = AnswerCommand {
            question_id: "q1".to_string(),
            selected_answer: None,
            flagged: None,
            skipped: true,
            client_seq: 1,
            final_submission: false,
        };
        apply_answer(&mut s, &command, 0, Utc::now()).unwrap();

        let record = s.answer("q1").unwrap();
        assert!(record.skipped);
        assert!(!record.is_answered());
    }

    #[test]
    fn navigation_is_last_writer_wins_by_sequence() {
        let mut s = session();

        let forward = NavigateCommand {
            question_index: 2,
            client_seq: 8,
        };
        let stale = NavigateCommand {
            question_index: 1,
            client_seq: 7,
        };
        assert_eq!(
            apply_navigation(&mut s, &forward).unwrap(),
            LedgerEffect::Applied
        );
        assert_eq!(
            apply_navigation(&mut s, &stale).unwrap(),
            LedgerEffect::Duplicate
        );
        assert_eq!(s.current_question_index, 2);

        let out_of_range = NavigateCommand {
            question_index: 3,
            client_seq: 9,
        };
        assert!(apply_navigation(&mut s, &out_of_range).is_err());
    }
}
