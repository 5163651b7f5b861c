use std::collections::HashMap;
use std::sync::Arc;

use super::catalog::QuestionAnswerKeyProvider;
use crate::error::{CatalogError, SessionError};
use crate::models::{AnswerKey, AnswerValue, QuestionResult, QuestionType, QuizSession, ScoreResult};

const NUMERIC_TOLERANCE: f64 = 1e-9;

/// Computes the final score of a session from the question bank's answer keys.
///
/// The result is stored with the session and never recomputed on read, so later edits of an
/// answer key do not change historical results.
#[derive(Clone)]
pub struct Scorer {
    keys: Arc<dyn QuestionAnswerKeyProvider>,
}

impl Scorer {
    pub fn new(keys: Arc<dyn QuestionAnswerKeyProvider>) -> Self {
        Self { keys }
    }

    pub async fn score(&self, session: &QuizSession) -> Result<ScoreResult, SessionError> {
        let question_ids: Vec<String> = session
            .questions
            .iter()
            .map(|q| q.question_id.clone())
            .collect();
        let keys = self.fetch_keys(&session.id, &question_ids).await?;

        let breakdown = session
            .questions
            .iter()
            .map(|q| grade(session, &q.question_id, q.kind, keys.get(&q.question_id)))
            .collect();

        Ok(ScoreResult::from_breakdown(breakdown, session.passing_score))
    }

    /// Re-grades `question_ids` and keeps every other entry of `previous`.
    pub async fn rescore_questions(
        &self,
        session: &QuizSession,
        previous: &ScoreResult,
        question_ids: &[String],
    ) -> Result<ScoreResult, SessionError> {
        let keys = self.fetch_keys(&session.id, question_ids).await?;

        let breakdown = session
            .questions
            .iter()
            .map(|q| {
                let kept = previous
                    .breakdown
                    .iter()
                    .find(|r| r.question_id == q.question_id);
                match kept {
                    Some(result) if !question_ids.contains(&q.question_id) => result.clone(),
                    _ => grade(session, &q.question_id, q.kind, keys.get(&q.question_id)),
                }
            })
            .collect();

        Ok(ScoreResult::from_breakdown(breakdown, session.passing_score))
    }

    async fn fetch_keys(
        &self,
        session_id: &str,
        question_ids: &[String],
    ) -> Result<HashMap<String, AnswerKey>, SessionError> {
        let keys = self.keys.get_many(question_ids).await.map_err(|err| {
            tracing::warn!(session_id = %session_id, error = %err, "Answer keys unavailable");
            match err {
                CatalogError::Unavailable(what) => SessionError::ScoringUnavailable(what),
                CatalogError::Backend(err) => SessionError::ScoringUnavailable(err.to_string()),
            }
        })?;

        for question_id in question_ids {
            if !keys.contains_key(question_id) {
                tracing::warn!(
                    session_id = %session_id,
                    question_id = %question_id,
                    "No answer key for question, scoring it as incorrect"
                );
            }
        }
        Ok(keys)
    }
}

fn grade(
    session: &QuizSession,
    question_id: &str,
    kind: QuestionType,
    key: Option<&AnswerKey>,
) -> QuestionResult {
    let selected = session
        .answer(question_id)
        .filter(|record| record.is_answered())
        .and_then(|record| record.selected_answer.as_ref());

    let correct = match (selected, key) {
        (Some(selected), Some(key)) => answers_match(kind, selected, &key.correct_answer),
        _ => false,
    };

    QuestionResult {
        question_id: question_id.to_string(),
        answered: selected.is_some(),
        correct,
    }
}

/// Type-aware equality between a submitted answer and the key.
pub fn answers_match(kind: QuestionType, selected: &AnswerValue, correct: &AnswerValue) -> bool {
    match kind {
        QuestionType::MultipleChoice => {
            let (Some(mut chosen), Some(mut expected)) = (choice_set(selected), choice_set(correct))
            else {
                return false;
            };
            chosen.sort();
            chosen.dedup();
            expected.sort();
            expected.dedup();
            chosen == expected
        }
        QuestionType::Numeric => match (as_number(selected), as_number(correct)) {
            (Some(a), Some(b)) => (a - b).abs() <= NUMERIC_TOLERANCE,
            _ => false,
        },
        QuestionType::ShortText => match (selected, correct) {
            (AnswerValue::Text(a), AnswerValue::Text(b)) => normalize_text(a) == normalize_text(b),
            _ => false,
        },
        QuestionType::TrueFalse => match (as_bool(selected), as_bool(correct)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        QuestionType::SingleChoice => match (choice_key(selected), choice_key(correct)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

fn normalize_text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn as_number(value: &AnswerValue) -> Option<f64> {
    match value {
        AnswerValue::Number(n) => Some(*n),
        AnswerValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &AnswerValue) -> Option<bool> {
    match value {
        AnswerValue::Bool(b) => Some(*b),
        AnswerValue::Text(s) => match s.trim().to_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Canonical form of a choice identifier, so `2`, `2.0` and `"2"` compare equal.
fn choice_key(value: &AnswerValue) -> Option<String> {
    match value {
        AnswerValue::Text(s) => Some(s.trim().to_string()),
        AnswerValue::Number(n) if n.fract() == 0.0 => Some(format!("{}", *n as i64)),
        AnswerValue::Number(n) => Some(n.to_string()),
        AnswerValue::Bool(b) => Some(b.to_string()),
        AnswerValue::List(_) => None,
    }
}

fn choice_set(value: &AnswerValue) -> Option<Vec<String>> {
    match value {
        AnswerValue::List(items) => items.iter().map(choice_key).collect(),
        scalar => choice_key(scalar).map(|key| vec![key]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnswerRecord, SessionQuestion, SessionStatus};
    use crate::services::catalog::InMemoryCatalog;
    use chrono::Utc;

    fn text(value: &str) -> AnswerValue {
        AnswerValue::Text(value.to_string())
    }

    #[test]
    fn multi_select_compares_as_a_set() {
        let selected = AnswerValue::List(vec![text("c"), text("a"), text("a")]);
        let correct = AnswerValue::List(vec![text("a"), text("c")]);
        assert!(answers_match(QuestionType::MultipleChoice, &selected, &correct));

        let partial = AnswerValue::List(vec![text("a")]);
        assert!(!answers_match(QuestionType::MultipleChoice, &partial, &correct));
    }

    #[test]
    fn short_text_ignores_case_and_spacing() {
        assert!(answers_match(
            QuestionType::ShortText,
            &text("  Photo   Synthesis "),
            &text("photo synthesis")
        ));
        assert!(!answers_match(
            QuestionType::ShortText,
            &text("photosynthesis"),
            &text("photo synthesis")
        ));
    }

    #[test]
    fn scalar_kinds() {
        assert!(answers_match(
            QuestionType::Numeric,
            &AnswerValue::Number(0.30000000000000004),
            &AnswerValue::Number(0.3)
        ));
        assert!(answers_match(
            QuestionType::SingleChoice,
            &AnswerValue::Number(2.0),
            &text("2")
        ));
        assert!(!answers_match(QuestionType::SingleChoice, &text("B"), &text("b")));
        assert!(answers_match(
            QuestionType::TrueFalse,
            &AnswerValue::Bool(false),
            &AnswerValue::Bool(false)
        ));
    }

    fn session(answers: Vec<(&str, AnswerValue, bool)>) -> QuizSession {
        let now = Utc::now();
        QuizSession {
            id: "s-1".to_string(),
            user_id: "u-1".to_string(),
            quiz_id: "quiz-1".to_string(),
            status: SessionStatus::Completed,
            time_limit_seconds: 600,
            time_spent_ms: 1_000,
            passing_score: 60.0,
            questions: ["q1", "q2", "q3"]
                .iter()
                .map(|id| SessionQuestion {
                    question_id: id.to_string(),
                    kind: QuestionType::SingleChoice,
                })
                .collect(),
            attempt_number: 1,
            current_question_index: 0,
            navigation_seq: 0,
            ledger_mark_ms: 0,
            started_at: Some(now),
            paused_at: None,
            completed_at: Some(now),
            last_resumed_at: None,
            deadline_at: None,
            answers: answers
                .into_iter()
                .map(|(id, value, skipped)| {
                    let mut record = AnswerRecord::blank(id, now);
                    record.selected_answer = Some(value);
                    record.skipped = skipped;
                    record.client_seq = 1;
                    record
                })
                .collect(),
            score: None,
            last_sync: None,
            version: 3,
            created_at: now,
            updated_at: now,
        }
    }

    async fn catalog() -> Arc<InMemoryCatalog> {
        let catalog = Arc::new(InMemoryCatalog::new());
        for (id, answer) in [("q1", "a"), ("q2", "b")] {
            catalog
                .insert_answer_key(AnswerKey {
                    question_id: id.to_string(),
                    kind: QuestionType::SingleChoice,
                    correct_answer: text(answer),
                })
                .await;
        }
        catalog
    }

    #[tokio::test]
    async fn skipped_and_keyless_questions_are_incorrect() {
        let scorer = Scorer::new(catalog().await);
        let s = session(vec![
            ("q1", text("a"), false),
            ("q2", text("b"), true),
            ("q3", text("c"), false),
        ]);

        let score = scorer.score(&s).await.unwrap();
        assert_eq!(score.correct_count, 1);
        assert_eq!(score.score, 33.33);
        assert!(!score.is_passed);
        assert!(!score.breakdown[1].answered);
        assert!(score.breakdown[2].answered);
        assert!(!score.breakdown[2].correct);
    }

    #[tokio::test]
    async fn unreachable_question_bank_is_scoring_unavailable() {
        let catalog = catalog().await;
        catalog.set_question_bank_available(false);
        let scorer = Scorer::new(catalog);

        let err = scorer.score(&session(Vec::new())).await.unwrap_err();
        assert!(matches!(err, SessionError::ScoringUnavailable(_)));
    }

    #[tokio::test]
    async fn rescore_keeps_untouched_entries() {
        let catalog = catalog().await;
        let scorer = Scorer::new(catalog.clone());
        let mut s = session(vec![("q1", text("a"), false)]);
        let first = scorer.score(&s).await.unwrap();
        assert_eq!(first.correct_count, 1);

        // The key of q1 changes afterwards; a late answer to q2 must not re-grade q1.
        catalog
            .insert_answer_key(AnswerKey {
                question_id: "q1".to_string(),
                kind: QuestionType::SingleChoice,
                correct_answer: text("z"),
            })
            .await;
        let mut late = AnswerRecord::blank("q2", Utc::now());
        late.selected_answer = Some(text("b"));
        late.client_seq = 2;
        s.answers.push(late);

        let second = scorer
            .rescore_questions(&s, &first, &["q2".to_string()])
            .await
            .unwrap();
        assert_eq!(second.correct_count, 2);
        assert!(second.breakdown[0].correct);
        assert!(second.breakdown[1].correct);
    }
}
