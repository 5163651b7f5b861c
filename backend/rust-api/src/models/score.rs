use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question_id: String,
    pub answered: bool,
    pub correct: bool,
}

/// Final result of a terminal session. Computed once and stored with the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub correct_count: u32,
    pub total_questions: u32,
    /// Percentage of `total_questions` answered correctly, rounded to two decimals.
    pub score: f64,
    pub passing_score: f64,
    pub is_passed: bool,
    pub breakdown: Vec<QuestionResult>,
}

impl ScoreResult {
    pub fn from_breakdown(breakdown: Vec<QuestionResult>, passing_score: f64) -> Self {
        let total_questions = breakdown.len() as u32;
        let correct_count = breakdown.iter().filter(|r| r.correct).count() as u32;
        let score = if total_questions == 0 {
            0.0
        } else {
            let raw = correct_count as f64 * 100.0 / total_questions as f64;
            (raw * 100.0).round() / 100.0
        };

        Self {
            correct_count,
            total_questions,
            score,
            passing_score,
            is_passed: score >= passing_score,
            breakdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, correct: bool) -> QuestionResult {
        QuestionResult {
            question_id: id.to_string(),
            answered: true,
            correct,
        }
    }

    #[test]
    fn percentage_is_rounded_and_compared_with_threshold() {
        let score = ScoreResult::from_breakdown(
            vec![result("q1", true), result("q2", false), result("q3", true)],
            66.0,
        );
        assert_eq!(score.correct_count, 2);
        assert_eq!(score.total_questions, 3);
        assert_eq!(score.score, 66.67);
        assert!(score.is_passed);
    }

    #[test]
    fn empty_quiz_scores_zero() {
        let score = ScoreResult::from_breakdown(Vec::new(), 50.0);
        assert_eq!(score.score, 0.0);
        assert!(!score.is_passed);
    }
}
