use serde::{Deserialize, Serialize};

use super::answer::AnswerValue;

/// Question kinds known to the session subsystem. They only drive shape validation of
/// submitted answers and the comparison rule used by the scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    MultipleChoice,
    TrueFalse,
    Numeric,
    ShortText,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::SingleChoice => "single_choice",
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::TrueFalse => "true_false",
            QuestionType::Numeric => "numeric",
            QuestionType::ShortText => "short_text",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "single_choice" | "mcq" => Some(QuestionType::SingleChoice),
            "multiple_choice" | "multi_select" => Some(QuestionType::MultipleChoice),
            "true_false" | "boolean" => Some(QuestionType::TrueFalse),
            "numeric" | "number" => Some(QuestionType::Numeric),
            "short_text" | "short_answer" | "text" => Some(QuestionType::ShortText),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question_id: String,
    pub kind: QuestionType,
}

/// Quiz definition as supplied by the content catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizDefinition {
    pub quiz_id: String,
    pub time_limit_seconds: u32,
    /// Percentage (0-100) required to pass.
    pub passing_score: f64,
    /// `None` means unlimited attempts.
    pub max_attempts: Option<u32>,
    pub questions: Vec<QuizQuestion>,
}

/// Answer key for one question, supplied by the question bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerKey {
    pub question_id: String,
    pub kind: QuestionType,
    pub correct_answer: AnswerValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_legacy_question_type_names() {
        assert_eq!(QuestionType::parse("mcq"), Some(QuestionType::SingleChoice));
        assert_eq!(
            QuestionType::parse("short_answer"),
            Some(QuestionType::ShortText)
        );
        assert_eq!(QuestionType::parse("essay"), None);
    }
}
