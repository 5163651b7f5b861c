//! Narrow contracts to the content side of the platform: quiz definitions, answer keys and
//! attempt counts. MongoDB-backed implementations live in `mongo_store`; the in-memory
//! catalog here backs tests and local runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::error::CatalogError;
use crate::models::{AnswerKey, QuizDefinition};

#[async_trait]
pub trait QuizDefinitionProvider: Send + Sync {
    async fn get(&self, quiz_id: &str) -> Result<Option<QuizDefinition>, CatalogError>;
}

#[async_trait]
pub trait QuestionAnswerKeyProvider: Send + Sync {
    async fn get(&self, question_id: &str) -> Result<Option<AnswerKey>, CatalogError>;

    /// Keys for several questions at once. Missing questions are simply absent from the map.
    async fn get_many(
        &self,
        question_ids: &[String],
    ) -> Result<HashMap<String, AnswerKey>, CatalogError> {
        let mut keys = HashMap::with_capacity(question_ids.len());
        for question_id in question_ids {
            if let Some(key) = self.get(question_id).await? {
                keys.insert(question_id.clone(), key);
            }
        }
        Ok(keys)
    }
}

/// Result of claiming an attempt slot for a session that is about to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptReservation {
    /// The session holds this attempt number for its user and quiz.
    Granted(u32),
    Exhausted,
}

#[async_trait]
pub trait AttemptCounter: Send + Sync {
    /// Number of attempts this user has started for the quiz.
    async fn count(&self, user_id: &str, quiz_id: &str) -> Result<u32, CatalogError>;

    /// Atomically claims the next attempt for `session_id` unless `max_attempts` are used up.
    /// Claiming again for the same session returns the number it already holds.
    async fn reserve(
        &self,
        user_id: &str,
        quiz_id: &str,
        session_id: &str,
        max_attempts: Option<u32>,
    ) -> Result<AttemptReservation, CatalogError>;
}

#[derive(Default)]
pub struct InMemoryCatalog {
    quizzes: RwLock<HashMap<String, QuizDefinition>>,
    answer_keys: RwLock<HashMap<String, AnswerKey>>,
    question_bank_down: AtomicBool,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_quiz(&self, quiz: QuizDefinition) {
        self.quizzes.write().await.insert(quiz.quiz_id.clone(), quiz);
    }

    pub async fn insert_answer_key(&self, key: AnswerKey) {
        self.answer_keys
            .write()
            .await
            .insert(key.question_id.clone(), key);
    }

    /// Simulates the question bank being unreachable.
    pub fn set_question_bank_available(&self, available: bool) {
        self.question_bank_down.store(!available, Ordering::SeqCst);
    }
}

#[async_trait]
impl QuizDefinitionProvider for InMemoryCatalog {
    async fn get(&self, quiz_id: &str) -> Result<Option<QuizDefinition>, CatalogError> {
        Ok(self.quizzes.read().await.get(quiz_id).cloned())
    }
}

#[async_trait]
impl QuestionAnswerKeyProvider for InMemoryCatalog {
    async fn get(&self, question_id: &str) -> Result<Option<AnswerKey>, CatalogError> {
        if self.question_bank_down.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("question bank".to_string()));
        }
        Ok(self.answer_keys.read().await.get(question_id).cloned())
    }
}
