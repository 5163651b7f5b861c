use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, oid::ObjectId, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use mongodb::{Collection, Database, IndexModel};
use std::collections::HashMap;

use super::catalog::{
    AttemptCounter, AttemptReservation, QuestionAnswerKeyProvider, QuizDefinitionProvider,
};
use super::session_store::{SessionQuery, SessionStore};
use crate::error::{CatalogError, StoreError};
use crate::metrics::track_db_operation;
use crate::models::{
    AnswerKey, AnswerValue, QuestionType, QuizDefinition, QuizQuestion, QuizSession, SessionStatus,
};
use crate::utils::time::chrono_to_bson;

const SESSIONS: &str = "quiz_sessions";
const ATTEMPTS: &str = "quiz_attempts";
const QUIZZES: &str = "quizzes";
const QUESTIONS: &str = "questions";
const DUPLICATE_KEY: i32 = 11000;

fn status_values(statuses: &[SessionStatus]) -> Vec<Bson> {
    statuses
        .iter()
        .map(|s| Bson::String(s.as_str().to_string()))
        .collect()
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == DUPLICATE_KEY,
        // findAndModify upserts report the collision as a command error
        ErrorKind::Command(command) => command.code == DUPLICATE_KEY,
        _ => false,
    }
}

/// Attempt number held by `session_id` in an attempt counter document, if any.
fn attempt_position(counter: &Document, session_id: &str) -> Option<u32> {
    counter
        .get_array("sessions")
        .ok()?
        .iter()
        .position(|id| id.as_str() == Some(session_id))
        .map(|position| position as u32 + 1)
}

/// Sessions in MongoDB, one document per session with the ledger embedded.
#[derive(Clone)]
pub struct MongoSessionStore {
    mongo: Database,
}

impl MongoSessionStore {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn collection(&self) -> Collection<QuizSession> {
        self.mongo.collection(SESSIONS)
    }

    pub async fn ensure_indexes(&self) -> anyhow::Result<()> {
        let indexes = vec![
            IndexModel::builder()
                .keys(doc! { "user_id": 1, "quiz_id": 1, "status": 1 })
                .build(),
            IndexModel::builder()
                .keys(doc! { "status": 1, "deadline_at": 1 })
                .build(),
            IndexModel::builder()
                .keys(doc! { "status": 1, "completed_at": 1 })
                .build(),
        ];

        self.collection()
            .create_indexes(indexes)
            .await
            .context("Failed to create quiz_sessions indexes")?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MongoSessionStore {
    async fn insert(&self, session: &QuizSession) -> Result<(), StoreError> {
        let result = track_db_operation("insert_one", SESSIONS, async {
            self.collection().insert_one(session).await
        })
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => Err(StoreError::Duplicate(session.id.clone())),
            Err(err) => Err(StoreError::Backend(
                anyhow::Error::new(err).context("Failed to insert session"),
            )),
        }
    }

    async fn get(&self, session_id: &str) -> Result<QuizSession, StoreError> {
        track_db_operation("find_one", SESSIONS, async {
            self.collection()
                .find_one(doc! { "_id": session_id })
                .await
                .context("Failed to load session")
        })
        .await?
        .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }

    async fn replace(
        &self,
        session: &QuizSession,
        expected_version: i64,
    ) -> Result<(), StoreError> {
        let filter = doc! { "_id": &session.id, "version": expected_version };
        let result = track_db_operation("replace_one", SESSIONS, async {
            self.collection()
                .replace_one(filter, session)
                .await
                .context("Failed to replace session")
        })
        .await?;

        if result.matched_count == 1 {
            return Ok(());
        }

        // Nothing matched: either the version moved on or the session is gone.
        let exists = self
            .collection()
            .count_documents(doc! { "_id": &session.id })
            .await
            .context("Failed to check session existence")?;
        if exists == 0 {
            Err(StoreError::NotFound(session.id.clone()))
        } else {
            Err(StoreError::VersionConflict {
                id: session.id.clone(),
                expected: expected_version,
            })
        }
    }

    async fn list(&self, query: &SessionQuery) -> Result<Vec<QuizSession>, StoreError> {
        let mut filter = doc! {
            "user_id": &query.user_id,
            "status": { "$in": status_values(&query.statuses) },
        };
        if let Some(quiz_id) = &query.quiz_id {
            filter.insert("quiz_id", quiz_id);
        }

        let find_options = FindOptions::builder()
            .sort(doc! { "updated_at": -1 })
            .limit(query.limit as i64)
            .build();

        let sessions = track_db_operation("find", SESSIONS, async {
            let cursor = self
                .collection()
                .find(filter)
                .with_options(find_options)
                .await
                .context("Failed to list sessions")?;
            cursor
                .try_collect::<Vec<_>>()
                .await
                .context("Failed to collect sessions")
        })
        .await?;
        Ok(sessions)
    }

    async fn find_overdue(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let filter = doc! {
            "status": SessionStatus::InProgress.as_str(),
            "deadline_at": { "$lte": chrono_to_bson(now) },
        };
        let find_options = FindOptions::builder()
            .sort(doc! { "deadline_at": 1 })
            .limit(limit as i64)
            .projection(doc! { "_id": 1 })
            .build();

        let documents: Vec<Document> = track_db_operation("find", SESSIONS, async {
            let cursor = self
                .mongo
                .collection::<Document>(SESSIONS)
                .find(filter)
                .with_options(find_options)
                .await
                .context("Failed to query overdue sessions")?;
            cursor
                .try_collect()
                .await
                .context("Failed to collect overdue sessions")
        })
        .await?;

        Ok(documents
            .iter()
            .filter_map(|d| d.get_str("_id").ok().map(str::to_string))
            .collect())
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let filter = doc! {
            "status": { "$in": status_values(&SessionStatus::TERMINAL) },
            "completed_at": { "$lt": chrono_to_bson(cutoff) },
        };

        let result = track_db_operation("delete_many", SESSIONS, async {
            self.collection()
                .delete_many(filter)
                .await
                .context("Failed to delete old sessions")
        })
        .await?;
        Ok(result.deleted_count)
    }
}

impl MongoSessionStore {
    async fn attempt_counter(&self, key: &Document) -> Result<Option<Document>, CatalogError> {
        let counter = track_db_operation("find_one", ATTEMPTS, async {
            self.mongo
                .collection::<Document>(ATTEMPTS)
                .find_one(doc! { "_id": key.clone() })
                .await
                .context("Failed to load attempt counter")
        })
        .await?;
        Ok(counter)
    }
}

/// One counter document per (user, quiz): `{_id: {user_id, quiz_id}, count, sessions: [..]}`.
/// The cap is enforced by the filter of a single upserting `findAndModify`.
#[async_trait]
impl AttemptCounter for MongoSessionStore {
    async fn count(&self, user_id: &str, quiz_id: &str) -> Result<u32, CatalogError> {
        let key = doc! { "user_id": user_id, "quiz_id": quiz_id };
        let count = self
            .attempt_counter(&key)
            .await?
            .and_then(|counter| get_number(&counter, "count"))
            .unwrap_or(0.0);
        Ok(count as u32)
    }

    async fn reserve(
        &self,
        user_id: &str,
        quiz_id: &str,
        session_id: &str,
        max_attempts: Option<u32>,
    ) -> Result<AttemptReservation, CatalogError> {
        let key = doc! { "user_id": user_id, "quiz_id": quiz_id };
        if let Some(position) = self
            .attempt_counter(&key)
            .await?
            .and_then(|counter| attempt_position(&counter, session_id))
        {
            return Ok(AttemptReservation::Granted(position));
        }

        let mut filter = doc! { "_id": key.clone(), "sessions": { "$ne": session_id } };
        if let Some(max_attempts) = max_attempts {
            filter.insert("count", doc! { "$lt": max_attempts as i64 });
        }
        let update = doc! {
            "$inc": { "count": 1_i64 },
            "$push": { "sessions": session_id },
        };
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        let result = track_db_operation("find_one_and_update", ATTEMPTS, async {
            self.mongo
                .collection::<Document>(ATTEMPTS)
                .find_one_and_update(filter, update)
                .with_options(options)
                .await
        })
        .await;

        match result {
            Ok(counter) => Ok(counter
                .and_then(|counter| attempt_position(&counter, session_id))
                .map_or(AttemptReservation::Exhausted, AttemptReservation::Granted)),
            // The filter missed an existing counter: either the cap is reached or a concurrent
            // start of this same session claimed the slot first.
            Err(err) if is_duplicate_key(&err) => Ok(self
                .attempt_counter(&key)
                .await?
                .and_then(|counter| attempt_position(&counter, session_id))
                .map_or(AttemptReservation::Exhausted, AttemptReservation::Granted)),
            Err(err) => Err(CatalogError::Backend(
                anyhow::Error::new(err).context("Failed to reserve attempt"),
            )),
        }
    }
}

/// Read-only view of the content collections owned by the content service.
#[derive(Clone)]
pub struct MongoCatalog {
    mongo: Database,
}

impl MongoCatalog {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>> {
        let filter = id_filter(id);
        track_db_operation("find_one", collection, async {
            self.mongo
                .collection::<Document>(collection)
                .find_one(filter)
                .await
                .with_context(|| format!("Failed to query {}", collection))
        })
        .await
    }
}

fn id_filter(id: &str) -> Document {
    if let Ok(object_id) = ObjectId::parse_str(id) {
        doc! { "_id": object_id }
    } else {
        doc! { "_id": id }
    }
}

fn document_id(document: &Document, field: &str) -> anyhow::Result<String> {
    match document.get(field) {
        Some(Bson::ObjectId(oid)) => Ok(oid.to_hex()),
        Some(Bson::String(value)) => Ok(value.to_string()),
        _ => Err(anyhow!("Document has unsupported {} type", field)),
    }
}

fn get_number(document: &Document, key: &str) -> Option<f64> {
    match document.get(key) {
        Some(Bson::Int32(v)) => Some(*v as f64),
        Some(Bson::Int64(v)) => Some(*v as f64),
        Some(Bson::Double(v)) => Some(*v),
        _ => None,
    }
}

fn parse_question_type(document: &Document) -> anyhow::Result<QuestionType> {
    let raw = document
        .get_str("type")
        .map_err(|_| anyhow!("Question type missing"))?;
    QuestionType::parse(raw).ok_or_else(|| anyhow!("Unsupported question type {}", raw))
}

fn parse_quiz(document: &Document) -> anyhow::Result<QuizDefinition> {
    let quiz_id = document_id(document, "_id")?;
    let time_limit_seconds = get_number(document, "time_limit_seconds")
        .filter(|v| *v > 0.0)
        .ok_or_else(|| anyhow!("Quiz {} time limit missing", quiz_id))?;
    let passing_score = get_number(document, "passing_score").unwrap_or(0.0);
    let max_attempts = get_number(document, "max_attempts")
        .filter(|v| *v > 0.0)
        .map(|v| v as u32);

    let questions = document
        .get_array("questions")
        .map_err(|_| anyhow!("Quiz {} has no questions array", quiz_id))?
        .iter()
        .map(|entry| match entry {
            Bson::Document(question) => Ok(QuizQuestion {
                question_id: document_id(question, "question_id")?,
                kind: parse_question_type(question)?,
            }),
            _ => Err(anyhow!("Quiz {} has a malformed question entry", quiz_id)),
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(QuizDefinition {
        quiz_id,
        time_limit_seconds: time_limit_seconds as u32,
        passing_score,
        max_attempts,
        questions,
    })
}

fn parse_answer_key(document: &Document) -> anyhow::Result<AnswerKey> {
    let question_id = document_id(document, "_id")?;
    let correct = document
        .get("correct_answer")
        .cloned()
        .ok_or_else(|| anyhow!("Question {} has no correct_answer", question_id))?;
    let correct_answer: AnswerValue = bson::from_bson(correct)
        .with_context(|| format!("Question {} has an unsupported correct_answer", question_id))?;

    Ok(AnswerKey {
        kind: parse_question_type(document)?,
        question_id,
        correct_answer,
    })
}

#[async_trait]
impl QuizDefinitionProvider for MongoCatalog {
    async fn get(&self, quiz_id: &str) -> Result<Option<QuizDefinition>, CatalogError> {
        match self.find_by_id(QUIZZES, quiz_id).await? {
            Some(document) => Ok(Some(parse_quiz(&document)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl QuestionAnswerKeyProvider for MongoCatalog {
    async fn get(&self, question_id: &str) -> Result<Option<AnswerKey>, CatalogError> {
        match self.find_by_id(QUESTIONS, question_id).await? {
            Some(document) => Ok(Some(parse_answer_key(&document)?)),
            None => Ok(None),
        }
    }

    async fn get_many(
        &self,
        question_ids: &[String],
    ) -> Result<HashMap<String, AnswerKey>, CatalogError> {
        let ids: Vec<Bson> = question_ids
            .iter()
            .map(|id| match ObjectId::parse_str(id) {
                Ok(oid) => Bson::ObjectId(oid),
                Err(_) => Bson::String(id.clone()),
            })
            .collect();

        let documents: Vec<Document> = track_db_operation("find", QUESTIONS, async {
            let cursor = self
                .mongo
                .collection::<Document>(QUESTIONS)
                .find(doc! { "_id": { "$in": ids } })
                .await
                .context("Failed to query answer keys")?;
            cursor
                .try_collect()
                .await
                .context("Failed to collect answer keys")
        })
        .await?;

        let mut keys = HashMap::with_capacity(documents.len());
        for document in &documents {
            let key = parse_answer_key(document)?;
            keys.insert(key.question_id.clone(), key);
        }
        Ok(keys)
    }
}
