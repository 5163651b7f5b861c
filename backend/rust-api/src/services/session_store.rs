use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::catalog::{AttemptCounter, AttemptReservation};
use crate::error::{CatalogError, StoreError};
use crate::models::{QuizSession, SessionStatus};

#[derive(Debug, Clone)]
pub struct SessionQuery {
    pub user_id: String,
    pub statuses: Vec<SessionStatus>,
    pub quiz_id: Option<String>,
    pub limit: usize,
}

/// Durable keyed storage for sessions.
///
/// `replace` is the only way to change a stored session: it succeeds only when the stored
/// `version` still equals `expected_version`, otherwise it fails with
/// [`StoreError::VersionConflict`] and the caller re-reads.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &QuizSession) -> Result<(), StoreError>;

    async fn get(&self, session_id: &str) -> Result<QuizSession, StoreError>;

    async fn replace(&self, session: &QuizSession, expected_version: i64)
        -> Result<(), StoreError>;

    /// Most recently updated first.
    async fn list(&self, query: &SessionQuery) -> Result<Vec<QuizSession>, StoreError>;

    /// Ids of in-progress sessions whose deadline is at or before `now`.
    async fn find_overdue(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError>;

    /// Deletes terminal sessions that ended before `cutoff`. Returns how many were removed.
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, QuizSession>>,
    /// Started session ids per (user, quiz), in attempt order.
    attempts: RwLock<HashMap<(String, String), Vec<String>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: &QuizSession) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(StoreError::Duplicate(session.id.clone()));
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<QuizSession, StoreError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }

    async fn replace(
        &self,
        session: &QuizSession,
        expected_version: i64,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions
            .get_mut(&session.id)
            .ok_or_else(|| StoreError::NotFound(session.id.clone()))?;

        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                id: session.id.clone(),
                expected: expected_version,
            });
        }

        *stored = session.clone();
        Ok(())
    }

    async fn list(&self, query: &SessionQuery) -> Result<Vec<QuizSession>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut matching: Vec<QuizSession> = sessions
            .values()
            .filter(|s| s.user_id == query.user_id)
            .filter(|s| query.statuses.contains(&s.status))
            .filter(|s| {
                query
                    .quiz_id
                    .as_deref()
                    .map_or(true, |quiz_id| s.quiz_id == quiz_id)
            })
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        matching.truncate(query.limit);
        Ok(matching)
    }

    async fn find_overdue(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut overdue: Vec<(DateTime<Utc>, String)> = sessions
            .values()
            .filter(|s| s.status == SessionStatus::InProgress)
            .filter_map(|s| s.deadline_at.map(|deadline| (deadline, s.id.clone())))
            .filter(|(deadline, _)| *deadline <= now)
            .collect();

        overdue.sort();
        Ok(overdue.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| {
            !(s.status.is_terminal() && s.completed_at.is_some_and(|ended| ended < cutoff))
        });
        Ok((before - sessions.len()) as u64)
    }
}

#[async_trait]
impl AttemptCounter for InMemorySessionStore {
    async fn count(&self, user_id: &str, quiz_id: &str) -> Result<u32, CatalogError> {
        let attempts = self.attempts.read().await;
        let key = (user_id.to_string(), quiz_id.to_string());
        Ok(attempts.get(&key).map_or(0, |started| started.len() as u32))
    }

    async fn reserve(
        &self,
        user_id: &str,
        quiz_id: &str,
        session_id: &str,
        max_attempts: Option<u32>,
    ) -> Result<AttemptReservation, CatalogError> {
        let mut attempts = self.attempts.write().await;
        let started = attempts
            .entry((user_id.to_string(), quiz_id.to_string()))
            .or_default();

        if let Some(position) = started.iter().position(|id| id == session_id) {
            return Ok(AttemptReservation::Granted(position as u32 + 1));
        }
        if max_attempts.is_some_and(|max| started.len() as u32 >= max) {
            return Ok(AttemptReservation::Exhausted);
        }
        started.push(session_id.to_string());
        Ok(AttemptReservation::Granted(started.len() as u32))
    }
}
