use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::answer_ledger::{AnswerCommand, FlagCommand, NavigateCommand, SkipCommand};
use super::catalog::{AttemptCounter, AttemptReservation, QuizDefinitionProvider};
use super::scorer::Scorer;
use super::session_machine::{self, Command, Outcome, Plan, Scoring, StartPolicy};
use super::session_store::{SessionQuery, SessionStore};
use super::sync_reconciler::ReconcileCommand;
use crate::error::SessionError;
use crate::metrics::{
    record_transition, ANSWERS_SUBMITTED_TOTAL, SESSION_CONFLICTS_TOTAL, SYNC_EVENTS_TOTAL,
};
use crate::middlewares::auth::JwtClaims;
use crate::models::{
    AnswerAck, AnswerView, CreateSessionResponse, EventStatus, LedgerEffect, QuizSession,
    SessionQuestion, SessionSnapshot, SessionStatus, SyncResponse,
};
use crate::utils::clock::Clock;
use crate::utils::retry::{retry_async_if, RetryConfig};

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 100;

/// Who is calling. Background sweeps act as `System` and skip ownership checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    User { user_id: String, is_admin: bool },
    System,
}

impl Actor {
    pub fn user(user_id: impl Into<String>) -> Self {
        Actor::User {
            user_id: user_id.into(),
            is_admin: false,
        }
    }

    pub fn from_claims(claims: &JwtClaims) -> Self {
        Actor::User {
            user_id: claims.sub.clone(),
            is_admin: claims.is_admin(),
        }
    }

    fn user_id(&self) -> Result<&str, SessionError> {
        match self {
            Actor::User { user_id, .. } => Ok(user_id),
            Actor::System => Err(SessionError::Forbidden(
                "a user identity is required".to_string(),
            )),
        }
    }

    /// Only the owner mutates a session.
    fn authorize_mutation(&self, session: &QuizSession) -> Result<(), SessionError> {
        match self {
            Actor::System => Ok(()),
            Actor::User { user_id, .. } if *user_id == session.user_id => Ok(()),
            Actor::User { .. } => Err(SessionError::Forbidden(format!(
                "session {} belongs to another user",
                session.id
            ))),
        }
    }

    /// Owners and admins may read.
    fn authorize_read(&self, session: &QuizSession) -> Result<(), SessionError> {
        match self {
            Actor::User {
                is_admin: true, ..
            } => Ok(()),
            other => other.authorize_mutation(session),
        }
    }
}

/// Quiz-taking sessions: lifecycle, answer ledger, offline reconciliation and scoring.
///
/// Every mutation is read, plan, score, conditional write. A lost write re-reads and
/// re-plans against the fresh state a bounded number of times before surfacing `Conflict`.
pub struct SessionService {
    store: Arc<dyn SessionStore>,
    quizzes: Arc<dyn QuizDefinitionProvider>,
    attempts: Arc<dyn AttemptCounter>,
    scorer: Scorer,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        quizzes: Arc<dyn QuizDefinitionProvider>,
        attempts: Arc<dyn AttemptCounter>,
        scorer: Scorer,
        clock: Arc<dyn Clock>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            quizzes,
            attempts,
            scorer,
            clock,
            retry,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn create_session(
        &self,
        actor: &Actor,
        quiz_id: &str,
    ) -> Result<CreateSessionResponse, SessionError> {
        let user_id = actor.user_id()?;
        let quiz = self
            .quizzes
            .get(quiz_id)
            .await?
            .ok_or_else(|| SessionError::NotFound {
                entity: "quiz",
                id: quiz_id.to_string(),
            })?;

        let attempts_used = self.attempts.count(user_id, quiz_id).await?;
        if let Some(max_attempts) = quiz.max_attempts {
            if attempts_used >= max_attempts {
                tracing::info!(
                    user_id = %user_id,
                    quiz_id = %quiz_id,
                    attempts_used,
                    "Session refused: attempts exhausted"
                );
                return Err(SessionError::MaxAttemptsExceeded {
                    quiz_id: quiz_id.to_string(),
                    max_attempts,
                });
            }
        }

        let now = self.clock.now();
        let session = QuizSession {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            quiz_id: quiz.quiz_id.clone(),
            status: SessionStatus::NotStarted,
            time_limit_seconds: quiz.time_limit_seconds,
            time_spent_ms: 0,
            passing_score: quiz.passing_score,
            questions: quiz.questions.iter().map(SessionQuestion::from).collect(),
            // Provisional; `start` assigns the number the session actually claims.
            attempt_number: attempts_used + 1,
            current_question_index: 0,
            navigation_seq: 0,
            ledger_mark_ms: 0,
            started_at: None,
            paused_at: None,
            completed_at: None,
            last_resumed_at: None,
            deadline_at: None,
            answers: Vec::new(),
            score: None,
            last_sync: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(&session).await?;

        tracing::info!(
            session_id = %session.id,
            user_id = %user_id,
            quiz_id = %session.quiz_id,
            attempt = session.attempt_number,
            "Session created"
        );

        Ok(CreateSessionResponse {
            session_id: session.id,
            quiz_id: session.quiz_id,
            status: session.status,
            time_limit_seconds: session.time_limit_seconds,
            attempt_number: session.attempt_number,
            total_questions: session.questions.len() as u32,
        })
    }

    pub async fn start(
        &self,
        actor: &Actor,
        session_id: &str,
    ) -> Result<SessionSnapshot, SessionError> {
        self.transition(actor, session_id, Command::Start).await
    }

    pub async fn pause(
        &self,
        actor: &Actor,
        session_id: &str,
    ) -> Result<SessionSnapshot, SessionError> {
        self.transition(actor, session_id, Command::Pause).await
    }

    pub async fn resume(
        &self,
        actor: &Actor,
        session_id: &str,
    ) -> Result<SessionSnapshot, SessionError> {
        self.transition(actor, session_id, Command::Resume).await
    }

    /// Completes and scores the session. The snapshot carries the score.
    pub async fn complete(
        &self,
        actor: &Actor,
        session_id: &str,
    ) -> Result<SessionSnapshot, SessionError> {
        self.transition(actor, session_id, Command::Complete).await
    }

    pub async fn expire(
        &self,
        actor: &Actor,
        session_id: &str,
    ) -> Result<SessionSnapshot, SessionError> {
        self.transition(actor, session_id, Command::Expire).await
    }

    pub async fn submit_answer(
        &self,
        actor: &Actor,
        session_id: &str,
        command: AnswerCommand,
    ) -> Result<AnswerAck, SessionError> {
        let question_id = Some(command.question_id.clone());
        let client_seq = command.client_seq;
        self.ledger_write(actor, session_id, Command::Answer(command), question_id, client_seq)
            .await
    }

    pub async fn flag(
        &self,
        actor: &Actor,
        session_id: &str,
        command: FlagCommand,
    ) -> Result<AnswerAck, SessionError> {
        let question_id = Some(command.question_id.clone());
        let client_seq = command.client_seq;
        self.ledger_write(actor, session_id, Command::Flag(command), question_id, client_seq)
            .await
    }

    pub async fn skip(
        &self,
        actor: &Actor,
        session_id: &str,
        command: SkipCommand,
    ) -> Result<AnswerAck, SessionError> {
        let question_id = Some(command.question_id.clone());
        let client_seq = command.client_seq;
        self.ledger_write(actor, session_id, Command::Skip(command), question_id, client_seq)
            .await
    }

    pub async fn navigate(
        &self,
        actor: &Actor,
        session_id: &str,
        command: NavigateCommand,
    ) -> Result<AnswerAck, SessionError> {
        let client_seq = command.client_seq;
        self.ledger_write(actor, session_id, Command::Navigate(command), None, client_seq)
            .await
    }

    pub async fn reconcile(
        &self,
        actor: &Actor,
        session_id: &str,
        command: ReconcileCommand,
    ) -> Result<SyncResponse, SessionError> {
        let event_count = command.events.len();
        let (session, plan) = self
            .execute(actor, session_id, &Command::Reconcile(command))
            .await?;

        let results = match plan.outcome {
            Outcome::Reconciled(results) => results,
            _ => Vec::new(),
        };
        for result in &results {
            SYNC_EVENTS_TOTAL
                .with_label_values(&[result.status.as_str()])
                .inc();
        }
        let rejected_count = results
            .iter()
            .filter(|r| r.status == EventStatus::Rejected)
            .count() as u32;

        tracing::info!(
            session_id = %session_id,
            events = event_count,
            rejected = rejected_count,
            status = %session.status,
            "Offline events reconciled"
        );

        Ok(SyncResponse {
            session: session.snapshot(self.clock.now()),
            accepted_count: results.len() as u32 - rejected_count,
            rejected_count,
            results,
        })
    }

    /// Current state of a session. An overdue session is expired before it is returned.
    pub async fn get_session(
        &self,
        actor: &Actor,
        session_id: &str,
    ) -> Result<SessionSnapshot, SessionError> {
        let session = self.store.get(session_id).await?;
        actor.authorize_read(&session)?;
        let session = self.expire_if_overdue(session).await?;
        Ok(session.snapshot(self.clock.now()))
    }

    pub async fn get_answers(
        &self,
        actor: &Actor,
        session_id: &str,
    ) -> Result<Vec<AnswerView>, SessionError> {
        let session = self.store.get(session_id).await?;
        actor.authorize_read(&session)?;

        Ok(session
            .answers
            .iter()
            .filter(|record| record.client_seq > 0 || record.flagged || record.skipped)
            .map(|record| AnswerView::from_record(&session.id, record))
            .collect())
    }

    pub async fn list_active(
        &self,
        actor: &Actor,
        quiz_id: Option<String>,
        limit: Option<usize>,
    ) -> Result<Vec<SessionSnapshot>, SessionError> {
        let sessions = self
            .list(actor, SessionStatus::ACTIVE.to_vec(), quiz_id, limit)
            .await?;

        let mut snapshots = Vec::with_capacity(sessions.len());
        for session in sessions {
            let session = self.expire_if_overdue(session).await?;
            snapshots.push(session.snapshot(self.clock.now()));
        }
        Ok(snapshots)
    }

    pub async fn list_history(
        &self,
        actor: &Actor,
        quiz_id: Option<String>,
        limit: Option<usize>,
    ) -> Result<Vec<SessionSnapshot>, SessionError> {
        let now = self.clock.now();
        Ok(self
            .list(actor, SessionStatus::TERMINAL.to_vec(), quiz_id, limit)
            .await?
            .iter()
            .map(|session| session.snapshot(now))
            .collect())
    }

    pub async fn overdue_session_ids(&self, limit: usize) -> Result<Vec<String>, SessionError> {
        Ok(self.store.find_overdue(self.clock.now(), limit).await?)
    }

    /// Deletes terminal sessions that ended before `cutoff`.
    pub async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, SessionError> {
        let deleted = self.store.delete_terminal_before(cutoff).await?;
        if deleted > 0 {
            tracing::info!(deleted, cutoff = %cutoff, "Purged old terminal sessions");
        }
        Ok(deleted)
    }

    async fn list(
        &self,
        actor: &Actor,
        statuses: Vec<SessionStatus>,
        quiz_id: Option<String>,
        limit: Option<usize>,
    ) -> Result<Vec<QuizSession>, SessionError> {
        let query = SessionQuery {
            user_id: actor.user_id()?.to_string(),
            statuses,
            quiz_id,
            limit: limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT),
        };
        Ok(self.store.list(&query).await?)
    }

    async fn expire_if_overdue(&self, session: QuizSession) -> Result<QuizSession, SessionError> {
        if !session.is_overdue(self.clock.now()) {
            return Ok(session);
        }

        match self.execute(&Actor::System, &session.id, &Command::Expire).await {
            Ok((expired, _)) => Ok(expired),
            Err(SessionError::ScoringUnavailable(reason)) => {
                tracing::warn!(
                    session_id = %session.id,
                    reason = %reason,
                    "Lazy expiry postponed: scoring unavailable"
                );
                Ok(session)
            }
            // Someone else moved the session on first.
            Err(SessionError::InvalidTransition(_)) => Ok(self.store.get(&session.id).await?),
            Err(err) => Err(err),
        }
    }

    async fn transition(
        &self,
        actor: &Actor,
        session_id: &str,
        command: Command,
    ) -> Result<SessionSnapshot, SessionError> {
        let (session, _) = self.execute(actor, session_id, &command).await?;
        Ok(session.snapshot(self.clock.now()))
    }

    async fn ledger_write(
        &self,
        actor: &Actor,
        session_id: &str,
        command: Command,
        question_id: Option<String>,
        client_seq: i64,
    ) -> Result<AnswerAck, SessionError> {
        let result = self.execute(actor, session_id, &command).await;
        let (session, plan) = match result {
            Ok(done) => done,
            Err(err) => {
                if matches!(command, Command::Answer(_)) {
                    ANSWERS_SUBMITTED_TOTAL
                        .with_label_values(&["rejected"])
                        .inc();
                }
                return Err(err);
            }
        };

        let effect = match plan.outcome {
            Outcome::Ledger(effect) => effect,
            _ => LedgerEffect::Duplicate,
        };
        if matches!(command, Command::Answer(_)) {
            let label = match effect {
                LedgerEffect::Applied => "applied",
                LedgerEffect::Duplicate => "duplicate",
            };
            ANSWERS_SUBMITTED_TOTAL.with_label_values(&[label]).inc();
        }
        if effect == LedgerEffect::Duplicate {
            tracing::debug!(
                session_id = %session_id,
                client_seq,
                command = command.name(),
                "Replayed ledger write ignored"
            );
        }

        Ok(AnswerAck {
            session_id: session.id,
            question_id,
            client_seq,
            accepted: true,
            effect,
            session_status: session.status,
            version: session.version,
        })
    }

    /// Runs one command under the optimistic-concurrency loop and returns the written (or
    /// unchanged) session. A plan carrying a rejection is written first, then rejected.
    async fn execute(
        &self,
        actor: &Actor,
        session_id: &str,
        command: &Command,
    ) -> Result<(QuizSession, Plan), SessionError> {
        let (session, mut plan) = retry_async_if(
            &self.retry,
            |err: &SessionError| matches!(err, SessionError::Conflict(_)),
            move || self.attempt(actor, session_id, command),
        )
        .await?;

        if let Some((from, to)) = plan.transition {
            record_transition(from, to);
            tracing::info!(
                session_id = %session.id,
                user_id = %session.user_id,
                from = %from,
                to = %to,
                command = command.name(),
                version = session.version,
                "Session transition"
            );
        }

        match plan.rejection.take() {
            Some(rejection) => {
                tracing::warn!(
                    session_id = %session.id,
                    command = command.name(),
                    "Operation rejected: session expired while it was in flight"
                );
                Err(rejection)
            }
            None => Ok((session, plan)),
        }
    }

    async fn attempt(
        &self,
        actor: &Actor,
        session_id: &str,
        command: &Command,
    ) -> Result<(QuizSession, Plan), SessionError> {
        let mut session = self.store.get(session_id).await?;
        actor.authorize_mutation(&session)?;

        let start_policy = match command {
            Command::Start if session.status == SessionStatus::NotStarted => {
                Some(self.start_policy(&session).await?)
            }
            _ => None,
        };

        let now = self.clock.now();
        let plan = session_machine::plan(&mut session, command, now, start_policy)?;
        if !plan.write {
            return Ok((session, plan));
        }

        self.apply_scoring(&mut session, &plan.scoring).await?;

        let expected_version = session.version;
        session.version += 1;
        session.deadline_at = session.deadline();
        session.updated_at = now;

        match self.store.replace(&session, expected_version).await {
            Ok(()) => Ok((session, plan)),
            Err(err) => {
                let err = SessionError::from(err);
                if matches!(err, SessionError::Conflict(_)) {
                    SESSION_CONFLICTS_TOTAL.inc();
                    tracing::warn!(
                        session_id = %session_id,
                        expected_version,
                        command = command.name(),
                        "Session write lost a race, re-reading"
                    );
                }
                Err(err)
            }
        }
    }

    /// Claims an attempt slot for the session. The claim is atomic per (user, quiz), so two
    /// sessions started at once cannot both slip under the cap, and it is keyed by session, so
    /// a conflict retry reuses the slot it already holds.
    async fn start_policy(&self, session: &QuizSession) -> Result<StartPolicy, SessionError> {
        let quiz = self
            .quizzes
            .get(&session.quiz_id)
            .await?
            .ok_or_else(|| SessionError::NotFound {
                entity: "quiz",
                id: session.quiz_id.clone(),
            })?;

        let reservation = self
            .attempts
            .reserve(
                &session.user_id,
                &session.quiz_id,
                &session.id,
                quiz.max_attempts,
            )
            .await?;

        Ok(match (reservation, quiz.max_attempts) {
            (AttemptReservation::Granted(attempt_number), _) => {
                StartPolicy::Granted { attempt_number }
            }
            (AttemptReservation::Exhausted, max_attempts) => {
                tracing::info!(
                    session_id = %session.id,
                    user_id = %session.user_id,
                    quiz_id = %session.quiz_id,
                    "Start refused: attempts exhausted"
                );
                StartPolicy::Exhausted {
                    max_attempts: max_attempts.unwrap_or_default(),
                }
            }
        })
    }

    async fn apply_scoring(
        &self,
        session: &mut QuizSession,
        scoring: &Scoring,
    ) -> Result<(), SessionError> {
        let score = match (scoring, session.score.as_ref()) {
            (Scoring::None, _) => return Ok(()),
            (Scoring::Questions(question_ids), Some(previous)) => {
                self.scorer
                    .rescore_questions(session, previous, question_ids)
                    .await?
            }
            _ => self.scorer.score(session).await?,
        };

        tracing::info!(
            session_id = %session.id,
            score = score.score,
            correct = score.correct_count,
            total = score.total_questions,
            passed = score.is_passed,
            "Session scored"
        );
        session.score = Some(score);
        Ok(())
    }
}
