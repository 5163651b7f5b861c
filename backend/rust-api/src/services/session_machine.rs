//! Session state machine.
//!
//! `plan` is pure: it takes a freshly read session, the command and the server clock reading,
//! mutates the session in place and says what the caller must do next (score, write, reject).
//! `SessionService` wraps it with the read / score / conditional-write loop.
//!
//! ```text
//! not_started --start--> in_progress --pause--> paused
//!                            ^  |  |                |
//!                            |  |  +----resume------+
//!                            |  +--complete--> completed
//!                            +-----expire----> expired
//! ```

use chrono::{DateTime, Utc};

use super::answer_ledger::{
    self, AnswerCommand, FlagCommand, NavigateCommand, SkipCommand,
};
use super::sync_reconciler::{self, ReconcileCommand};
use crate::error::SessionError;
use crate::models::{EventResult, LedgerEffect, QuizSession, SessionStatus};

/// Attempt slot claimed for the session before `start` is planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPolicy {
    Granted { attempt_number: u32 },
    Exhausted { max_attempts: u32 },
}

#[derive(Debug, Clone)]
pub enum Command {
    Start,
    Pause,
    Resume,
    Complete,
    Expire,
    Answer(AnswerCommand),
    Flag(FlagCommand),
    Skip(SkipCommand),
    Navigate(NavigateCommand),
    Reconcile(ReconcileCommand),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Complete => "complete",
            Command::Expire => "expire",
            Command::Answer(_) => "answer",
            Command::Flag(_) => "flag",
            Command::Skip(_) => "skip",
            Command::Navigate(_) => "navigate",
            Command::Reconcile(_) => "reconcile",
        }
    }
}

/// What the scorer has to do before the write.
#[derive(Debug, Clone, PartialEq)]
pub enum Scoring {
    None,
    /// Score the whole session (entering a terminal state).
    Full,
    /// Re-score only these questions of an already scored session.
    Questions(Vec<String>),
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Transitioned,
    Ledger(LedgerEffect),
    Reconciled(Vec<EventResult>),
}

#[derive(Debug)]
pub struct Plan {
    pub outcome: Outcome,
    pub write: bool,
    pub scoring: Scoring,
    /// Status change performed by this plan, for logs and metrics.
    pub transition: Option<(SessionStatus, SessionStatus)>,
    /// Error to return after the write (forced expiry rejects the requested operation).
    pub rejection: Option<SessionError>,
}

impl Plan {
    fn noop(outcome: Outcome) -> Self {
        Self {
            outcome,
            write: false,
            scoring: Scoring::None,
            transition: None,
            rejection: None,
        }
    }

    fn write(outcome: Outcome) -> Self {
        Self {
            write: true,
            ..Self::noop(outcome)
        }
    }
}

pub fn plan(
    session: &mut QuizSession,
    command: &Command,
    now: DateTime<Utc>,
    start_policy: Option<StartPolicy>,
) -> Result<Plan, SessionError> {
    match command {
        Command::Reconcile(reconcile) => sync_reconciler::reconcile(session, reconcile, now),
        Command::Start => live(session, command, now, |session| {
            require(session, SessionStatus::InProgress, "start")?;
            if let Some(policy) = start_policy {
                apply_start_policy(session, policy)?;
            }
            session.status = SessionStatus::InProgress;
            session.started_at = Some(now);
            session.last_resumed_at = Some(now);
            Ok(transitioned(SessionStatus::NotStarted, SessionStatus::InProgress))
        }),
        Command::Pause => live(session, command, now, |session| {
            require(session, SessionStatus::Paused, "pause")?;
            accrue(session, now);
            session.status = SessionStatus::Paused;
            session.paused_at = Some(now);
            session.last_resumed_at = None;
            Ok(transitioned(SessionStatus::InProgress, SessionStatus::Paused))
        }),
        Command::Resume => live(session, command, now, |session| {
            require(session, SessionStatus::InProgress, "resume")?;
            session.status = SessionStatus::InProgress;
            session.paused_at = None;
            session.last_resumed_at = Some(now);
            Ok(transitioned(SessionStatus::Paused, SessionStatus::InProgress))
        }),
        Command::Complete => live(session, command, now, |session| {
            require(session, SessionStatus::Completed, "complete")?;
            complete(session, now);
            let mut plan = transitioned(SessionStatus::InProgress, SessionStatus::Completed);
            plan.scoring = Scoring::Full;
            Ok(plan)
        }),
        Command::Expire => live(session, command, now, |session| {
            Err(SessionError::invalid_transition(format!(
                "cannot expire a session that is {} and within its time limit",
                session.status
            )))
        }),
        Command::Answer(answer) => live(session, command, now, |session| {
            require_in_progress(session, "answer")?;
            let session_time_ms = session.time_spent_ms_at(now);
            let effect = answer_ledger::apply_answer(session, answer, session_time_ms, now)?;

            if answer.final_submission && session.all_questions_answered() {
                complete(session, now);
                let mut plan =
                    transitioned(SessionStatus::InProgress, SessionStatus::Completed);
                plan.outcome = Outcome::Ledger(effect);
                plan.scoring = Scoring::Full;
                return Ok(plan);
            }
            Ok(ledger_plan(session, effect, now))
        }),
        Command::Flag(flag) => live(session, command, now, |session| {
            require_in_progress(session, "flag")?;
            let effect = answer_ledger::apply_flag(session, flag, now)?;
            Ok(ledger_plan(session, effect, now))
        }),
        Command::Skip(skip) => live(session, command, now, |session| {
            require_in_progress(session, "skip")?;
            let effect = answer_ledger::apply_skip(session, skip, now)?;
            Ok(ledger_plan(session, effect, now))
        }),
        Command::Navigate(navigate) => live(session, command, now, |session| {
            require_in_progress(session, "navigate")?;
            let effect = answer_ledger::apply_navigation(session, navigate)?;
            Ok(ledger_plan(session, effect, now))
        }),
    }
}

/// Runs `apply` against a session that is still live at `now`. Terminal sessions reject the
/// command; an overdue one is expired instead and the command is rejected after the write.
fn live<F>(
    session: &mut QuizSession,
    command: &Command,
    now: DateTime<Utc>,
    apply: F,
) -> Result<Plan, SessionError>
where
    F: FnOnce(&mut QuizSession) -> Result<Plan, SessionError>,
{
    if session.status.is_terminal() {
        return Err(SessionError::invalid_transition(format!(
            "cannot {} a session that is {}",
            command.name(),
            session.status
        )));
    }

    if session.is_overdue(now) {
        let from = session.status;
        expire(session);
        let rejection = match command {
            Command::Expire => None,
            _ => Some(SessionError::invalid_transition(format!(
                "cannot {}: time limit reached, session expired",
                command.name()
            ))),
        };
        return Ok(Plan {
            outcome: Outcome::Transitioned,
            write: true,
            scoring: Scoring::Full,
            transition: Some((from, SessionStatus::Expired)),
            rejection,
        });
    }

    apply(session)
}

fn transitioned(from: SessionStatus, to: SessionStatus) -> Plan {
    Plan {
        transition: Some((from, to)),
        ..Plan::write(Outcome::Transitioned)
    }
}

fn ledger_plan(session: &mut QuizSession, effect: LedgerEffect, now: DateTime<Utc>) -> Plan {
    match effect {
        LedgerEffect::Applied => {
            accrue(session, now);
            Plan::write(Outcome::Ledger(effect))
        }
        LedgerEffect::Duplicate => Plan::noop(Outcome::Ledger(effect)),
    }
}

fn require(session: &QuizSession, next: SessionStatus, action: &str) -> Result<(), SessionError> {
    if session.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(SessionError::invalid_transition(format!(
            "cannot {} a session that is {}",
            action, session.status
        )))
    }
}

fn require_in_progress(session: &QuizSession, action: &str) -> Result<(), SessionError> {
    if session.status == SessionStatus::InProgress {
        Ok(())
    } else {
        Err(SessionError::invalid_transition(format!(
            "cannot {} while the session is {}",
            action, session.status
        )))
    }
}

fn apply_start_policy(session: &mut QuizSession, policy: StartPolicy) -> Result<(), SessionError> {
    match policy {
        StartPolicy::Granted { attempt_number } => {
            session.attempt_number = attempt_number;
            Ok(())
        }
        StartPolicy::Exhausted { max_attempts } => Err(SessionError::MaxAttemptsExceeded {
            quiz_id: session.quiz_id.clone(),
            max_attempts,
        }),
    }
}

/// Folds the running interval into `time_spent_ms` and restarts it at `now`.
pub fn accrue(session: &mut QuizSession, now: DateTime<Utc>) {
    if session.status != SessionStatus::InProgress {
        return;
    }
    session.time_spent_ms = session.time_spent_ms_at(now);
    session.last_resumed_at = Some(now);
}

fn complete(session: &mut QuizSession, now: DateTime<Utc>) {
    accrue(session, now);
    session.status = SessionStatus::Completed;
    session.completed_at = Some(now);
    session.last_resumed_at = None;
    session.paused_at = None;
}

/// Moves an overdue in-progress session to `expired`. The end instant is the deadline itself,
/// not the moment the expiry was noticed.
pub fn expire(session: &mut QuizSession) {
    let ended_at = session.deadline().or(session.last_resumed_at);
    session.time_spent_ms = session.time_limit_ms();
    session.status = SessionStatus::Expired;
    session.completed_at = ended_at;
    session.last_resumed_at = None;
    session.paused_at = None;
}
