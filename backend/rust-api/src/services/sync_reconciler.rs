//! Merges a batch of events recorded offline into the canonical session.
//!
//! Content is applied first and time is evaluated afterwards, so an answer the user gave
//! before the deadline survives a sync call that lands after it. Events are checked against a
//! cut-off instant: the deadline of an overdue session, or the recorded end of an expired one.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use super::answer_ledger::{self, AnswerCommand, FlagCommand, NavigateCommand, SkipCommand};
use super::session_machine::{self, Outcome, Plan, Scoring};
use crate::error::SessionError;
use crate::models::{
    DeviceInfo, EventResult, EventStatus, LedgerEffect, QuizSession, SessionStatus, SyncEvent,
    SyncEventKind, SyncMarker,
};

pub const REASON_AFTER_DEADLINE: &str = "after_deadline";

#[derive(Debug, Clone, Default)]
pub struct ReconcileCommand {
    pub device_info: DeviceInfo,
    pub events: Vec<SyncEvent>,
    pub current_question_index: Option<u32>,
}

pub fn reconcile(
    session: &mut QuizSession,
    command: &ReconcileCommand,
    now: DateTime<Utc>,
) -> Result<Plan, SessionError> {
    let mut events: Vec<&SyncEvent> = command.events.iter().collect();
    events.sort_by_key(|event| event.client_seq);

    let initial_status = session.status;
    let accepts_content = match initial_status {
        SessionStatus::InProgress | SessionStatus::Expired => true,
        SessionStatus::NotStarted | SessionStatus::Paused | SessionStatus::Completed => false,
    };

    if !accepts_content {
        let reason = format!("session is {}", initial_status);
        let results = events
            .iter()
            .map(|event| EventResult::new(event, EventStatus::Rejected, Some(reason.clone())))
            .collect();
        return Ok(Plan {
            outcome: Outcome::Reconciled(results),
            write: false,
            scoring: Scoring::None,
            transition: None,
            rejection: None,
        });
    }

    let cutoff = match initial_status {
        SessionStatus::Expired => session.completed_at,
        _ if session.is_overdue(now) => session.deadline(),
        _ => None,
    };
    let session_time_ms = session.time_spent_ms_at(now);

    let mut results = Vec::with_capacity(events.len());
    let mut changed_questions = BTreeSet::new();
    let mut applied_any = false;

    for event in &events {
        if cutoff.is_some_and(|cutoff| event.recorded_at >= cutoff) {
            results.push(EventResult::new(
                event,
                EventStatus::Rejected,
                Some(REASON_AFTER_DEADLINE.to_string()),
            ));
            continue;
        }

        match apply_event(session, event, initial_status, session_time_ms, now) {
            Ok(LedgerEffect::Applied) => {
                applied_any = true;
                if let Some(question_id) = event.kind.question_id() {
                    changed_questions.insert(question_id.to_string());
                }
                results.push(EventResult::new(event, EventStatus::Applied, None));
            }
            Ok(LedgerEffect::Duplicate) => {
                results.push(EventResult::new(event, EventStatus::Duplicate, None));
            }
            Err(err) => {
                tracing::debug!(
                    session_id = %session.id,
                    client_seq = event.client_seq,
                    error = %err,
                    "Sync event rejected"
                );
                results.push(EventResult::new(event, EventStatus::Rejected, Some(err.to_string())));
            }
        }
    }

    if let (Some(question_index), None, SessionStatus::InProgress) =
        (command.current_question_index, cutoff, initial_status)
    {
        if let Some(client_seq) = events.iter().map(|event| event.client_seq).max() {
            let navigation = NavigateCommand {
                question_index,
                client_seq,
            };
            match answer_ledger::apply_navigation(session, &navigation) {
                Ok(LedgerEffect::Applied) => applied_any = true,
                Ok(LedgerEffect::Duplicate) => {}
                Err(err) => {
                    tracing::debug!(session_id = %session.id, error = %err, "Ignoring reported position");
                }
            }
        }
    }

    let accepted_events = results.iter().filter(|result| result.accepted).count() as u32;
    let mut plan = Plan {
        outcome: Outcome::Reconciled(results),
        write: applied_any || initial_status == SessionStatus::InProgress,
        scoring: Scoring::None,
        transition: None,
        rejection: None,
    };

    match initial_status {
        SessionStatus::InProgress if session.is_overdue(now) => {
            session_machine::expire(session);
            plan.scoring = Scoring::Full;
            plan.transition = Some((SessionStatus::InProgress, SessionStatus::Expired));
        }
        SessionStatus::InProgress => session_machine::accrue(session, now),
        SessionStatus::Expired if !changed_questions.is_empty() => {
            plan.scoring = if session.score.is_some() {
                Scoring::Questions(changed_questions.into_iter().collect())
            } else {
                Scoring::Full
            };
        }
        _ => {}
    }

    if plan.write {
        session.last_sync = Some(SyncMarker {
            device: command.device_info.clone(),
            synced_at: now,
            accepted_events,
        });
    }

    Ok(plan)
}

fn apply_event(
    session: &mut QuizSession,
    event: &SyncEvent,
    status: SessionStatus,
    session_time_ms: i64,
    now: DateTime<Utc>,
) -> Result<LedgerEffect, SessionError> {
    match &event.kind {
        SyncEventKind::Answer {
            question_id,
            selected_answer,
            flagged,
            skipped,
        } => {
            let command = AnswerCommand {
                question_id: question_id.clone(),
                selected_answer: selected_answer.clone(),
                flagged: *flagged,
                skipped: *skipped,
                client_seq: event.client_seq,
                final_submission: false,
            };
            answer_ledger::apply_answer(session, &command, session_time_ms, now)
        }
        SyncEventKind::Flag {
            question_id,
            flagged,
        } => {
            let command = FlagCommand {
                question_id: question_id.clone(),
                flagged: *flagged,
                client_seq: event.client_seq,
            };
            answer_ledger::apply_flag(session, &command, now)
        }
        SyncEventKind::Skip {
            question_id,
            skipped,
        } => {
            let command = SkipCommand {
                question_id: question_id.clone(),
                skipped: *skipped,
                client_seq: event.client_seq,
            };
            answer_ledger::apply_skip(session, &command, now)
        }
        SyncEventKind::Navigate { question_index } => {
            if status == SessionStatus::Expired {
                return Err(SessionError::invalid_transition(
                    "cannot navigate in an expired session",
                ));
            }
            let command = NavigateCommand {
                question_index: *question_index,
                client_seq: event.client_seq,
            };
            answer_ledger::apply_navigation(session, &command)
        }
    }
}
