use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use redis::aio::ConnectionManager;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::session_service::{Actor, SessionService};
use crate::config::SessionsConfig;
use crate::error::SessionError;
use crate::metrics::{track_cache_operation, SWEEPER_TICKS_TOTAL};

const LEASE_PREFIX: &str = "quiz-sweeper:lease";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: usize,
    /// Already moved on by a user request or another replica.
    pub skipped: usize,
    pub failed: usize,
}

/// Background expiry of overdue sessions and deletion of old terminal ones.
///
/// Expiry goes through `SessionService::expire`, the same guarded transition a user request
/// triggers, so a session that times out unobserved ends up exactly like one noticed lazily.
pub struct ExpirationSweeper {
    sessions: Arc<SessionService>,
    redis: Option<ConnectionManager>,
    settings: SessionsConfig,
    instance_id: String,
}

impl ExpirationSweeper {
    pub fn new(
        sessions: Arc<SessionService>,
        redis: Option<ConnectionManager>,
        settings: SessionsConfig,
    ) -> Self {
        Self {
            sessions,
            redis,
            settings,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut expiry_tick = tokio::time::interval(self.settings.sweep_interval());
        let mut retention_tick = tokio::time::interval(self.settings.retention_interval());
        info!(
            "Starting session sweeper (expiry every {}s, retention every {}s)",
            self.settings.sweep_interval().as_secs(),
            self.settings.retention_interval().as_secs()
        );

        loop {
            tokio::select! {
                _ = expiry_tick.tick() => {
                    match self.sweep_expired().await {
                        Ok(report) => {
                            SWEEPER_TICKS_TOTAL.with_label_values(&["expire", "success"]).inc();
                            if report.scanned > 0 {
                                info!(
                                    scanned = report.scanned,
                                    expired = report.expired,
                                    skipped = report.skipped,
                                    failed = report.failed,
                                    "Expiration sweep completed"
                                );
                            }
                        }
                        Err(err) => {
                            SWEEPER_TICKS_TOTAL.with_label_values(&["expire", "error"]).inc();
                            warn!(error = %err, "Expiration sweep failed");
                        }
                    }
                }
                _ = retention_tick.tick() => {
                    match self.sweep_retention().await {
                        Ok(_) => {
                            SWEEPER_TICKS_TOTAL.with_label_values(&["retention", "success"]).inc();
                        }
                        Err(err) => {
                            SWEEPER_TICKS_TOTAL.with_label_values(&["retention", "error"]).inc();
                            warn!(error = %err, "Retention sweep failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("Session sweeper stopping");
                    break;
                }
            }
        }
    }

    /// One expiry tick. Skipped when another replica holds the lease.
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        if !self
            .acquire_lease("expire", self.settings.sweep_interval())
            .await?
        {
            debug!("Expiration sweep skipped: lease held by another replica");
            return Ok(SweepReport::default());
        }
        self.expire_overdue().await
    }

    /// Expires every overdue in-progress session found in one batch.
    pub async fn expire_overdue(&self) -> Result<SweepReport> {
        let ids = self
            .sessions
            .overdue_session_ids(self.settings.sweep_batch_size)
            .await
            .context("Failed to query overdue sessions")?;

        let mut report = SweepReport {
            scanned: ids.len(),
            ..SweepReport::default()
        };
        for session_id in &ids {
            match self.sessions.expire(&Actor::System, session_id).await {
                Ok(_) => report.expired += 1,
                Err(SessionError::InvalidTransition(_)) | Err(SessionError::NotFound { .. }) => {
                    report.skipped += 1;
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(session_id = %session_id, error = %err, "Failed to expire session");
                }
            }
        }
        Ok(report)
    }

    /// One retention tick with the configured window.
    pub async fn sweep_retention(&self) -> Result<u64> {
        if !self
            .acquire_lease("retention", self.settings.retention_interval())
            .await?
        {
            return Ok(0);
        }
        self.purge_older_than(self.settings.retention_days).await
    }

    /// Deletes terminal sessions that ended more than `days` days ago.
    pub async fn purge_older_than(&self, days: i64) -> Result<u64> {
        let cutoff = self.sessions.now() - ChronoDuration::days(days.max(0));
        let deleted = self
            .sessions
            .purge_terminal_before(cutoff)
            .await
            .context("Failed to purge old sessions")?;
        Ok(deleted)
    }

    /// `SET key token NX PX ttl`. Without Redis every replica sweeps.
    async fn acquire_lease(&self, sweep: &str, ttl: Duration) -> Result<bool> {
        let Some(redis) = &self.redis else {
            return Ok(true);
        };
        let mut conn = redis.clone();
        let key = format!("{}:{}", LEASE_PREFIX, sweep);
        let ttl_ms = ttl.as_millis().max(1000) as u64;

        let acquired: Option<String> = track_cache_operation("set_nx", async {
            redis::cmd("SET")
                .arg(&key)
                .arg(&self.instance_id)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await
                .context("Failed to acquire sweeper lease")
        })
        .await?;
        Ok(acquired.is_some())
    }
}
