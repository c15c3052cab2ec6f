//! Daily hour-cap enforcement.
//!
//! A worker over the cap gets exactly one warning per day with a countdown
//! deadline stored next to it. Answering "continue" suppresses the guard
//! until tomorrow; answering "stop" (or letting the countdown expire) stops
//! their timer and obliges a logout. The deadline lives in the database and
//! is enforced by the evaluation loop, so closing the browser does not
//! cancel the forced stop.

mod loop_worker;

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use log::warn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ConfigStore;
use crate::db::{
    models::{LimitWarning, LogAction, WarningResolution},
    Database,
};
use crate::error::{Error, Result};
use crate::timer::TimerController;

pub use loop_worker::limit_guard_loop;

/// A worker's explicit answer to the limit warning. No answer within the
/// countdown is not an acknowledgement; the loop resolves it as
/// `NoResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    Continue,
    Stop,
}

#[derive(Clone)]
pub struct LimitGuard {
    db: Database,
    timer: TimerController,
    config: Arc<ConfigStore>,
}

impl LimitGuard {
    pub fn new(db: Database, timer: TimerController, config: Arc<ConfigStore>) -> Self {
        Self { db, timer, config }
    }

    pub(crate) fn poll_interval(&self) -> tokio::time::Duration {
        tokio::time::Duration::from_secs(self.config.limits().poll_interval_secs.max(1))
    }

    /// One sweep over every user the guard owes a look: open sessions may
    /// cross the cap, unresolved warnings may pass their deadline. Per-user
    /// failures are logged and skipped so one bad row cannot stall the rest.
    pub async fn evaluate_all(&self, now: DateTime<Utc>) -> Result<()> {
        for user_id in self.db.users_needing_limit_evaluation().await? {
            if let Err(err) = self.evaluate_user(&user_id, now).await {
                log::error!("limit evaluation failed for user {user_id}: {err}");
            }
        }
        Ok(())
    }

    /// Evaluate one user against the daily cap. Returns the day's warning
    /// if one exists after this evaluation (just opened, still counting
    /// down, or resolved).
    pub async fn evaluate_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<LimitWarning>> {
        let day = now.date_naive();

        if let Some(warning) = self.db.get_warning_for_day(user_id, day).await? {
            if warning.resolution.is_some() {
                // Already acknowledged today; re-arms at day rollover.
                return Ok(Some(warning));
            }
            if now >= warning.deadline {
                return self.enforce_deadline(&warning, now).await.map(Some);
            }
            return Ok(Some(warning));
        }

        let limits = self.config.limits();
        let limit_minutes = limits.daily_limit_hours * 60.0;
        let hours = self.timer.daily_hours(user_id, day).await?;
        if hours.total_minutes <= limit_minutes {
            return Ok(None);
        }

        warn!(
            "User {user_id} is over the daily cap ({:.1} of {:.1} min); opening warning",
            hours.total_minutes, limit_minutes
        );

        let warning = LimitWarning {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            day,
            opened_at: now,
            deadline: now + Duration::minutes(limits.warning_window_minutes),
            worked_minutes: hours.total_minutes,
            resolution: None,
            resolved_at: None,
        };
        self.db.open_warning(warning).await.map(Some)
    }

    /// The countdown ran out with no answer. Stop first, resolve after: if
    /// the stop fails the warning stays unresolved and the next tick
    /// retries, and stop replay is a no-op, so the failsafe can never be
    /// suppressed by a transient error.
    async fn enforce_deadline(
        &self,
        warning: &LimitWarning,
        now: DateTime<Utc>,
    ) -> Result<LimitWarning> {
        if let Some(session) = self.db.get_active_session_for_user(&warning.user_id).await? {
            self.timer
                .stop_unattended(&session.id, LogAction::AutoStopped)
                .await?;
        }

        match self
            .db
            .resolve_warning(
                &warning.user_id,
                warning.day,
                WarningResolution::NoResponse,
                now,
            )
            .await
        {
            Ok(resolved) => Ok(resolved),
            // An acknowledgement landed between our scan and now; it wins.
            Err(Error::InvalidState(_)) => self
                .db
                .get_warning_for_day(&warning.user_id, warning.day)
                .await?
                .ok_or_else(|| {
                    Error::DataIntegrity(format!(
                        "limit warning for user {} vanished during enforcement",
                        warning.user_id
                    ))
                }),
            Err(err) => Err(err),
        }
    }

    /// Explicit answer to the day's warning. `NotFound` when nothing is
    /// waiting on this user today.
    pub async fn acknowledge(
        &self,
        user_id: &str,
        acknowledgement: Acknowledgement,
    ) -> Result<LimitWarning> {
        let now = Utc::now();
        let day = now.date_naive();

        match acknowledgement {
            Acknowledgement::Continue => {
                self.db
                    .resolve_warning(user_id, day, WarningResolution::Continue, now)
                    .await
            }
            Acknowledgement::Stop => {
                if let Some(session) = self.db.get_active_session_for_user(user_id).await? {
                    self.timer
                        .stop_unattended(&session.id, LogAction::Stopped)
                        .await?;
                }
                self.db
                    .resolve_warning(user_id, day, WarningResolution::Stop, now)
                    .await
            }
        }
    }

    /// The warning currently counting down for this user, if any.
    pub async fn pending_warning(&self, user_id: &str) -> Result<Option<LimitWarning>> {
        let warning = self
            .db
            .get_warning_for_day(user_id, Utc::now().date_naive())
            .await?;
        Ok(warning.filter(|w| w.resolution.is_none()))
    }

    /// Whether today's warning ended in an outcome the auth layer must act
    /// on by ending the user's login.
    pub async fn logout_required(&self, user_id: &str) -> Result<bool> {
        self.db
            .logout_required(user_id, Utc::now().date_naive())
            .await
    }
}

/// Owns the background evaluation loop, mirroring the lifecycle of the other
/// controllers: start spawns the task, stop cancels and joins it.
pub struct LimitGuardController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl LimitGuardController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn start(&mut self, guard: LimitGuard) -> Result<()> {
        if self.handle.is_some() {
            return Err(Error::InvalidState("limit guard already running".into()));
        }

        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();

        let handle = tokio::spawn(limit_guard_loop(guard, token_clone));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("limit guard loop task failed to join")
                .map_err(Into::into)
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for LimitGuardController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{LogFilter, ManualLogEntry, SessionInfo, WorkContext, WorkKind};
    use rusqlite::params;

    fn stage_context() -> WorkContext {
        WorkContext {
            kind: WorkKind::ProductionStage,
            context_id: "stage-packing".into(),
            order_id: None,
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        db: Database,
        timer: TimerController,
        guard: LimitGuard,
    }

    async fn setup() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("test.sqlite3")).unwrap();
        let timer = TimerController::new(db.clone());
        let config = Arc::new(ConfigStore::new(dir.path().join("settings.json")).unwrap());
        let guard = LimitGuard::new(db.clone(), timer.clone(), config);
        Harness {
            _dir: dir,
            db,
            timer,
            guard,
        }
    }

    async fn log_minutes_today(db: &Database, user_id: &str, minutes: f64) {
        let now = Utc::now();
        db.insert_manual_log(ManualLogEntry {
            user_id: user_id.into(),
            context: stage_context(),
            duration_minutes: minutes,
            items_processed: 0,
            orders_processed: 0,
            started_at: now - Duration::minutes(minutes as i64),
            completed_at: now,
            admin_notes: None,
        })
        .await
        .unwrap();
    }

    async fn start_backdated(h: &Harness, user_id: &str, minutes: i64) -> SessionInfo {
        let session = h.timer.start(user_id, stage_context()).await.unwrap();
        let id = session.id.clone();
        h.db.execute(move |conn| {
            let target = Utc::now() - Duration::minutes(minutes);
            conn.execute(
                "UPDATE sessions SET started_at = ?1 WHERE id = ?2",
                params![target.to_rfc3339(), id],
            )?;
            Ok(())
        })
        .await
        .unwrap();
        session
    }

    async fn expire_warning_deadline(db: &Database, user_id: &str) {
        let user_id = user_id.to_string();
        db.execute(move |conn| {
            let past = Utc::now() - Duration::minutes(1);
            conn.execute(
                "UPDATE limit_warnings SET deadline = ?1 WHERE user_id = ?2",
                params![past.to_rfc3339(), user_id],
            )?;
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn under_the_cap_nothing_happens() {
        let h = setup().await;
        log_minutes_today(&h.db, "worker-1", 100.0).await;

        let warning = h.guard.evaluate_user("worker-1", Utc::now()).await.unwrap();
        assert!(warning.is_none());
    }

    #[tokio::test]
    async fn breach_opens_exactly_one_warning_per_day() {
        let h = setup().await;
        // 8.5 hours against the default 8 hour cap.
        log_minutes_today(&h.db, "worker-1", 510.0).await;

        let first = h
            .guard
            .evaluate_user("worker-1", Utc::now())
            .await
            .unwrap()
            .expect("warning should open");
        assert!(first.resolution.is_none());
        assert!((first.worked_minutes - 510.0).abs() < 0.1);

        // Re-evaluating does not open a second warning or move the deadline.
        let second = h
            .guard
            .evaluate_user("worker-1", Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.deadline, second.deadline);
    }

    #[tokio::test]
    async fn live_session_crossing_the_cap_triggers_within_one_evaluation() {
        let h = setup().await;
        // 7h50m finalized, then 25 live minutes push past eight hours.
        log_minutes_today(&h.db, "worker-1", 470.0).await;
        start_backdated(&h, "worker-1", 25).await;

        let warning = h.guard.evaluate_user("worker-1", Utc::now()).await.unwrap();
        assert!(warning.is_some());
    }

    #[tokio::test]
    async fn expired_countdown_force_stops_without_a_client() {
        let h = setup().await;
        log_minutes_today(&h.db, "worker-1", 510.0).await;
        let session = start_backdated(&h, "worker-1", 10).await;

        h.guard.evaluate_user("worker-1", Utc::now()).await.unwrap();
        expire_warning_deadline(&h.db, "worker-1").await;

        let resolved = h
            .guard
            .evaluate_user("worker-1", Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.resolution, Some(WarningResolution::NoResponse));

        // The session was stopped with the forced action recorded.
        assert!(h.timer.active_session("worker-1").await.unwrap().is_none());
        let logs = h
            .db
            .list_logs(LogFilter {
                user_id: Some("worker-1".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let forced = logs
            .iter()
            .find(|log| log.session_id == session.id)
            .unwrap();
        assert_eq!(forced.action, LogAction::AutoStopped);

        assert!(h.guard.logout_required("worker-1").await.unwrap());
    }

    #[tokio::test]
    async fn continue_acknowledgement_suppresses_until_tomorrow() {
        let h = setup().await;
        log_minutes_today(&h.db, "worker-1", 510.0).await;
        start_backdated(&h, "worker-1", 10).await;

        h.guard.evaluate_user("worker-1", Utc::now()).await.unwrap();
        let ack = h
            .guard
            .acknowledge("worker-1", Acknowledgement::Continue)
            .await
            .unwrap();
        assert_eq!(ack.resolution, Some(WarningResolution::Continue));

        // Session keeps running, no logout, and the expired deadline no
        // longer matters once acknowledged.
        expire_warning_deadline(&h.db, "worker-1").await;
        let after = h
            .guard
            .evaluate_user("worker-1", Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.resolution, Some(WarningResolution::Continue));
        assert!(h.timer.active_session("worker-1").await.unwrap().is_some());
        assert!(!h.guard.logout_required("worker-1").await.unwrap());
    }

    #[tokio::test]
    async fn stop_acknowledgement_stops_and_flags_logout() {
        let h = setup().await;
        log_minutes_today(&h.db, "worker-1", 510.0).await;
        let session = start_backdated(&h, "worker-1", 10).await;

        h.guard.evaluate_user("worker-1", Utc::now()).await.unwrap();
        let ack = h
            .guard
            .acknowledge("worker-1", Acknowledgement::Stop)
            .await
            .unwrap();
        assert_eq!(ack.resolution, Some(WarningResolution::Stop));

        assert!(h.timer.active_session("worker-1").await.unwrap().is_none());
        let logs = h
            .db
            .list_logs(LogFilter {
                user_id: Some("worker-1".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let stopped = logs
            .iter()
            .find(|log| log.session_id == session.id)
            .unwrap();
        assert_eq!(stopped.action, LogAction::Stopped);

        assert!(h.guard.logout_required("worker-1").await.unwrap());
    }

    #[tokio::test]
    async fn acknowledging_without_a_warning_is_not_found() {
        let h = setup().await;

        let err = h
            .guard
            .acknowledge("worker-1", Acknowledgement::Continue)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
