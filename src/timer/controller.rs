use chrono::{NaiveDate, Utc};
use log::{info, warn};
use uuid::Uuid;

use crate::db::{
    models::{
        DailyHours, LogAction, LogCorrection, ManualLogEntry, Role, SessionInfo, SessionState,
        TimerLog, TimerSession, WorkContext,
    },
    Database,
};
use crate::error::{Error, Result};

use super::elapsed;

/// Command surface of the timer core. Cheap to clone; every transition is
/// one transaction on the database worker thread, so concurrent commands on
/// the same session resolve in a deterministic order.
#[derive(Clone)]
pub struct TimerController {
    db: Database,
}

impl TimerController {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open a Running session for the user. Fails with `Conflict` while any
    /// other timer of theirs is still open, whatever its workflow context.
    pub async fn start(&self, user_id: &str, context: WorkContext) -> Result<SessionInfo> {
        if context.context_id.trim().is_empty() {
            return Err(Error::InvalidState(
                "cannot start a timer without a workflow context id".into(),
            ));
        }

        let now = Utc::now();
        let session = TimerSession {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            context,
            state: SessionState::Running,
            started_at: Some(now),
            accumulated_minutes: 0.0,
            items_processed: 0,
            orders_processed: 0,
            created_at: now,
            updated_at: now,
        };

        let session = self.db.insert_session_if_idle(session).await?;
        info!(
            "Started session {} for user {} on {} {}",
            session.id,
            session.user_id,
            session.context.kind.as_str(),
            session.context.context_id
        );
        Ok(SessionInfo::new(session, 0.0))
    }

    pub async fn pause(&self, session_id: &str) -> Result<SessionInfo> {
        let now = Utc::now();
        let session = self.db.pause_session(session_id, now).await?;
        let elapsed = elapsed::elapsed_minutes(&session, now);
        Ok(SessionInfo::new(session, elapsed))
    }

    pub async fn resume(&self, session_id: &str) -> Result<SessionInfo> {
        let now = Utc::now();
        let session = self.db.resume_session(session_id, now).await?;
        let elapsed = elapsed::elapsed_minutes(&session, now);
        Ok(SessionInfo::new(session, elapsed))
    }

    /// Stop the session and emit its completion record. The counters passed
    /// here are the worker's authoritative final values and overwrite
    /// whatever the session had. Safe to retry: replays return the record
    /// the first call produced.
    pub async fn stop(
        &self,
        session_id: &str,
        items_processed: u64,
        orders_processed: u64,
    ) -> Result<TimerLog> {
        let log = self
            .db
            .stop_session(
                session_id,
                Some((items_processed, orders_processed)),
                LogAction::Stopped,
                Utc::now(),
            )
            .await?;
        info!(
            "Stopped session {} for user {} at {:.2} min",
            log.session_id, log.user_id, log.duration_minutes
        );
        Ok(log)
    }

    /// Stop without worker input, keeping the session's own counters. Used
    /// by the limit guard's acknowledge path (`stopped`) and its expired
    /// countdown (`auto_stopped`).
    pub(crate) async fn stop_unattended(
        &self,
        session_id: &str,
        action: LogAction,
    ) -> Result<TimerLog> {
        let log = self
            .db
            .stop_session(session_id, None, action, Utc::now())
            .await?;
        warn!(
            "Force-stopped session {} for user {} ({})",
            log.session_id,
            log.user_id,
            log.action.as_str()
        );
        Ok(log)
    }

    pub async fn update_counters(
        &self,
        session_id: &str,
        items_processed: u64,
        orders_processed: u64,
    ) -> Result<SessionInfo> {
        let now = Utc::now();
        let session = self
            .db
            .update_session_counters(session_id, items_processed, orders_processed, now)
            .await?;
        let elapsed = elapsed::elapsed_minutes(&session, now);
        Ok(SessionInfo::new(session, elapsed))
    }

    /// The user's open session with its live elapsed minutes, if any.
    pub async fn active_session(&self, user_id: &str) -> Result<Option<SessionInfo>> {
        let now = Utc::now();
        Ok(self
            .db
            .get_active_session_for_user(user_id)
            .await?
            .map(|session| {
                let elapsed = elapsed::elapsed_minutes(&session, now);
                SessionInfo::new(session, elapsed)
            }))
    }

    /// Worked minutes for one UTC day: finalized logs plus the live elapsed
    /// of the open session when the day is today. Recomputed on every call.
    pub async fn daily_hours(&self, user_id: &str, day: NaiveDate) -> Result<DailyHours> {
        let logged_minutes = self.db.sum_log_minutes_for_day(user_id, day).await?;

        let now = Utc::now();
        let live_minutes = if day == now.date_naive() {
            match self.db.get_active_session_for_user(user_id).await? {
                Some(session) => elapsed::elapsed_minutes(&session, now),
                None => 0.0,
            }
        } else {
            0.0
        };

        Ok(DailyHours {
            user_id: user_id.to_string(),
            day,
            logged_minutes,
            live_minutes,
            total_minutes: logged_minutes + live_minutes,
        })
    }

    /// Admin correction of a finalized record; never re-opens the session.
    pub async fn correct_log(
        &self,
        role: Role,
        log_id: &str,
        correction: LogCorrection,
    ) -> Result<TimerLog> {
        require_admin(role, "correct a timer log")?;
        self.db.correct_log(log_id, correction, Utc::now()).await
    }

    /// Admin backfill for work that was never timed.
    pub async fn add_manual_log(&self, role: Role, entry: ManualLogEntry) -> Result<TimerLog> {
        require_admin(role, "add a manual time entry")?;
        self.db.insert_manual_log(entry).await
    }
}

fn require_admin(role: Role, operation: &str) -> Result<()> {
    if role != Role::Admin {
        return Err(Error::PermissionDenied(format!(
            "only admins may {operation}"
        )));
    }
    Ok(())
}
