use chrono::{DateTime, Utc};
use log::warn;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::db::{
    helpers::{parse_datetime, parse_kind, parse_optional_datetime, parse_state, to_i64, to_u64},
    models::{LogAction, SessionState, TimerLog, TimerSession, WorkContext},
    Database,
};
use crate::error::{Error, Result};
use crate::timer::elapsed;

use super::logs::{insert_log_row, load_log_for_session};

const SESSION_COLUMNS: &str = "id, user_id, context_kind, context_id, order_id, state, \
     started_at, accumulated_minutes, items_processed, orders_processed, created_at, updated_at";

fn row_to_session(row: &Row) -> Result<TimerSession> {
    let kind: String = row.get("context_kind")?;
    let state: String = row.get("state")?;
    let started_at: Option<String> = row.get("started_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let items: i64 = row.get("items_processed")?;
    let orders: i64 = row.get("orders_processed")?;

    Ok(TimerSession {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        context: WorkContext {
            kind: parse_kind(&kind)?,
            context_id: row.get("context_id")?,
            order_id: row.get("order_id")?,
        },
        state: parse_state(&state)?,
        started_at: parse_optional_datetime(started_at, "started_at")?,
        accumulated_minutes: row.get("accumulated_minutes")?,
        items_processed: to_u64(items, "items_processed")?,
        orders_processed: to_u64(orders, "orders_processed")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

pub(crate) fn load_session(conn: &Connection, session_id: &str) -> Result<Option<TimerSession>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
    ))?;

    let mut rows = stmt.query(params![session_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_session(row)?)),
        None => Ok(None),
    }
}

pub(crate) fn load_active_for_user(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<TimerSession>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions
         WHERE user_id = ?1 AND state != 'Stopped'
         LIMIT 1"
    ))?;

    let mut rows = stmt.query(params![user_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_session(row)?)),
        None => Ok(None),
    }
}

pub(crate) fn insert_session_row(conn: &Connection, session: &TimerSession) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (id, user_id, context_kind, context_id, order_id, state,
                               started_at, accumulated_minutes, items_processed,
                               orders_processed, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            session.id,
            session.user_id,
            session.context.kind.as_str(),
            session.context.context_id,
            session.context.order_id,
            session.state.as_str(),
            session.started_at.as_ref().map(|dt| dt.to_rfc3339()),
            session.accumulated_minutes,
            to_i64(session.items_processed)?,
            to_i64(session.orders_processed)?,
            session.created_at.to_rfc3339(),
            session.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Close a session that a recovery snapshot has taken over. No completion
/// record is written: the restored session carries the time forward, and a
/// log here would double-count it.
pub(crate) fn close_session_row(
    conn: &Connection,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE sessions SET state = 'Stopped', updated_at = ?1 WHERE id = ?2",
        params![now.to_rfc3339(), session_id],
    )?;
    Ok(())
}

impl Database {
    /// Create the session if and only if the user has no open timer.
    /// The check and the insert run in one transaction on the worker
    /// thread; the partial unique index backstops any out-of-band writer.
    pub async fn insert_session_if_idle(&self, session: TimerSession) -> Result<TimerSession> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            if let Some(existing) = load_active_for_user(&tx, &session.user_id)? {
                return Err(Error::Conflict(format!(
                    "user {} already has an active timer (session {})",
                    session.user_id, existing.id
                )));
            }

            insert_session_row(&tx, &session)?;
            tx.commit()?;
            Ok(session)
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<TimerSession> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            load_session(conn, &session_id)?
                .ok_or_else(|| Error::NotFound(format!("unknown session {session_id}")))
        })
        .await
    }

    pub async fn get_active_session_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<TimerSession>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| load_active_for_user(conn, &user_id))
            .await
    }

    /// All non-terminal sessions for a user. The single-active invariant
    /// makes this at most one row, but save-all iterates defensively.
    pub async fn get_open_sessions_for_user(&self, user_id: &str) -> Result<Vec<TimerSession>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE user_id = ?1 AND state != 'Stopped'
                 ORDER BY created_at ASC"
            ))?;

            let mut rows = stmt.query(params![user_id])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    /// Running → Paused. Folds the running delta into the committed total;
    /// duplicate pause requests are rejected so the delta cannot be counted
    /// twice.
    pub async fn pause_session(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TimerSession> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut session = load_session(&tx, &session_id)?
                .ok_or_else(|| Error::NotFound(format!("unknown session {session_id}")))?;

            match session.state {
                SessionState::Running => {
                    let delta = elapsed::running_delta_minutes(&session, now);
                    session.accumulated_minutes = elapsed::sanitize_minutes(
                        session.accumulated_minutes + delta,
                        &session.id,
                    );
                    session.state = SessionState::Paused;
                    session.updated_at = now;

                    tx.execute(
                        "UPDATE sessions
                         SET state = ?1, accumulated_minutes = ?2, updated_at = ?3
                         WHERE id = ?4",
                        params![
                            session.state.as_str(),
                            session.accumulated_minutes,
                            now.to_rfc3339(),
                            session.id,
                        ],
                    )?;
                    tx.commit()?;
                    Ok(session)
                }
                SessionState::Paused => Err(Error::InvalidState(format!(
                    "session {} is already paused",
                    session.id
                ))),
                SessionState::Stopped => Err(Error::InvalidState(format!(
                    "cannot pause stopped session {}",
                    session.id
                ))),
            }
        })
        .await
    }

    /// Paused → Running. Re-anchors `started_at`; the committed total is
    /// untouched.
    pub async fn resume_session(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TimerSession> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut session = load_session(&tx, &session_id)?
                .ok_or_else(|| Error::NotFound(format!("unknown session {session_id}")))?;

            match session.state {
                SessionState::Paused => {
                    session.state = SessionState::Running;
                    session.started_at = Some(now);
                    session.updated_at = now;

                    tx.execute(
                        "UPDATE sessions SET state = ?1, started_at = ?2, updated_at = ?3
                         WHERE id = ?4",
                        params![
                            session.state.as_str(),
                            now.to_rfc3339(),
                            now.to_rfc3339(),
                            session.id,
                        ],
                    )?;
                    tx.commit()?;
                    Ok(session)
                }
                SessionState::Running => Err(Error::InvalidState(format!(
                    "session {} is already running",
                    session.id
                ))),
                SessionState::Stopped => Err(Error::InvalidState(format!(
                    "cannot resume stopped session {}; start a new timer",
                    session.id
                ))),
            }
        })
        .await
    }

    /// Running/Paused → Stopped, freezing the final elapsed time and
    /// emitting the completion record in the same transaction.
    ///
    /// Replaying stop against an already-stopped session returns the
    /// existing record as a no-op success; network retries are expected.
    pub async fn stop_session(
        &self,
        session_id: &str,
        final_counters: Option<(u64, u64)>,
        action: LogAction,
        now: DateTime<Utc>,
    ) -> Result<TimerLog> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let session = load_session(&tx, &session_id)?
                .ok_or_else(|| Error::NotFound(format!("unknown session {session_id}")))?;

            if session.state == SessionState::Stopped {
                if let Some(log) = load_log_for_session(&tx, &session.id)? {
                    return Ok(log);
                }
                return Err(Error::InvalidState(format!(
                    "session {} was closed without a completion record",
                    session.id
                )));
            }

            let final_minutes = elapsed::round_minutes(elapsed::elapsed_minutes(&session, now));
            let (items, orders) =
                final_counters.unwrap_or((session.items_processed, session.orders_processed));

            tx.execute(
                "UPDATE sessions
                 SET state = 'Stopped', accumulated_minutes = ?1,
                     items_processed = ?2, orders_processed = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![
                    final_minutes,
                    to_i64(items)?,
                    to_i64(orders)?,
                    now.to_rfc3339(),
                    session.id,
                ],
            )?;

            let log = TimerLog {
                id: Uuid::new_v4().to_string(),
                session_id: session.id.clone(),
                user_id: session.user_id.clone(),
                context: session.context.clone(),
                duration_minutes: final_minutes,
                items_processed: items,
                orders_processed: orders,
                started_at: session.created_at,
                completed_at: now,
                action,
                manual_entry: false,
                edited_at: None,
                admin_notes: None,
            };
            insert_log_row(&tx, &log)?;

            // A completed session must not resurrect through a stale
            // recovery snapshot; the log now owns this time.
            tx.execute(
                "DELETE FROM recovery_snapshots WHERE session_id = ?1",
                params![session.id],
            )?;

            tx.commit()?;
            Ok(log)
        })
        .await
    }

    /// Worker-entered progress counters. Decreasing values are clamped to
    /// the stored maximum — a stale tab must not wipe out fresher progress —
    /// and the anomaly is logged for investigation.
    pub async fn update_session_counters(
        &self,
        session_id: &str,
        items_processed: u64,
        orders_processed: u64,
        now: DateTime<Utc>,
    ) -> Result<TimerSession> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut session = load_session(&tx, &session_id)?
                .ok_or_else(|| Error::NotFound(format!("unknown session {session_id}")))?;

            if !session.state.is_open() {
                return Err(Error::InvalidState(format!(
                    "cannot update counters on stopped session {}",
                    session.id
                )));
            }

            if items_processed < session.items_processed
                || orders_processed < session.orders_processed
            {
                warn!(
                    "Rejecting counter decrease for session {}: items {} -> {}, orders {} -> {}",
                    session.id,
                    session.items_processed,
                    items_processed,
                    session.orders_processed,
                    orders_processed,
                );
            }

            session.items_processed = session.items_processed.max(items_processed);
            session.orders_processed = session.orders_processed.max(orders_processed);
            session.updated_at = now;

            tx.execute(
                "UPDATE sessions
                 SET items_processed = ?1, orders_processed = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![
                    to_i64(session.items_processed)?,
                    to_i64(session.orders_processed)?,
                    now.to_rfc3339(),
                    session.id,
                ],
            )?;
            tx.commit()?;
            Ok(session)
        })
        .await
    }
}
