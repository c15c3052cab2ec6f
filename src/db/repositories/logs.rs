use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, params_from_iter, Connection, Row};
use uuid::Uuid;

use crate::db::{
    helpers::{day_bounds, parse_action, parse_datetime, parse_kind, parse_optional_datetime, to_i64, to_u64},
    models::{LogAction, LogCorrection, LogFilter, ManualLogEntry, TimerLog, WorkContext},
    Database,
};
use crate::error::{Error, Result};
use crate::timer::elapsed;

const LOG_COLUMNS: &str = "id, session_id, user_id, context_kind, context_id, order_id, \
     duration_minutes, items_processed, orders_processed, started_at, completed_at, action, \
     manual_entry, edited_at, admin_notes";

fn row_to_log(row: &Row) -> Result<TimerLog> {
    let kind: String = row.get("context_kind")?;
    let action: String = row.get("action")?;
    let started_at: String = row.get("started_at")?;
    let completed_at: String = row.get("completed_at")?;
    let edited_at: Option<String> = row.get("edited_at")?;
    let items: i64 = row.get("items_processed")?;
    let orders: i64 = row.get("orders_processed")?;
    let manual_entry: i64 = row.get("manual_entry")?;

    Ok(TimerLog {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        user_id: row.get("user_id")?,
        context: WorkContext {
            kind: parse_kind(&kind)?,
            context_id: row.get("context_id")?,
            order_id: row.get("order_id")?,
        },
        duration_minutes: row.get("duration_minutes")?,
        items_processed: to_u64(items, "items_processed")?,
        orders_processed: to_u64(orders, "orders_processed")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        completed_at: parse_datetime(&completed_at, "completed_at")?,
        action: parse_action(&action)?,
        manual_entry: manual_entry != 0,
        edited_at: parse_optional_datetime(edited_at, "edited_at")?,
        admin_notes: row.get("admin_notes")?,
    })
}

pub(crate) fn insert_log_row(conn: &Connection, log: &TimerLog) -> Result<()> {
    conn.execute(
        "INSERT INTO timer_logs (id, session_id, user_id, context_kind, context_id, order_id,
                                 duration_minutes, items_processed, orders_processed,
                                 started_at, completed_at, action, manual_entry,
                                 edited_at, admin_notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            log.id,
            log.session_id,
            log.user_id,
            log.context.kind.as_str(),
            log.context.context_id,
            log.context.order_id,
            log.duration_minutes,
            to_i64(log.items_processed)?,
            to_i64(log.orders_processed)?,
            log.started_at.to_rfc3339(),
            log.completed_at.to_rfc3339(),
            log.action.as_str(),
            log.manual_entry as i64,
            log.edited_at.as_ref().map(|dt| dt.to_rfc3339()),
            log.admin_notes,
        ],
    )?;
    Ok(())
}

pub(crate) fn load_log_for_session(
    conn: &Connection,
    session_id: &str,
) -> Result<Option<TimerLog>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LOG_COLUMNS} FROM timer_logs WHERE session_id = ?1"
    ))?;

    let mut rows = stmt.query(params![session_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_log(row)?)),
        None => Ok(None),
    }
}

impl Database {
    pub async fn get_log(&self, log_id: &str) -> Result<TimerLog> {
        let log_id = log_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {LOG_COLUMNS} FROM timer_logs WHERE id = ?1"
            ))?;

            let mut rows = stmt.query(params![log_id])?;
            match rows.next()? {
                Some(row) => row_to_log(row),
                None => Err(Error::NotFound(format!("unknown timer log {log_id}"))),
            }
        })
        .await
    }

    pub async fn list_logs(&self, filter: LogFilter) -> Result<Vec<TimerLog>> {
        self.execute(move |conn| {
            let mut clauses: Vec<&str> = Vec::new();
            let mut values: Vec<String> = Vec::new();

            if let Some(user_id) = &filter.user_id {
                values.push(user_id.clone());
                clauses.push("user_id = ?");
            }
            if let Some(order_id) = &filter.order_id {
                values.push(order_id.clone());
                clauses.push("order_id = ?");
            }
            if let Some(kind) = filter.kind {
                values.push(kind.as_str().to_string());
                clauses.push("context_kind = ?");
            }
            if let Some(context_id) = &filter.context_id {
                values.push(context_id.clone());
                clauses.push("context_id = ?");
            }
            if let Some(from_day) = filter.from_day {
                values.push(day_bounds(from_day).0);
                clauses.push("completed_at >= ?");
            }
            if let Some(to_day) = filter.to_day {
                values.push(day_bounds(to_day).1);
                clauses.push("completed_at < ?");
            }

            let mut sql = format!("SELECT {LOG_COLUMNS} FROM timer_logs");
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            sql.push_str(" ORDER BY completed_at ASC");

            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(values.iter()))?;
            let mut logs = Vec::new();
            while let Some(row) = rows.next()? {
                logs.push(row_to_log(row)?);
            }
            Ok(logs)
        })
        .await
    }

    /// Total finalized minutes for one user on one UTC day.
    pub async fn sum_log_minutes_for_day(&self, user_id: &str, day: NaiveDate) -> Result<f64> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let (start, end) = day_bounds(day);
            let total: f64 = conn.query_row(
                "SELECT COALESCE(SUM(duration_minutes), 0)
                 FROM timer_logs
                 WHERE user_id = ?1 AND completed_at >= ?2 AND completed_at < ?3",
                params![user_id, start, end],
                |row| row.get(0),
            )?;
            Ok(elapsed::sanitize_minutes(total, &user_id))
        })
        .await
    }

    /// Administrative correction of a finalized record. Adjusts the
    /// duration/counter/notes fields and stamps `edited_at`; the session
    /// itself stays closed.
    pub async fn correct_log(
        &self,
        log_id: &str,
        correction: LogCorrection,
        now: DateTime<Utc>,
    ) -> Result<TimerLog> {
        let log_id = log_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            let mut log = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {LOG_COLUMNS} FROM timer_logs WHERE id = ?1"
                ))?;
                let mut rows = stmt.query(params![log_id])?;
                match rows.next()? {
                    Some(row) => row_to_log(row)?,
                    None => return Err(Error::NotFound(format!("unknown timer log {log_id}"))),
                }
            };

            if let Some(duration) = correction.duration_minutes {
                log.duration_minutes =
                    elapsed::round_minutes(elapsed::sanitize_minutes(duration, &log.id));
            }
            if let Some(items) = correction.items_processed {
                log.items_processed = items;
            }
            if let Some(orders) = correction.orders_processed {
                log.orders_processed = orders;
            }
            if let Some(notes) = correction.admin_notes {
                log.admin_notes = Some(notes);
            }
            log.edited_at = Some(now);

            tx.execute(
                "UPDATE timer_logs
                 SET duration_minutes = ?1, items_processed = ?2, orders_processed = ?3,
                     admin_notes = ?4, edited_at = ?5
                 WHERE id = ?6",
                params![
                    log.duration_minutes,
                    to_i64(log.items_processed)?,
                    to_i64(log.orders_processed)?,
                    log.admin_notes,
                    now.to_rfc3339(),
                    log.id,
                ],
            )?;
            tx.commit()?;
            Ok(log)
        })
        .await
    }

    /// Admin-entered record for untimed work; `manual_entry` marks it apart
    /// from timer-produced logs.
    pub async fn insert_manual_log(&self, entry: ManualLogEntry) -> Result<TimerLog> {
        self.execute(move |conn| {
            let log = TimerLog {
                id: Uuid::new_v4().to_string(),
                // Manual entries have no timed session; they own their slot.
                session_id: Uuid::new_v4().to_string(),
                user_id: entry.user_id,
                context: entry.context,
                duration_minutes: elapsed::round_minutes(elapsed::sanitize_minutes(
                    entry.duration_minutes,
                    "manual entry",
                )),
                items_processed: entry.items_processed,
                orders_processed: entry.orders_processed,
                started_at: entry.started_at,
                completed_at: entry.completed_at,
                action: LogAction::Stopped,
                manual_entry: true,
                edited_at: None,
                admin_notes: entry.admin_notes,
            };
            insert_log_row(conn, &log)?;
            Ok(log)
        })
        .await
    }
}
