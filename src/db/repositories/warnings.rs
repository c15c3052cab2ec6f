use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};

use crate::db::{
    helpers::{day_key, parse_datetime, parse_day, parse_optional_datetime, parse_resolution},
    models::{LimitWarning, WarningResolution},
    Database,
};
use crate::error::{Error, Result};

const WARNING_COLUMNS: &str =
    "id, user_id, day, opened_at, deadline, worked_minutes, resolution, resolved_at";

fn row_to_warning(row: &Row) -> Result<LimitWarning> {
    let day: String = row.get("day")?;
    let opened_at: String = row.get("opened_at")?;
    let deadline: String = row.get("deadline")?;
    let resolution: Option<String> = row.get("resolution")?;
    let resolved_at: Option<String> = row.get("resolved_at")?;

    Ok(LimitWarning {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        day: parse_day(&day)?,
        opened_at: parse_datetime(&opened_at, "opened_at")?,
        deadline: parse_datetime(&deadline, "deadline")?,
        worked_minutes: row.get("worked_minutes")?,
        resolution: resolution.as_deref().map(parse_resolution).transpose()?,
        resolved_at: parse_optional_datetime(resolved_at, "resolved_at")?,
    })
}

fn load_warning_for_day(
    conn: &Connection,
    user_id: &str,
    day: NaiveDate,
) -> Result<Option<LimitWarning>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {WARNING_COLUMNS} FROM limit_warnings WHERE user_id = ?1 AND day = ?2"
    ))?;

    let mut rows = stmt.query(params![user_id, day_key(day)])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_warning(row)?)),
        None => Ok(None),
    }
}

impl Database {
    pub async fn get_warning_for_day(
        &self,
        user_id: &str,
        day: NaiveDate,
    ) -> Result<Option<LimitWarning>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| load_warning_for_day(conn, &user_id, day))
            .await
    }

    /// Open the day's warning. Idempotent against a concurrent open: the
    /// (user, day) slot is unique and the stored row wins, so the countdown
    /// deadline never moves once set.
    pub async fn open_warning(&self, warning: LimitWarning) -> Result<LimitWarning> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO limit_warnings (id, user_id, day, opened_at, deadline,
                                             worked_minutes, resolution, resolved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, NULL)
                 ON CONFLICT(user_id, day) DO NOTHING",
                params![
                    warning.id,
                    warning.user_id,
                    day_key(warning.day),
                    warning.opened_at.to_rfc3339(),
                    warning.deadline.to_rfc3339(),
                    warning.worked_minutes,
                ],
            )?;

            let stored = load_warning_for_day(&tx, &warning.user_id, warning.day)?
                .ok_or_else(|| {
                    Error::DataIntegrity(format!(
                        "limit warning for user {} vanished during open",
                        warning.user_id
                    ))
                })?;
            tx.commit()?;
            Ok(stored)
        })
        .await
    }

    /// Resolve the day's warning, but only while it is still unresolved; a
    /// countdown that was answered in the meantime is left untouched.
    pub async fn resolve_warning(
        &self,
        user_id: &str,
        day: NaiveDate,
        resolution: WarningResolution,
        now: DateTime<Utc>,
    ) -> Result<LimitWarning> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            let updated = tx.execute(
                "UPDATE limit_warnings
                 SET resolution = ?1, resolved_at = ?2
                 WHERE user_id = ?3 AND day = ?4 AND resolution IS NULL",
                params![
                    resolution.as_str(),
                    now.to_rfc3339(),
                    user_id,
                    day_key(day),
                ],
            )?;

            if updated == 0 {
                return match load_warning_for_day(&tx, &user_id, day)? {
                    Some(warning) => Err(Error::InvalidState(format!(
                        "limit warning for user {user_id} was already resolved ({})",
                        warning
                            .resolution
                            .map(|r| r.as_str())
                            .unwrap_or("unresolved"),
                    ))),
                    None => Err(Error::NotFound(format!(
                        "no limit warning open today for user {user_id}"
                    ))),
                };
            }

            let warning = load_warning_for_day(&tx, &user_id, day)?.ok_or_else(|| {
                Error::DataIntegrity(format!(
                    "limit warning for user {user_id} vanished during resolve"
                ))
            })?;
            tx.commit()?;
            Ok(warning)
        })
        .await
    }

    /// Users the guard must look at this tick: anyone with an open session
    /// (may cross the cap) or an unresolved warning (countdown may expire).
    pub async fn users_needing_limit_evaluation(&self) -> Result<Vec<String>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT user_id FROM sessions WHERE state != 'Stopped'
                 UNION
                 SELECT user_id FROM limit_warnings WHERE resolution IS NULL",
            )?;

            let mut rows = stmt.query([])?;
            let mut users = Vec::new();
            while let Some(row) = rows.next()? {
                users.push(row.get::<_, String>(0)?);
            }
            Ok(users)
        })
        .await
    }

    /// Whether today's resolved warning obliges the auth layer to end the
    /// user's login session.
    pub async fn logout_required(&self, user_id: &str, day: NaiveDate) -> Result<bool> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            Ok(load_warning_for_day(conn, &user_id, day)?
                .and_then(|warning| warning.resolution)
                .map(|resolution| resolution.requires_logout())
                .unwrap_or(false))
        })
        .await
    }
}
