use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};

use crate::db::models::{LogAction, SessionState, WarningResolution, WorkKind};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_day(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("failed to parse day '{value}'"))
}

pub fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// RFC 3339 bounds of a UTC calendar day, for range queries over the
/// timestamp columns (the stored strings sort chronologically).
pub fn day_bounds(day: NaiveDate) -> (String, String) {
    let start = day.and_time(chrono::NaiveTime::MIN).and_utc();
    let end = start + chrono::Duration::days(1);
    (start.to_rfc3339(), end.to_rfc3339())
}

pub fn parse_state(value: &str) -> Result<SessionState> {
    match value {
        "Running" => Ok(SessionState::Running),
        "Paused" => Ok(SessionState::Paused),
        "Stopped" => Ok(SessionState::Stopped),
        other => Err(anyhow!("unknown session state {other}")),
    }
}

pub fn parse_kind(value: &str) -> Result<WorkKind> {
    match value {
        "production_stage" => Ok(WorkKind::ProductionStage),
        "fulfillment_stage" => Ok(WorkKind::FulfillmentStage),
        "batch" => Ok(WorkKind::Batch),
        other => Err(anyhow!("unknown work kind {other}")),
    }
}

pub fn parse_action(value: &str) -> Result<LogAction> {
    match value {
        "stopped" => Ok(LogAction::Stopped),
        "auto_stopped" => Ok(LogAction::AutoStopped),
        other => Err(anyhow!("unknown log action {other}")),
    }
}

pub fn parse_resolution(value: &str) -> Result<WarningResolution> {
    match value {
        "continue" => Ok(WarningResolution::Continue),
        "stop" => Ok(WarningResolution::Stop),
        "no_response" => Ok(WarningResolution::NoResponse),
        other => Err(anyhow!("unknown warning resolution {other}")),
    }
}
