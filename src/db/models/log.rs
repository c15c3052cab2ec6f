use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::session::{WorkContext, WorkKind};

/// How a session reached its terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LogAction {
    /// The worker (or an explicit limit acknowledgement) stopped the timer.
    Stopped,
    /// The daily limit guard force-stopped it after an unanswered countdown.
    AutoStopped,
}

impl LogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogAction::Stopped => "stopped",
            LogAction::AutoStopped => "auto_stopped",
        }
    }
}

/// Immutable completion record, written exactly once when a session stops.
/// Admin corrections adjust the duration/counter/notes fields in place and
/// stamp `edited_at`; they never re-open the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerLog {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub context: WorkContext,
    pub duration_minutes: f64,
    pub items_processed: u64,
    pub orders_processed: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub action: LogAction,
    pub manual_entry: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub admin_notes: Option<String>,
}

/// Caller role resolved by the embedding auth layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Worker,
    Admin,
}

/// Partial update applied by an admin correction. `None` fields are left
/// untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogCorrection {
    pub duration_minutes: Option<f64>,
    pub items_processed: Option<u64>,
    pub orders_processed: Option<u64>,
    pub admin_notes: Option<String>,
}

/// Query filter over completion records. `None` fields match everything;
/// the day range is inclusive on both ends (UTC, by `completed_at`).
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub user_id: Option<String>,
    pub order_id: Option<String>,
    pub kind: Option<WorkKind>,
    pub context_id: Option<String>,
    pub from_day: Option<NaiveDate>,
    pub to_day: Option<NaiveDate>,
}

/// Admin-entered record for work that was never timed (forgotten timer,
/// paper backfill). Flows into reports like any timer-produced log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualLogEntry {
    pub user_id: String,
    pub context: WorkContext,
    pub duration_minutes: f64,
    pub items_processed: u64,
    pub orders_processed: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub admin_notes: Option<String>,
}
