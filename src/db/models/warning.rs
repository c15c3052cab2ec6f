use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// How a daily-limit warning ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum WarningResolution {
    /// Worker elected to keep working; guard suppressed until tomorrow.
    Continue,
    /// Worker elected to stop; their session was stopped and they log out.
    Stop,
    /// Countdown expired with no answer; treated as stop, recorded apart.
    NoResponse,
}

impl WarningResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningResolution::Continue => "continue",
            WarningResolution::Stop => "stop",
            WarningResolution::NoResponse => "no_response",
        }
    }

    /// Whether this resolution requires the embedding auth layer to end the
    /// user's login session.
    pub fn requires_logout(&self) -> bool {
        matches!(self, WarningResolution::Stop | WarningResolution::NoResponse)
    }
}

/// One per user per UTC calendar day, at most. `resolution = None` means the
/// countdown is live; `deadline` is the server-anchored forced-stop moment,
/// enforced by the guard loop whether or not any client is watching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitWarning {
    pub id: String,
    pub user_id: String,
    pub day: NaiveDate,
    pub opened_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    /// Worked minutes at the moment the warning opened, for display.
    pub worked_minutes: f64,
    pub resolution: Option<WarningResolution>,
    pub resolved_at: Option<DateTime<Utc>>,
}
