use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Running,
    Paused,
    Stopped,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Running => "Running",
            SessionState::Paused => "Paused",
            SessionState::Stopped => "Stopped",
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, SessionState::Stopped)
    }
}

/// Which floor workflow a session times. Also the snapshot slot key: a user
/// keeps at most one recovery snapshot per kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum WorkKind {
    ProductionStage,
    FulfillmentStage,
    Batch,
}

impl WorkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkKind::ProductionStage => "production_stage",
            WorkKind::FulfillmentStage => "fulfillment_stage",
            WorkKind::Batch => "batch",
        }
    }
}

/// Opaque reference to the floor entity being worked. The ids are foreign
/// keys owned by the order/production services; this core only carries them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkContext {
    pub kind: WorkKind,
    pub context_id: String,
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSession {
    pub id: String,
    pub user_id: String,
    pub context: WorkContext,
    pub state: SessionState,
    /// Wall-clock start of the most recent Running phase. Reset on resume;
    /// kept after pause/stop for audit but no longer used for accrual.
    pub started_at: Option<DateTime<Utc>>,
    /// Minutes committed by previous Running phases, frozen at each pause.
    pub accumulated_minutes: f64,
    pub items_processed: u64,
    pub orders_processed: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// API-facing view of a session with its live elapsed time attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub user_id: String,
    pub context: WorkContext,
    pub state: SessionState,
    pub elapsed_minutes: f64,
    pub items_processed: u64,
    pub orders_processed: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new(session: TimerSession, elapsed_minutes: f64) -> Self {
        Self {
            id: session.id,
            user_id: session.user_id,
            context: session.context,
            state: session.state,
            elapsed_minutes,
            items_processed: session.items_processed,
            orders_processed: session.orders_processed,
            started_at: session.started_at,
            created_at: session.created_at,
        }
    }
}

/// A user's worked time for one calendar day (UTC): finalized log minutes
/// plus the live elapsed of the open session, if any. Always computed fresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyHours {
    pub user_id: String,
    pub day: NaiveDate,
    pub logged_minutes: f64,
    pub live_minutes: f64,
    pub total_minutes: f64,
}
