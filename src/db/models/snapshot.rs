use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::WorkContext;

/// Durability checkpoint of an in-flight session, written by save-all just
/// before a logout completes (or found after a crash). One-shot: consumed by
/// restore or discard, whichever resolves it first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverySnapshot {
    pub save_id: String,
    pub user_id: String,
    /// The open session this snapshot was taken from. Restore uses it to
    /// tell a crash leftover apart from a genuinely different active timer.
    pub session_id: String,
    pub context: WorkContext,
    /// Engine output at save time; seeds `accumulated_minutes` on restore.
    pub elapsed_minutes: f64,
    pub items_processed: u64,
    pub orders_processed: u64,
    pub saved_at: DateTime<Utc>,
}
