use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::models::WorkKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDateRollup {
    pub user_id: String,
    pub day: NaiveDate,
    pub total_minutes: f64,
    pub total_items: u64,
    pub total_orders: u64,
    pub items_per_hour: f64,
    pub labor_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRollup {
    pub order_id: String,
    pub total_minutes: f64,
    pub total_items: u64,
    pub items_per_hour: f64,
    pub labor_cost: f64,
    pub cost_per_item: f64,
    /// Labor cost as a percentage of the order's total value, 0 when the
    /// caller supplied no (or a zero) order total.
    pub cost_percent_of_order: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRollup {
    pub kind: WorkKind,
    pub context_id: String,
    pub total_minutes: f64,
    pub total_items: u64,
    pub items_per_hour: f64,
    pub labor_cost: f64,
}
