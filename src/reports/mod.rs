//! Read-only rollups over the completion records.
//!
//! Every query re-derives its numbers from the logs at call time — there is
//! no cached counter anywhere — so an admin correction shows up on the very
//! next aggregation. All ratios guard division by zero and report 0.

mod types;

pub use types::{ContextRollup, OrderRollup, UserDateRollup};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::config::ConfigStore;
use crate::db::{
    models::{LogFilter, TimerLog, WorkKind},
    Database,
};
use crate::error::Result;

#[derive(Clone)]
pub struct Reporter {
    db: Database,
    config: Arc<ConfigStore>,
}

impl Reporter {
    pub fn new(db: Database, config: Arc<ConfigStore>) -> Self {
        Self { db, config }
    }

    /// Worked time per user per UTC day.
    pub async fn by_user_date(&self, filter: LogFilter) -> Result<Vec<UserDateRollup>> {
        let rate = self.config.billing().hourly_rate;
        let logs = self.db.list_logs(filter).await?;

        struct Acc {
            minutes: f64,
            items: u64,
            orders: u64,
        }

        let mut groups: BTreeMap<(String, chrono::NaiveDate), Acc> = BTreeMap::new();
        for log in logs {
            let key = (log.user_id.clone(), log.completed_at.date_naive());
            let acc = groups.entry(key).or_insert(Acc {
                minutes: 0.0,
                items: 0,
                orders: 0,
            });
            acc.minutes += log.duration_minutes;
            acc.items += log.items_processed;
            acc.orders += log.orders_processed;
        }

        Ok(groups
            .into_iter()
            .map(|((user_id, day), acc)| UserDateRollup {
                user_id,
                day,
                total_minutes: acc.minutes,
                total_items: acc.items,
                total_orders: acc.orders,
                items_per_hour: items_per_hour(acc.minutes, acc.items),
                labor_cost: labor_cost(acc.minutes, rate),
            })
            .collect())
    }

    /// Worked time per order. `order_totals` maps order ids to their sales
    /// value (owned by the order service); orders absent from the map report
    /// a zero cost percentage rather than an error.
    pub async fn by_order(
        &self,
        filter: LogFilter,
        order_totals: HashMap<String, f64>,
    ) -> Result<Vec<OrderRollup>> {
        let rate = self.config.billing().hourly_rate;
        let logs = self.db.list_logs(filter).await?;

        struct Acc {
            minutes: f64,
            items: u64,
        }

        let mut groups: BTreeMap<String, Acc> = BTreeMap::new();
        for log in logs {
            let Some(order_id) = log.context.order_id.clone() else {
                continue;
            };
            let acc = groups.entry(order_id).or_insert(Acc {
                minutes: 0.0,
                items: 0,
            });
            acc.minutes += log.duration_minutes;
            acc.items += log.items_processed;
        }

        Ok(groups
            .into_iter()
            .map(|(order_id, acc)| {
                let cost = labor_cost(acc.minutes, rate);
                let order_total = order_totals.get(&order_id).copied().unwrap_or(0.0);
                OrderRollup {
                    total_minutes: acc.minutes,
                    total_items: acc.items,
                    items_per_hour: items_per_hour(acc.minutes, acc.items),
                    labor_cost: cost,
                    cost_per_item: ratio(cost, acc.items as f64),
                    cost_percent_of_order: if order_total > 0.0 {
                        cost / order_total * 100.0
                    } else {
                        0.0
                    },
                    order_id,
                }
            })
            .collect())
    }

    /// Worked time per production/fulfillment stage.
    pub async fn by_stage(&self, filter: LogFilter) -> Result<Vec<ContextRollup>> {
        let logs = self.db.list_logs(filter).await?;
        Ok(self.context_rollups(logs, |kind| kind != WorkKind::Batch))
    }

    /// Worked time per batch.
    pub async fn by_batch(&self, filter: LogFilter) -> Result<Vec<ContextRollup>> {
        let logs = self.db.list_logs(filter).await?;
        Ok(self.context_rollups(logs, |kind| kind == WorkKind::Batch))
    }

    fn context_rollups(
        &self,
        logs: Vec<TimerLog>,
        keep: impl Fn(WorkKind) -> bool,
    ) -> Vec<ContextRollup> {
        let rate = self.config.billing().hourly_rate;

        struct Acc {
            kind: WorkKind,
            minutes: f64,
            items: u64,
        }

        let mut groups: BTreeMap<(&'static str, String), Acc> = BTreeMap::new();
        for log in logs {
            if !keep(log.context.kind) {
                continue;
            }
            let key = (log.context.kind.as_str(), log.context.context_id.clone());
            let acc = groups.entry(key).or_insert(Acc {
                kind: log.context.kind,
                minutes: 0.0,
                items: 0,
            });
            acc.minutes += log.duration_minutes;
            acc.items += log.items_processed;
        }

        groups
            .into_iter()
            .map(|((_, context_id), acc)| ContextRollup {
                kind: acc.kind,
                context_id,
                total_minutes: acc.minutes,
                total_items: acc.items,
                items_per_hour: items_per_hour(acc.minutes, acc.items),
                labor_cost: labor_cost(acc.minutes, rate),
            })
            .collect()
    }
}

fn items_per_hour(minutes: f64, items: u64) -> f64 {
    if minutes > 0.0 {
        items as f64 / (minutes / 60.0)
    } else {
        0.0
    }
}

fn labor_cost(minutes: f64, hourly_rate: f64) -> f64 {
    if minutes > 0.0 {
        minutes / 60.0 * hourly_rate
    } else {
        0.0
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{LogCorrection, ManualLogEntry, WorkContext};
    use chrono::{Duration, Utc};

    fn context(kind: WorkKind, context_id: &str, order_id: Option<&str>) -> WorkContext {
        WorkContext {
            kind,
            context_id: context_id.into(),
            order_id: order_id.map(Into::into),
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        db: Database,
        reporter: Reporter,
    }

    async fn setup() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("test.sqlite3")).unwrap();
        let config = Arc::new(ConfigStore::new(dir.path().join("settings.json")).unwrap());
        Harness {
            _dir: dir,
            reporter: Reporter::new(db.clone(), config),
            db,
        }
    }

    async fn seed_log(
        h: &Harness,
        user_id: &str,
        ctx: WorkContext,
        minutes: f64,
        items: u64,
    ) -> String {
        let now = Utc::now();
        let log = h
            .db
            .insert_manual_log(ManualLogEntry {
                user_id: user_id.into(),
                context: ctx,
                duration_minutes: minutes,
                items_processed: items,
                orders_processed: 1,
                started_at: now - Duration::minutes(minutes.max(1.0) as i64),
                completed_at: now,
                admin_notes: None,
            })
            .await
            .unwrap();
        log.id
    }

    #[tokio::test]
    async fn user_date_rollup_sums_and_costs() {
        let h = setup().await;
        let stage = context(WorkKind::ProductionStage, "stage-cnc", None);
        seed_log(&h, "worker-1", stage.clone(), 60.0, 30).await;
        seed_log(&h, "worker-1", stage.clone(), 30.0, 0).await;
        seed_log(&h, "worker-2", stage, 15.0, 5).await;

        let rollups = h
            .reporter
            .by_user_date(LogFilter::default())
            .await
            .unwrap();
        assert_eq!(rollups.len(), 2);

        let first = rollups
            .iter()
            .find(|r| r.user_id == "worker-1")
            .unwrap();
        assert!((first.total_minutes - 90.0).abs() < 1e-9);
        assert_eq!(first.total_items, 30);
        // 30 items over 1.5 hours, at the default 22.0/h rate.
        assert!((first.items_per_hour - 20.0).abs() < 1e-9);
        assert!((first.labor_cost - 33.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn zero_minute_groups_report_zero_not_nan() {
        let h = setup().await;
        seed_log(
            &h,
            "worker-1",
            context(WorkKind::ProductionStage, "stage-qa", None),
            0.0,
            5,
        )
        .await;

        let rollups = h
            .reporter
            .by_user_date(LogFilter::default())
            .await
            .unwrap();
        let rollup = &rollups[0];
        assert_eq!(rollup.items_per_hour, 0.0);
        assert_eq!(rollup.labor_cost, 0.0);
        assert!(rollup.items_per_hour.is_finite());
    }

    #[tokio::test]
    async fn order_rollup_computes_cost_share() {
        let h = setup().await;
        let ctx = context(WorkKind::ProductionStage, "stage-cnc", Some("order-9"));
        seed_log(&h, "worker-1", ctx.clone(), 60.0, 5).await;
        seed_log(&h, "worker-2", ctx, 60.0, 5).await;
        // Logs without an order id stay out of order rollups.
        seed_log(
            &h,
            "worker-1",
            context(WorkKind::Batch, "batch-2", None),
            30.0,
            2,
        )
        .await;

        let mut totals = HashMap::new();
        totals.insert("order-9".to_string(), 400.0);

        let rollups = h
            .reporter
            .by_order(LogFilter::default(), totals)
            .await
            .unwrap();
        assert_eq!(rollups.len(), 1);

        let rollup = &rollups[0];
        // 2 hours at 22.0/h = 44.0 cost, 11% of a 400.0 order, 4.4 per item.
        assert!((rollup.labor_cost - 44.0).abs() < 1e-9);
        assert!((rollup.cost_percent_of_order - 11.0).abs() < 1e-9);
        assert!((rollup.cost_per_item - 4.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unknown_order_total_reports_zero_percent() {
        let h = setup().await;
        seed_log(
            &h,
            "worker-1",
            context(WorkKind::ProductionStage, "stage-cnc", Some("order-9")),
            60.0,
            0,
        )
        .await;

        let rollups = h
            .reporter
            .by_order(LogFilter::default(), HashMap::new())
            .await
            .unwrap();
        assert_eq!(rollups[0].cost_percent_of_order, 0.0);
        assert_eq!(rollups[0].cost_per_item, 0.0);
    }

    #[tokio::test]
    async fn stage_and_batch_rollups_split_by_kind() {
        let h = setup().await;
        seed_log(
            &h,
            "worker-1",
            context(WorkKind::ProductionStage, "stage-cnc", None),
            60.0,
            10,
        )
        .await;
        seed_log(
            &h,
            "worker-1",
            context(WorkKind::FulfillmentStage, "stage-shipping", None),
            30.0,
            6,
        )
        .await;
        seed_log(
            &h,
            "worker-2",
            context(WorkKind::Batch, "batch-5", None),
            45.0,
            9,
        )
        .await;

        let stages = h.reporter.by_stage(LogFilter::default()).await.unwrap();
        assert_eq!(stages.len(), 2);
        assert!(stages.iter().all(|r| r.kind != WorkKind::Batch));

        let batches = h.reporter.by_batch(LogFilter::default()).await.unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].context_id, "batch-5");
        assert!((batches[0].items_per_hour - 12.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn admin_corrections_show_up_on_the_next_aggregation() {
        let h = setup().await;
        let log_id = seed_log(
            &h,
            "worker-1",
            context(WorkKind::ProductionStage, "stage-cnc", None),
            60.0,
            10,
        )
        .await;

        let before = h
            .reporter
            .by_user_date(LogFilter::default())
            .await
            .unwrap();
        assert!((before[0].total_minutes - 60.0).abs() < 1e-9);

        h.db.correct_log(
            &log_id,
            LogCorrection {
                duration_minutes: Some(90.0),
                ..Default::default()
            },
            Utc::now(),
        )
        .await
        .unwrap();

        let after = h
            .reporter
            .by_user_date(LogFilter::default())
            .await
            .unwrap();
        assert!((after[0].total_minutes - 90.0).abs() < 1e-9);
    }
}
