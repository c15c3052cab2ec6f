//! Save/recover protocol for in-flight sessions.
//!
//! Logout must not silently destroy unbilled labor time: save-all writes a
//! durability checkpoint per open session just before the logout completes,
//! and the next login offers each checkpoint for restore or discard. A
//! snapshot is one-shot; whichever resolution runs first consumes it.

use chrono::Utc;
use log::info;
use uuid::Uuid;

use crate::db::{
    models::{RecoverySnapshot, SessionInfo},
    Database,
};
use crate::error::Result;
use crate::timer::elapsed;

#[derive(Clone)]
pub struct RecoveryManager {
    db: Database,
}

impl RecoveryManager {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Checkpoint every open session the user owns. The sessions themselves
    /// are left untouched — this is durability, not a stop. Returns the
    /// number of snapshots written.
    pub async fn save_all(&self, user_id: &str) -> Result<u64> {
        let now = Utc::now();
        let sessions = self.db.get_open_sessions_for_user(user_id).await?;

        let mut saved = 0;
        for session in sessions {
            let snapshot = RecoverySnapshot {
                save_id: Uuid::new_v4().to_string(),
                user_id: session.user_id.clone(),
                session_id: session.id.clone(),
                context: session.context.clone(),
                elapsed_minutes: elapsed::elapsed_minutes(&session, now),
                items_processed: session.items_processed,
                orders_processed: session.orders_processed,
                saved_at: now,
            };
            self.db.upsert_snapshot(snapshot).await?;
            saved += 1;
        }

        if saved > 0 {
            info!("Saved {saved} in-flight session(s) for user {user_id}");
        }
        Ok(saved)
    }

    /// Snapshots awaiting a restore/discard decision. No side effects.
    pub async fn check(&self, user_id: &str) -> Result<Vec<RecoverySnapshot>> {
        self.db.list_snapshots_for_user(user_id).await
    }

    /// Re-open a session from a snapshot, seeded with the saved elapsed
    /// minutes and counters. Fails with `Conflict` if the user already has
    /// an active timer other than the snapshot's own source session.
    pub async fn restore(&self, save_id: &str) -> Result<SessionInfo> {
        let now = Utc::now();
        let session = self.db.restore_snapshot(save_id, now).await?;
        info!(
            "Restored session {} for user {} at {:.2} min",
            session.id, session.user_id, session.accumulated_minutes
        );
        let elapsed = elapsed::elapsed_minutes(&session, now);
        Ok(SessionInfo::new(session, elapsed))
    }

    /// Drop a snapshot without restoring it. Irreversible; the in-flight
    /// time it carried is gone.
    pub async fn discard(&self, save_id: &str) -> Result<()> {
        self.db.discard_snapshot(save_id, Utc::now()).await?;
        info!("Discarded recovery snapshot {save_id}");
        Ok(())
    }

    pub async fn discard_all(&self, user_id: &str) -> Result<u64> {
        let discarded = self.db.discard_all_snapshots(user_id, Utc::now()).await?;
        if discarded > 0 {
            info!("Discarded {discarded} recovery snapshot(s) for user {user_id}");
        }
        Ok(discarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{LogFilter, SessionState, WorkContext, WorkKind};
    use crate::error::Error;
    use crate::timer::TimerController;
    use chrono::Duration;
    use rusqlite::params;

    fn stage_context() -> WorkContext {
        WorkContext {
            kind: WorkKind::FulfillmentStage,
            context_id: "stage-shipping".into(),
            order_id: Some("order-7".into()),
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        db: Database,
        timer: TimerController,
        recovery: RecoveryManager,
    }

    async fn setup() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("test.sqlite3")).unwrap();
        Harness {
            _dir: dir,
            timer: TimerController::new(db.clone()),
            recovery: RecoveryManager::new(db.clone()),
            db,
        }
    }

    async fn backdate_started(db: &Database, session_id: &str, minutes: i64) {
        let session_id = session_id.to_string();
        db.execute(move |conn| {
            let target = Utc::now() - Duration::minutes(minutes);
            conn.execute(
                "UPDATE sessions SET started_at = ?1 WHERE id = ?2",
                params![target.to_rfc3339(), session_id],
            )?;
            Ok(())
        })
        .await
        .unwrap();
    }

    async fn session_state(db: &Database, session_id: &str) -> SessionState {
        let session = db.get_session(session_id).await.unwrap();
        session.state
    }

    #[tokio::test]
    async fn save_all_with_nothing_open_saves_nothing() {
        let h = setup().await;
        assert_eq!(h.recovery.save_all("worker-1").await.unwrap(), 0);
        assert!(h.recovery.check("worker-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_then_restore_round_trips_the_elapsed_time() {
        let h = setup().await;

        let original = h.timer.start("worker-1", stage_context()).await.unwrap();
        h.timer.update_counters(&original.id, 8, 1).await.unwrap();
        backdate_started(&h.db, &original.id, 30).await;

        assert_eq!(h.recovery.save_all("worker-1").await.unwrap(), 1);
        let snapshots = h.recovery.check("worker-1").await.unwrap();
        assert_eq!(snapshots.len(), 1);
        let snapshot = &snapshots[0];
        assert_eq!(snapshot.session_id, original.id);
        assert!((snapshot.elapsed_minutes - 30.0).abs() < 0.1);
        assert_eq!(snapshot.items_processed, 8);

        // Restore supersedes the crash-leftover source session and seeds a
        // fresh Running one with the saved elapsed time.
        let restored = h.recovery.restore(&snapshot.save_id).await.unwrap();
        assert_ne!(restored.id, original.id);
        assert_eq!(restored.state, SessionState::Running);
        assert!((restored.elapsed_minutes - 30.0).abs() < 0.1);
        assert_eq!(restored.items_processed, 8);

        // One-shot: the snapshot is consumed.
        assert!(h.recovery.check("worker-1").await.unwrap().is_empty());

        // The superseded source is closed without a completion record.
        assert_eq!(
            session_state(&h.db, &original.id).await,
            SessionState::Stopped
        );
        let logs = h
            .db
            .list_logs(LogFilter {
                user_id: Some("worker-1".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(logs.iter().all(|log| log.session_id != original.id));

        // Working on as if never interrupted: 30 more minutes, then stop.
        backdate_started(&h.db, &restored.id, 30).await;
        let log = h.timer.stop(&restored.id, 20, 2).await.unwrap();
        assert!((log.duration_minutes - 60.0).abs() < 0.1);
    }

    #[tokio::test]
    async fn restore_conflicts_with_a_different_active_session() {
        let h = setup().await;

        let first = h.timer.start("worker-1", stage_context()).await.unwrap();
        h.recovery.save_all("worker-1").await.unwrap();
        let snapshots = h.recovery.check("worker-1").await.unwrap();

        // Detach the snapshot from its source so it survives the stop
        // below, as a snapshot from an older login would.
        let save_id = snapshots[0].save_id.clone();
        h.db.execute({
            let save_id = save_id.clone();
            move |conn| {
                conn.execute(
                    "UPDATE recovery_snapshots SET session_id = 'gone' WHERE save_id = ?1",
                    params![save_id],
                )?;
                Ok(())
            }
        })
        .await
        .unwrap();
        h.timer.stop(&first.id, 0, 0).await.unwrap();
        h.timer
            .start(
                "worker-1",
                WorkContext {
                    kind: WorkKind::Batch,
                    context_id: "batch-3".into(),
                    order_id: None,
                },
            )
            .await
            .unwrap();

        let err = h.recovery.restore(&save_id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn discard_drops_the_time_without_a_record() {
        let h = setup().await;

        let session = h.timer.start("worker-1", stage_context()).await.unwrap();
        backdate_started(&h.db, &session.id, 45).await;
        h.recovery.save_all("worker-1").await.unwrap();
        let snapshots = h.recovery.check("worker-1").await.unwrap();

        h.recovery.discard(&snapshots[0].save_id).await.unwrap();

        assert!(h.recovery.check("worker-1").await.unwrap().is_empty());
        assert!(h.timer.active_session("worker-1").await.unwrap().is_none());
        let logs = h
            .db
            .list_logs(LogFilter {
                user_id: Some("worker-1".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn stopping_a_session_invalidates_its_snapshot() {
        let h = setup().await;

        let session = h.timer.start("worker-1", stage_context()).await.unwrap();
        h.recovery.save_all("worker-1").await.unwrap();
        h.timer.stop(&session.id, 3, 1).await.unwrap();

        // The finished work lives in the log; nothing is left to restore.
        assert!(h.recovery.check("worker-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_snapshot_ids_are_not_found() {
        let h = setup().await;

        assert!(matches!(
            h.recovery.restore("missing").await.unwrap_err(),
            Error::NotFound(_)
        ));
        assert!(matches!(
            h.recovery.discard("missing").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }
}
