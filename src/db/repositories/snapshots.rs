use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::db::{
    helpers::{parse_datetime, parse_kind, to_i64, to_u64},
    models::{RecoverySnapshot, SessionState, TimerSession, WorkContext},
    Database,
};
use crate::error::{Error, Result};
use crate::timer::elapsed;

use super::sessions::{close_session_row, insert_session_row, load_active_for_user};

const SNAPSHOT_COLUMNS: &str = "save_id, user_id, session_id, context_kind, context_id, \
     order_id, elapsed_minutes, items_processed, orders_processed, saved_at";

fn row_to_snapshot(row: &Row) -> Result<RecoverySnapshot> {
    let kind: String = row.get("context_kind")?;
    let saved_at: String = row.get("saved_at")?;
    let items: i64 = row.get("items_processed")?;
    let orders: i64 = row.get("orders_processed")?;

    Ok(RecoverySnapshot {
        save_id: row.get("save_id")?,
        user_id: row.get("user_id")?,
        session_id: row.get("session_id")?,
        context: WorkContext {
            kind: parse_kind(&kind)?,
            context_id: row.get("context_id")?,
            order_id: row.get("order_id")?,
        },
        elapsed_minutes: row.get("elapsed_minutes")?,
        items_processed: to_u64(items, "items_processed")?,
        orders_processed: to_u64(orders, "orders_processed")?,
        saved_at: parse_datetime(&saved_at, "saved_at")?,
    })
}

fn load_snapshot(conn: &Connection, save_id: &str) -> Result<Option<RecoverySnapshot>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM recovery_snapshots WHERE save_id = ?1"
    ))?;

    let mut rows = stmt.query(params![save_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_snapshot(row)?)),
        None => Ok(None),
    }
}

/// Close a snapshot's source session if it is still open. Restore and
/// discard both supersede the source row rather than letting it linger as
/// the user's "active" timer forever.
fn supersede_source_session(
    conn: &Connection,
    snapshot: &RecoverySnapshot,
    now: DateTime<Utc>,
) -> Result<()> {
    if let Some(active) = load_active_for_user(conn, &snapshot.user_id)? {
        if active.id == snapshot.session_id {
            close_session_row(conn, &active.id, now)?;
        }
    }
    Ok(())
}

impl Database {
    /// Write or replace the user's snapshot slot for this workflow type.
    pub async fn upsert_snapshot(&self, snapshot: RecoverySnapshot) -> Result<RecoverySnapshot> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO recovery_snapshots (save_id, user_id, session_id, context_kind,
                                                 context_id, order_id, elapsed_minutes,
                                                 items_processed, orders_processed, saved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(user_id, context_kind) DO UPDATE SET
                     save_id = excluded.save_id,
                     session_id = excluded.session_id,
                     context_id = excluded.context_id,
                     order_id = excluded.order_id,
                     elapsed_minutes = excluded.elapsed_minutes,
                     items_processed = excluded.items_processed,
                     orders_processed = excluded.orders_processed,
                     saved_at = excluded.saved_at",
                params![
                    snapshot.save_id,
                    snapshot.user_id,
                    snapshot.session_id,
                    snapshot.context.kind.as_str(),
                    snapshot.context.context_id,
                    snapshot.context.order_id,
                    snapshot.elapsed_minutes,
                    to_i64(snapshot.items_processed)?,
                    to_i64(snapshot.orders_processed)?,
                    snapshot.saved_at.to_rfc3339(),
                ],
            )?;
            Ok(snapshot)
        })
        .await
    }

    pub async fn list_snapshots_for_user(&self, user_id: &str) -> Result<Vec<RecoverySnapshot>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM recovery_snapshots
                 WHERE user_id = ?1
                 ORDER BY saved_at DESC"
            ))?;

            let mut rows = stmt.query(params![user_id])?;
            let mut snapshots = Vec::new();
            while let Some(row) = rows.next()? {
                snapshots.push(row_to_snapshot(row)?);
            }
            Ok(snapshots)
        })
        .await
    }

    /// Consume a snapshot into a fresh Running session seeded with the saved
    /// elapsed time. One transaction: the conflict check, the supersede of a
    /// crash-leftover source session, the insert and the snapshot delete all
    /// commit together or not at all.
    pub async fn restore_snapshot(
        &self,
        save_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TimerSession> {
        let save_id = save_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let snapshot = load_snapshot(&tx, &save_id)?
                .ok_or_else(|| Error::NotFound(format!("unknown recovery snapshot {save_id}")))?;

            if let Some(active) = load_active_for_user(&tx, &snapshot.user_id)? {
                if active.id != snapshot.session_id {
                    return Err(Error::Conflict(format!(
                        "user {} already has an active timer (session {})",
                        snapshot.user_id, active.id
                    )));
                }
                close_session_row(&tx, &active.id, now)?;
            }

            let session = TimerSession {
                id: Uuid::new_v4().to_string(),
                user_id: snapshot.user_id.clone(),
                context: snapshot.context.clone(),
                state: SessionState::Running,
                started_at: Some(now),
                accumulated_minutes: elapsed::sanitize_minutes(
                    snapshot.elapsed_minutes,
                    &snapshot.save_id,
                ),
                items_processed: snapshot.items_processed,
                orders_processed: snapshot.orders_processed,
                created_at: now,
                updated_at: now,
            };
            insert_session_row(&tx, &session)?;

            tx.execute(
                "DELETE FROM recovery_snapshots WHERE save_id = ?1",
                params![snapshot.save_id],
            )?;

            tx.commit()?;
            Ok(session)
        })
        .await
    }

    /// Delete a snapshot without restoring it. The in-flight time it carried
    /// is deliberately dropped; a still-open source session is closed without
    /// a completion record.
    pub async fn discard_snapshot(&self, save_id: &str, now: DateTime<Utc>) -> Result<()> {
        let save_id = save_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let snapshot = load_snapshot(&tx, &save_id)?
                .ok_or_else(|| Error::NotFound(format!("unknown recovery snapshot {save_id}")))?;

            supersede_source_session(&tx, &snapshot, now)?;
            tx.execute(
                "DELETE FROM recovery_snapshots WHERE save_id = ?1",
                params![snapshot.save_id],
            )?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn discard_all_snapshots(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            let snapshots = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {SNAPSHOT_COLUMNS} FROM recovery_snapshots WHERE user_id = ?1"
                ))?;
                let mut rows = stmt.query(params![user_id])?;
                let mut snapshots = Vec::new();
                while let Some(row) = rows.next()? {
                    snapshots.push(row_to_snapshot(row)?);
                }
                snapshots
            };

            for snapshot in &snapshots {
                supersede_source_session(&tx, snapshot, now)?;
            }
            tx.execute(
                "DELETE FROM recovery_snapshots WHERE user_id = ?1",
                params![user_id],
            )?;

            tx.commit()?;
            Ok(snapshots.len() as u64)
        })
        .await
    }
}
