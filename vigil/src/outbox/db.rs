use std::path::Path;
use std::time::Duration;

use time::OffsetDateTime;
use tokio_rusqlite::Connection;

use super::types::{CycleRecord, PendingReport, ReportKind};
use super::OutboxError;

/// Opens (or creates) the outbox database at `path`, configures WAL mode,
/// and applies schema migrations via the `schema_version` table.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the file cannot be opened, WAL configuration
/// fails, or schema DDL fails.
pub async fn open_outbox(path: &Path) -> Result<Connection, tokio_rusqlite::Error> {
    let conn = Connection::open(path.to_path_buf()).await?;

    // WAL pragmas are connection-level and re-applied on every open.
    conn.call(|db| {
        db.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;
        db.busy_timeout(Duration::from_secs(5))?;
        Ok::<_, rusqlite::Error>(())
    })
    .await?;

    conn.call(|db| {
        crate::outbox::schema::migrate(db)?;
        Ok::<_, rusqlite::Error>(())
    })
    .await?;

    Ok(conn)
}

/// Writes a cycle row plus one report row per successful path, in one
/// `BEGIN IMMEDIATE` transaction. Empty reports are recorded too.
///
/// # Errors
///
/// Returns `OutboxError` if a payload cannot be serialised or the transaction fails.
pub async fn record_cycle(conn: &Connection, record: &CycleRecord) -> Result<(), OutboxError> {
    let mut reports = Vec::new();
    if let Some(changes) = &record.changes {
        reports.push((ReportKind::Changes, serde_json::to_string(changes)?));
    }
    if let Some(commands) = &record.commands {
        reports.push((ReportKind::Commands, serde_json::to_string(commands)?));
    }

    let id = record.id.clone();
    let started_at = record.started_at.unix_timestamp();
    let finished_at = record.finished_at.unix_timestamp();
    let old_snapshot = record.old_snapshot.map(|s| s.to_hex());
    let new_snapshot = record.new_snapshot.map(|s| s.to_hex());
    let tree_error = record.tree_error.clone();
    let history_error = record.history_error.clone();

    conn.call(move |db| {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO cycles
                 (id, started_at, finished_at, old_snapshot, new_snapshot, tree_error, history_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                &id,
                started_at,
                finished_at,
                &old_snapshot,
                &new_snapshot,
                &tree_error,
                &history_error
            ],
        )?;
        for (kind, payload) in &reports {
            tx.execute(
                "INSERT INTO reports (cycle_id, kind, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![&id, kind.as_str(), payload, finished_at],
            )?;
        }
        tx.commit()?;
        Ok::<_, rusqlite::Error>(())
    })
    .await?;
    Ok(())
}

/// Returns up to `limit` undelivered reports, oldest first.
///
/// # Errors
///
/// Returns `OutboxError` if the query fails or a stored row is malformed.
pub async fn pending_reports(conn: &Connection, limit: usize) -> Result<Vec<PendingReport>, OutboxError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = conn
        .call(move |db| {
            let mut stmt = db.prepare(
                "SELECT id, cycle_id, kind, payload, created_at
                 FROM reports
                 WHERE delivered_at IS NULL
                 ORDER BY id
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![limit], |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, i64>(4)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok::<_, rusqlite::Error>(rows)
        })
        .await?;

    rows.into_iter()
        .map(|(id, cycle_id, kind, payload, created_at)| {
            Ok::<_, OutboxError>(PendingReport {
                id,
                cycle_id,
                kind: kind.parse().map_err(OutboxError::Corrupt)?,
                payload: serde_json::from_str(&payload)?,
                created_at,
            })
        })
        .collect()
}

/// Marks the given reports delivered and returns how many were still pending.
///
/// Unknown or already-delivered ids are ignored.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the `BEGIN IMMEDIATE` transaction fails.
pub async fn mark_delivered(conn: &Connection, ids: &[i64]) -> Result<usize, tokio_rusqlite::Error> {
    let ids = ids.to_vec();
    let now = OffsetDateTime::now_utc().unix_timestamp();

    conn.call(move |db| {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE reports SET delivered_at = ?1 WHERE id = ?2 AND delivered_at IS NULL",
            )?;
            for id in &ids {
                updated += stmt.execute(rusqlite::params![now, id])?;
            }
        }
        tx.commit()?;
        Ok::<_, rusqlite::Error>(updated)
    })
    .await
}
