//! Local SQLite outbox that hands cycle reports to a delivery collaborator.
//!
//! The agent writes; a consumer polls `pending_reports` and acknowledges with
//! `mark_delivered`. Both sides may hold the database open at once (WAL mode).

pub mod db;
pub mod schema;
pub mod types;

pub use db::{mark_delivered, open_outbox, pending_reports, record_cycle};
pub use types::{CycleRecord, PendingReport, ReportKind};

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("outbox database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("outbox payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("outbox row is corrupt: {0}")]
    Corrupt(String),
}
