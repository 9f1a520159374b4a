/// DDL to create the schema_version tracking table.
///
/// Applied unconditionally on every open (before checking the version),
/// using `IF NOT EXISTS` so it is safe to run multiple times.
pub const SCHEMA_VERSION_DDL: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL
    ) STRICT;
";

/// DDL for the v1 outbox schema.
///
/// - `cycles`: one row per agent cycle, keyed by UUID v4 text. Snapshot ids are
///   40-char hex; a failed path leaves its id NULL and its error text set.
/// - `reports`: one row per report produced by a cycle, pending until
///   `delivered_at` is set by the delivery collaborator.
pub const SCHEMA_V1_SQL: &str = "
    CREATE TABLE IF NOT EXISTS cycles (
        id            TEXT    PRIMARY KEY,
        started_at    INTEGER NOT NULL,
        finished_at   INTEGER NOT NULL,
        old_snapshot  TEXT,
        new_snapshot  TEXT,
        tree_error    TEXT,
        history_error TEXT
    ) STRICT;

    CREATE TABLE IF NOT EXISTS reports (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        cycle_id     TEXT    NOT NULL REFERENCES cycles(id) ON DELETE CASCADE,
        kind         TEXT    NOT NULL CHECK(kind IN ('changes', 'commands')),
        payload      TEXT    NOT NULL,
        created_at   INTEGER NOT NULL,
        delivered_at INTEGER
    ) STRICT;

    CREATE INDEX IF NOT EXISTS reports_pending
        ON reports(delivered_at, id);
";

/// Forward-only, idempotent migration to the latest schema version.
///
/// # Errors
///
/// Returns `rusqlite::Error` if the DDL fails or the version row cannot be read.
pub fn migrate(db: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    db.execute_batch(SCHEMA_VERSION_DDL)?;

    let version: i64 = db
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |r| r.get(0),
        )
        .unwrap_or(0);

    if version < 1 {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute_batch(SCHEMA_V1_SQL)?;
        tx.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
        tx.commit()?;
    }

    Ok(())
}
