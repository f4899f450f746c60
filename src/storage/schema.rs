//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS tests (
            test_id TEXT PRIMARY KEY,
            first_seen_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS executions (
            id INTEGER PRIMARY KEY,
            run_id TEXT NOT NULL,
            test_id TEXT NOT NULL,
            started_at TEXT NOT NULL,
            outcome TEXT NOT NULL CHECK (outcome IN ('pass', 'fail')),
            duration_ms INTEGER,
            error_message TEXT,
            commit_sha TEXT,
            commit_message TEXT,
            commit_author TEXT,
            ingested_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (run_id, test_id),
            FOREIGN KEY (test_id) REFERENCES tests(test_id)
        );

        CREATE TABLE IF NOT EXISTS quarantine_records (
            test_id TEXT PRIMARY KEY,
            state TEXT NOT NULL CHECK (state IN ('active', 'quarantined')),
            reason TEXT,
            actor TEXT,
            quarantined_at TEXT,
            released_at TEXT,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (test_id) REFERENCES tests(test_id)
        );

        CREATE INDEX IF NOT EXISTS idx_executions_test_started ON executions(test_id, started_at);
        CREATE INDEX IF NOT EXISTS idx_executions_started ON executions(started_at);
        CREATE INDEX IF NOT EXISTS idx_quarantine_state ON quarantine_records(state);

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);",
    )?;

    Ok(())
}
