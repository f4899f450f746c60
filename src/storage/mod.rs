//! SQLite storage layer: the local system of record the CLI host ingests
//! into and reads history back from.

pub mod quarantine;
pub mod schema;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Row};
use tracing::{debug, info};

use crate::analysis::report::TestHistory;
use crate::analysis::{ExecutionRecord, Outcome};
use crate::ingest::group_by_test;

pub use self::quarantine::SqliteQuarantineStore;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create database directory {}", parent.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager).with_context(|| format!("failed to open database {path}"))?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// In-memory database with a single shared connection, for tests and dry runs.
pub fn open_memory_pool() -> Result<Pool> {
    let manager = SqliteConnectionManager::memory()
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = R2D2Pool::builder().max_size(1).build(manager)?;
    let conn = pool.get()?;
    schema::migrate(&conn)?;
    Ok(pool)
}

pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    // Fixed-width so lexical order in SQL matches chronological order.
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_outcome(idx: usize, raw: &str) -> rusqlite::Result<Outcome> {
    match raw {
        "pass" => Ok(Outcome::Pass),
        "fail" => Ok(Outcome::Fail),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown outcome '{other}'").into(),
        )),
    }
}

/// Register test ids so quarantine transitions accept them.
pub fn register_tests<'a>(pool: &Pool, test_ids: impl IntoIterator<Item = &'a str>) -> Result<usize> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    let mut added = 0;
    {
        let mut stmt = tx.prepare("INSERT OR IGNORE INTO tests (test_id) VALUES (?1)")?;
        for id in test_ids {
            added += stmt.execute(params![id])?;
        }
    }
    tx.commit()?;
    Ok(added)
}

/// Whether `test_id` has been registered by an ingest.
pub fn test_exists(pool: &Pool, test_id: &str) -> Result<bool> {
    let conn = pool.get()?;
    let known: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM tests WHERE test_id = ?1)",
        params![test_id],
        |row| row.get(0),
    )?;
    Ok(known)
}

/// Save normalized executions. Re-ingesting the same `(run_id, test_id)` is a
/// no-op. Returns the number of new rows.
pub fn save_executions(pool: &Pool, records: &[ExecutionRecord]) -> Result<usize> {
    register_tests(pool, records.iter().map(|r| r.test_id.as_str()))?;

    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO executions (
                run_id, test_id, started_at, outcome, duration_ms,
                error_message, commit_sha, commit_message, commit_author
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for r in records {
            inserted += stmt
                .execute(params![
                    r.run_id,
                    r.test_id,
                    format_ts(&r.started_at),
                    r.outcome.to_string(),
                    r.duration_ms.map(|d| d as i64),
                    r.error_message,
                    r.commit_sha,
                    r.commit_message,
                    r.commit_author,
                ])
                .with_context(|| format!("failed to save run {}", r.run_id))?;
        }
    }
    tx.commit()?;

    info!(inserted, skipped = records.len() - inserted, "saved executions");
    Ok(inserted)
}

const SELECT_EXECUTIONS: &str = "SELECT run_id, test_id, started_at, outcome, duration_ms,
        error_message, commit_sha, commit_message, commit_author
     FROM executions";

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let started_at: String = row.get(2)?;
    let outcome: String = row.get(3)?;
    let duration_ms: Option<i64> = row.get(4)?;
    Ok(ExecutionRecord {
        run_id: row.get(0)?,
        test_id: row.get(1)?,
        started_at: parse_ts(2, &started_at)?,
        outcome: parse_outcome(3, &outcome)?,
        duration_ms: duration_ms.and_then(|d| u64::try_from(d).ok()),
        error_message: row.get(5)?,
        commit_sha: row.get(6)?,
        commit_message: row.get(7)?,
        commit_author: row.get(8)?,
    })
}

/// Every stored execution in chronological order (ties in ingest order).
pub fn load_executions(pool: &Pool) -> Result<Vec<ExecutionRecord>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!("{SELECT_EXECUTIONS} ORDER BY started_at, id"))?;
    let rows = stmt.query_map([], execution_from_row)?;

    let mut records = Vec::new();
    for r in rows {
        records.push(r.context("failed to read execution row")?);
    }
    debug!(count = records.len(), "loaded executions");
    Ok(records)
}

/// Ordered history of one test. Empty if the test has no executions.
pub fn load_test_history(pool: &Pool, test_id: &str) -> Result<Vec<ExecutionRecord>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "{SELECT_EXECUTIONS} WHERE test_id = ?1 ORDER BY started_at, id"
    ))?;
    let rows = stmt.query_map(params![test_id], execution_from_row)?;

    let mut records = Vec::new();
    for r in rows {
        records.push(r.context("failed to read execution row")?);
    }
    Ok(records)
}

/// All executions grouped per test.
pub fn load_history(pool: &Pool) -> Result<TestHistory> {
    Ok(group_by_test(load_executions(pool)?))
}
