//! SQLite-backed [`QuarantineStore`].

use anyhow::Context;
use rusqlite::{params, OptionalExtension, Row};

use super::{format_ts, parse_ts, Pool};
use crate::quarantine::{LifecycleError, QuarantineRecord, QuarantineState, QuarantineStore};

#[derive(Clone)]
pub struct SqliteQuarantineStore {
    pool: Pool,
}

impl SqliteQuarantineStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn store_err(e: impl Into<anyhow::Error>) -> LifecycleError {
    LifecycleError::Store(e.into())
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<QuarantineRecord> {
    let state: String = row.get(1)?;
    let quarantined_at: Option<String> = row.get(4)?;
    let released_at: Option<String> = row.get(5)?;
    Ok(QuarantineRecord {
        test_id: row.get(0)?,
        state: QuarantineState::parse(&state).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                format!("unknown quarantine state '{state}'").into(),
            )
        })?,
        reason: row.get(2)?,
        actor: row.get(3)?,
        quarantined_at: quarantined_at.as_deref().map(|s| parse_ts(4, s)).transpose()?,
        released_at: released_at.as_deref().map(|s| parse_ts(5, s)).transpose()?,
    })
}

const SELECT_RECORDS: &str =
    "SELECT test_id, state, reason, actor, quarantined_at, released_at FROM quarantine_records";

impl QuarantineStore for SqliteQuarantineStore {
    fn is_known_test(&self, test_id: &str) -> Result<bool, LifecycleError> {
        super::test_exists(&self.pool, test_id).map_err(LifecycleError::Store)
    }

    fn get(&self, test_id: &str) -> Result<Option<QuarantineRecord>, LifecycleError> {
        let conn = self.pool.get().map_err(store_err)?;
        conn.query_row(
            &format!("{SELECT_RECORDS} WHERE test_id = ?1"),
            params![test_id],
            record_from_row,
        )
        .optional()
        .map_err(store_err)
    }

    fn put(&self, record: &QuarantineRecord) -> Result<(), LifecycleError> {
        let conn = self.pool.get().map_err(store_err)?;
        conn.execute(
            "INSERT INTO quarantine_records
                (test_id, state, reason, actor, quarantined_at, released_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
             ON CONFLICT(test_id) DO UPDATE SET
                state = excluded.state,
                reason = excluded.reason,
                actor = excluded.actor,
                quarantined_at = excluded.quarantined_at,
                released_at = excluded.released_at,
                updated_at = excluded.updated_at",
            params![
                record.test_id,
                record.state.as_str(),
                record.reason,
                record.actor,
                record.quarantined_at.as_ref().map(format_ts),
                record.released_at.as_ref().map(format_ts),
            ],
        )
        .with_context(|| format!("failed to save quarantine record for {}", record.test_id))
        .map_err(store_err)?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<QuarantineRecord>, LifecycleError> {
        let conn = self.pool.get().map_err(store_err)?;
        let mut stmt = conn.prepare(SELECT_RECORDS).map_err(store_err)?;
        let rows = stmt.query_map([], record_from_row).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }
}
