//! flakescope -- test stability analytics.
//!
//! This crate scores how flaky each test is from its ordered execution
//! history, tracks trends over time buckets, clusters failure messages,
//! correlates commits with outcome changes, and manages test quarantine.
//! The `flakescope` binary is a thin host over a local SQLite store.

pub mod analysis;
pub mod config;
pub mod ingest;
pub mod quarantine;
pub mod storage;

use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::analysis::report::{StabilityReport, TestHistory};
use crate::analysis::AnalysisConfig;
use crate::quarantine::QuarantineManager;
use crate::storage::{Pool, SqliteQuarantineStore};

/// Load every test's history and the quarantined set from `pool`, then build
/// the project stability report across worker threads.
pub async fn stability_report(
    pool: &Pool,
    config: &AnalysisConfig,
    now: DateTime<Utc>,
) -> Result<StabilityReport> {
    let pool = pool.clone();
    let (history, quarantined) =
        tokio::task::spawn_blocking(move || -> Result<(TestHistory, HashSet<String>)> {
            let history = storage::load_history(&pool)?;
            let quarantined = QuarantineManager::new(SqliteQuarantineStore::new(pool)).quarantined_ids()?;
            Ok((history, quarantined))
        })
        .await??;

    tracing::debug!(tests = history.len(), quarantined = quarantined.len(), "loaded project history");
    Ok(analysis::runner::analyze_project(history, quarantined, config.clone(), now).await)
}
