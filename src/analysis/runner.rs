//! Parallel project analysis: one blocking task per test.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::report::{analyze_test, assemble_report, StabilityReport, TestAnalysis, TestHistory};
use super::AnalysisConfig;

/// Build the project report with one blocking task per test.
///
/// Each test is analyzed independently; results are joined back in test id
/// order so the report is identical to [`super::report::build_report`]. A
/// task that panics is logged and its test left out.
pub async fn analyze_project(
    history: TestHistory,
    quarantined: HashSet<String>,
    config: AnalysisConfig,
    now: DateTime<Utc>,
) -> StabilityReport {
    info!(tests = history.len(), "Starting stability analysis");
    let config = Arc::new(config);

    let handles: Vec<_> = history
        .into_iter()
        .map(|(test_id, records)| {
            let config = Arc::clone(&config);
            let id = test_id.clone();
            let handle = tokio::task::spawn_blocking(move || {
                analyze_test(&test_id, &records, &config, now)
            });
            (id, handle)
        })
        .collect();

    let mut analyses: Vec<TestAnalysis> = Vec::with_capacity(handles.len());
    for (test_id, handle) in handles {
        match handle.await {
            Ok(analysis) => analyses.push(analysis),
            Err(e) => warn!(test_id = %test_id, error = %e, "analysis task failed; skipping test"),
        }
    }

    let report = assemble_report(analyses, &quarantined, &config, now);
    info!(
        analyzed = report.analyzed_tests,
        flaky = report.flaky_count,
        insufficient = report.insufficient_data.len(),
        "Stability analysis complete"
    );
    report
}
