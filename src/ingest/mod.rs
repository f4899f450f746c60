//! Outcome ingestion.
//!
//! Raw run records arrive with loose status vocabularies (`completed`,
//! `passed`, `failed`) and optional per-step results. They are normalized
//! once, here, into [`ExecutionRecord`]s with a binary outcome, and sorted
//! by start time. Nothing downstream looks at a raw status string again.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::analysis::report::TestHistory;
use crate::analysis::{ExecutionRecord, Outcome};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("run {run_id} has no test id")]
    MissingTestId { run_id: String },

    #[error("run {run_id} has no start timestamp")]
    MissingTimestamp { run_id: String },

    #[error("invalid run records document: {0}")]
    Parse(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Raw input
// ---------------------------------------------------------------------------

/// One step of a run, as reported by the runner.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepResult {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "error_message")]
    pub error: Option<String>,
}

/// A run record as the system of record hands it over.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRunRecord {
    #[serde(default, alias = "id")]
    pub run_id: Option<String>,
    #[serde(default, alias = "testId")]
    pub test_id: Option<String>,
    #[serde(default, alias = "created_at", alias = "startedAt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub results: Vec<StepResult>,
    #[serde(default, alias = "duration")]
    pub duration_ms: Option<f64>,
    #[serde(default, alias = "error")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default)]
    pub commit_author: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RunsDocument {
    List(Vec<RawRunRecord>),
    Wrapped { runs: Vec<RawRunRecord> },
}

/// Parse either a bare JSON array of runs or an object with a `runs` array.
pub fn parse_runs_json(input: &str) -> Result<Vec<RawRunRecord>, IngestError> {
    let doc: RunsDocument = serde_json::from_str(input)?;
    Ok(match doc {
        RunsDocument::List(runs) | RunsDocument::Wrapped { runs } => runs,
    })
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Any failed step, or a raw status of `failed`, is a failure. Everything
/// else (`completed`, `passed`, unknown or missing) is a pass.
pub fn normalize_outcome(status: Option<&str>, steps: &[StepResult]) -> Outcome {
    let failed = |s: Option<&str>| s.is_some_and(|s| s.trim().eq_ignore_ascii_case("failed"));
    if failed(status) || steps.iter().any(|step| failed(step.status.as_deref())) {
        Outcome::Fail
    } else {
        Outcome::Pass
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Stable id for a record that arrived without one, so the same document
/// ingested twice maps onto the same rows.
pub fn derived_run_id(test_id: &str, started_at: &DateTime<Utc>, status: Option<&str>) -> String {
    let name = format!(
        "{}|{}|{}",
        test_id,
        started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        status.map(str::trim).unwrap_or("")
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// Normalize one raw record.
pub fn normalize(raw: RawRunRecord) -> Result<ExecutionRecord, IngestError> {
    let given_id = non_empty(raw.run_id);
    let label = || given_id.clone().unwrap_or_else(|| "<no id>".to_string());
    let test_id = non_empty(raw.test_id).ok_or_else(|| IngestError::MissingTestId { run_id: label() })?;
    let started_at = raw
        .started_at
        .ok_or_else(|| IngestError::MissingTimestamp { run_id: label() })?;
    let run_id = match given_id {
        Some(id) => id,
        None => derived_run_id(&test_id, &started_at, raw.status.as_deref()),
    };

    let outcome = normalize_outcome(raw.status.as_deref(), &raw.results);

    let error_message = match outcome {
        Outcome::Pass => None,
        Outcome::Fail => non_empty(raw.error_message).or_else(|| {
            raw.results
                .iter()
                .filter(|s| normalize_outcome(s.status.as_deref(), &[]).is_fail())
                .find_map(|s| non_empty(s.error.clone()))
        }),
    };

    let duration_ms = match raw.duration_ms {
        Some(d) if d.is_finite() && d >= 0.0 => Some(d.round() as u64),
        Some(d) => {
            debug!(run_id = %run_id, duration = d, "dropping invalid duration");
            None
        }
        None => None,
    };

    Ok(ExecutionRecord {
        run_id,
        test_id,
        started_at,
        outcome,
        duration_ms,
        error_message,
        commit_sha: non_empty(raw.commit_sha),
        commit_message: non_empty(raw.commit_message),
        commit_author: non_empty(raw.commit_author),
    })
}

/// A record that could not be normalized.
#[derive(Debug)]
pub struct Rejected {
    pub index: usize,
    pub error: IngestError,
}

/// Normalized, chronologically ordered records plus whatever was rejected.
#[derive(Debug, Default)]
pub struct IngestBatch {
    pub records: Vec<ExecutionRecord>,
    pub rejected: Vec<Rejected>,
}

/// Normalize a batch. Bad records are set aside so the rest still ingest.
/// The sort is stable: equal timestamps keep input order.
pub fn ingest(raws: Vec<RawRunRecord>) -> IngestBatch {
    let mut batch = IngestBatch::default();
    for (index, raw) in raws.into_iter().enumerate() {
        match normalize(raw) {
            Ok(record) => batch.records.push(record),
            Err(error) => {
                warn!(index, %error, "rejected run record");
                batch.rejected.push(Rejected { index, error });
            }
        }
    }
    batch.records.sort_by_key(|r| r.started_at);
    batch
}

/// Split chronologically ordered records into per-test histories.
pub fn group_by_test(records: impl IntoIterator<Item = ExecutionRecord>) -> TestHistory {
    let mut history = TestHistory::new();
    for r in records {
        history.entry(r.test_id.clone()).or_default().push(r);
    }
    history
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(status: &str) -> StepResult {
        StepResult {
            status: Some(status.to_string()),
            error: None,
        }
    }

    #[test]
    fn test_status_vocabulary() {
        assert_eq!(normalize_outcome(Some("completed"), &[]), Outcome::Pass);
        assert_eq!(normalize_outcome(Some("passed"), &[]), Outcome::Pass);
        assert_eq!(normalize_outcome(Some("failed"), &[]), Outcome::Fail);
        assert_eq!(normalize_outcome(Some(" FAILED "), &[]), Outcome::Fail);
        assert_eq!(normalize_outcome(None, &[]), Outcome::Pass);
    }

    #[test]
    fn test_any_failed_step_fails_the_run() {
        let steps = vec![step("passed"), step("failed"), step("passed")];
        assert_eq!(normalize_outcome(Some("completed"), &steps), Outcome::Fail);
        assert_eq!(
            normalize_outcome(Some("completed"), &[step("passed"), step("skipped")]),
            Outcome::Pass
        );
    }

    #[test]
    fn test_parse_and_normalize_document() {
        let json = r#"{
            "runs": [
                {"id": "r2", "test_id": "login", "created_at": "2024-03-01T10:05:00Z",
                 "status": "completed",
                 "results": [{"status": "passed"}, {"status": "failed", "error": "Timeout 30000ms exceeded"}],
                 "duration_ms": 1520.4, "commit_sha": "abc123", "commit_author": "dev"},
                {"run_id": "r1", "testId": "login", "started_at": "2024-03-01T09:00:00Z",
                 "status": "passed", "error": "stale message", "duration_ms": -5}
            ]
        }"#;
        let batch = ingest(parse_runs_json(json).unwrap());
        assert!(batch.rejected.is_empty());
        assert_eq!(batch.records.len(), 2);

        let first = &batch.records[0];
        assert_eq!(first.run_id, "r1");
        assert_eq!(first.outcome, Outcome::Pass);
        assert_eq!(first.error_message, None);
        assert_eq!(first.duration_ms, None);

        let second = &batch.records[1];
        assert_eq!(second.outcome, Outcome::Fail);
        assert_eq!(second.error_message.as_deref(), Some("Timeout 30000ms exceeded"));
        assert_eq!(second.duration_ms, Some(1520));
        assert_eq!(second.commit_sha.as_deref(), Some("abc123"));
        assert_eq!(second.commit_message, None);
    }

    #[test]
    fn test_bare_array_and_rejections() {
        let json = r#"[
            {"test_id": "a", "started_at": "2024-03-01T09:00:00Z", "status": "failed"},
            {"test_id": "", "started_at": "2024-03-01T09:00:00Z"},
            {"id": "no-time", "test_id": "b"}
        ]"#;
        let batch = ingest(parse_runs_json(json).unwrap());
        assert_eq!(batch.records.len(), 1);
        assert!(!batch.records[0].run_id.is_empty(), "run id is derived");
        assert_eq!(batch.records[0].error_message, None);

        assert_eq!(batch.rejected.len(), 2);
        assert_eq!(batch.rejected[0].index, 1);
        assert!(matches!(batch.rejected[0].error, IngestError::MissingTestId { .. }));
        assert!(matches!(
            &batch.rejected[1].error,
            IngestError::MissingTimestamp { run_id } if run_id == "no-time"
        ));
    }

    #[test]
    fn test_missing_run_id_is_stable_across_ingests() {
        let json = r#"[
            {"test_id": "a", "started_at": "2024-03-01T09:00:00Z", "status": "failed"},
            {"test_id": "a", "started_at": "2024-03-01T10:00:00Z", "status": "passed"}
        ]"#;
        let first = ingest(parse_runs_json(json).unwrap());
        let second = ingest(parse_runs_json(json).unwrap());
        let ids = |b: &IngestBatch| b.records.iter().map(|r| r.run_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        assert_ne!(first.records[0].run_id, first.records[1].run_id);
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(parse_runs_json("{\"nope\": 1}"), Err(IngestError::Parse(_))));
        assert!(parse_runs_json("not json").is_err());
    }

    #[test]
    fn test_group_by_test_preserves_order() {
        let json = r#"[
            {"id": "3", "test_id": "a", "started_at": "2024-03-01T12:00:00Z"},
            {"id": "1", "test_id": "b", "started_at": "2024-03-01T09:00:00Z"},
            {"id": "2", "test_id": "a", "started_at": "2024-03-01T10:00:00Z"},
            {"id": "2b", "test_id": "a", "started_at": "2024-03-01T10:00:00Z"}
        ]"#;
        let history = group_by_test(ingest(parse_runs_json(json).unwrap()).records);
        let a: Vec<_> = history["a"].iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(a, ["2", "2b", "3"]);
        assert_eq!(history["b"].len(), 1);
    }
}
