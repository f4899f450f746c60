//! Failure pattern extraction: error-message clusters and failure hours.

use std::collections::HashMap;

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use super::ExecutionRecord;

/// Prefix length and cluster cap for a single test's report.
pub const TEST_PREFIX_LEN: usize = 100;
pub const TEST_TOP_N: usize = 3;
/// Project-wide clustering is coarser and keeps more clusters.
pub const PROJECT_PREFIX_LEN: usize = 50;
pub const PROJECT_TOP_N: usize = 10;
/// The histogram lists at most this many distinct hours.
pub const MAX_FAILURE_HOURS: usize = 5;

const UNKNOWN_ERROR: &str = "Unknown error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternOptions {
    pub prefix_len: usize,
    pub top_n: usize,
}

impl PatternOptions {
    pub fn per_test() -> Self {
        Self {
            prefix_len: TEST_PREFIX_LEN,
            top_n: TEST_TOP_N,
        }
    }

    pub fn project_wide() -> Self {
        Self {
            prefix_len: PROJECT_PREFIX_LEN,
            top_n: PROJECT_TOP_N,
        }
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCluster {
    pub pattern: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    pub total_failures: usize,
    pub clusters: Vec<ErrorCluster>,
    /// Distinct `"HH:00"` hours in the order they first failed.
    pub failure_hours: Vec<String>,
}

/// Cluster the failing records in `records` (chronological). Passing records
/// are ignored, so the full history can be passed in.
pub fn extract_patterns(records: &[ExecutionRecord], opts: PatternOptions) -> PatternReport {
    let failures: Vec<&ExecutionRecord> = records.iter().filter(|r| r.outcome.is_fail()).collect();

    PatternReport {
        test_id: None,
        total_failures: failures.len(),
        clusters: cluster_errors(&failures, opts),
        failure_hours: failure_hours(&failures),
    }
}

fn cluster_errors(failures: &[&ExecutionRecord], opts: PatternOptions) -> Vec<ErrorCluster> {
    let mut clusters: Vec<ErrorCluster> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for r in failures {
        let message = r
            .error_message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(UNKNOWN_ERROR);
        let prefix = truncate_chars(message, opts.prefix_len);
        match index.get(prefix) {
            Some(&i) => clusters[i].count += 1,
            None => {
                index.insert(prefix.to_string(), clusters.len());
                clusters.push(ErrorCluster {
                    pattern: prefix.to_string(),
                    count: 1,
                });
            }
        }
    }

    // Stable sort keeps first-seen order among equal counts.
    clusters.sort_by(|a, b| b.count.cmp(&a.count));
    clusters.truncate(opts.top_n);
    clusters
}

fn failure_hours(failures: &[&ExecutionRecord]) -> Vec<String> {
    let mut hours: Vec<String> = Vec::new();
    for r in failures {
        let label = format!("{:02}:00", r.started_at.hour());
        if !hours.contains(&label) {
            hours.push(label);
            if hours.len() == MAX_FAILURE_HOURS {
                break;
            }
        }
    }
    hours
}

/// First `max_chars` characters of `s`, never splitting a character.
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::fixtures::{at, hourly, record};
    use crate::analysis::Outcome::{Fail, Pass};

    fn failing(hour: u32, minute: u32, message: Option<&str>) -> ExecutionRecord {
        let mut r = record("T1", at(1, hour, minute), Fail);
        r.error_message = message.map(str::to_string);
        r
    }

    #[test]
    fn test_no_failures_yields_empty_report() {
        let report = extract_patterns(&hourly("T1", "pppp"), PatternOptions::per_test());
        assert_eq!(report.total_failures, 0);
        assert!(report.clusters.is_empty());
        assert!(report.failure_hours.is_empty());

        let empty = extract_patterns(&[], PatternOptions::project_wide());
        assert!(empty.clusters.is_empty());
    }

    #[test]
    fn test_clusters_share_a_prefix() {
        let long_a = format!("{}{}", "x".repeat(100), " at line 10");
        let long_b = format!("{}{}", "x".repeat(100), " at line 99");
        let records = vec![
            failing(1, 0, Some(&long_a)),
            failing(2, 0, Some("Timeout waiting for selector")),
            failing(3, 0, Some(&long_b)),
            record("T1", at(4, 0, 0), Pass),
        ];
        let report = extract_patterns(&records, PatternOptions::per_test());
        assert_eq!(report.total_failures, 3);
        assert_eq!(report.clusters.len(), 2);
        assert_eq!(report.clusters[0].pattern, "x".repeat(100));
        assert_eq!(report.clusters[0].count, 2);
        assert_eq!(report.clusters[1].count, 1);
    }

    #[test]
    fn test_project_prefix_is_coarser() {
        let a = format!("{}{}", "E".repeat(60), "A");
        let b = format!("{}{}", "E".repeat(60), "B");
        let records = vec![failing(1, 0, Some(&a)), failing(2, 0, Some(&b))];

        let per_test = extract_patterns(&records, PatternOptions::per_test());
        assert_eq!(per_test.clusters.len(), 2);

        let project = extract_patterns(&records, PatternOptions::project_wide());
        assert_eq!(project.clusters.len(), 1);
        assert_eq!(project.clusters[0].pattern.chars().count(), 50);
    }

    #[test]
    fn test_top_n_and_tie_order() {
        let mut records = Vec::new();
        for (i, msg) in ["alpha", "beta", "gamma", "delta", "beta", "delta"].iter().enumerate() {
            records.push(failing(i as u32, 0, Some(msg)));
        }
        let report = extract_patterns(&records, PatternOptions::per_test());
        let patterns: Vec<_> = report.clusters.iter().map(|c| c.pattern.as_str()).collect();
        assert_eq!(patterns, ["beta", "delta", "alpha"]);

        let wider = extract_patterns(&records, PatternOptions::per_test().with_top_n(10));
        assert_eq!(wider.clusters.len(), 4);
    }

    #[test]
    fn test_missing_messages_cluster_as_unknown() {
        let records = vec![failing(1, 0, None), failing(2, 0, Some("   "))];
        let report = extract_patterns(&records, PatternOptions::per_test());
        assert_eq!(
            report.clusters,
            vec![ErrorCluster { pattern: "Unknown error".to_string(), count: 2 }]
        );
    }

    #[test]
    fn test_failure_hours_are_deduplicated_and_capped() {
        let records: Vec<_> = [9, 9, 3, 14, 3, 22, 5, 7, 8]
            .iter()
            .enumerate()
            .map(|(i, &h)| {
                let mut r = record("T1", at(1 + i as u32, h, 15), Fail);
                r.error_message = Some("boom".to_string());
                r
            })
            .collect();
        let report = extract_patterns(&records, PatternOptions::per_test());
        assert_eq!(report.failure_hours, ["09:00", "03:00", "14:00", "22:00", "05:00"]);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let msg = "é".repeat(120);
        assert_eq!(truncate_chars(&msg, 100).chars().count(), 100);
        assert_eq!(truncate_chars("short", 100), "short");
    }
}
