//! Project stability report: score every test, list the flaky ones, and
//! attach their failure patterns and recommendations.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::patterns::{extract_patterns, ErrorCluster, PatternOptions};
use super::recommend::{recommend, FlakySignal, Recommendation};
use super::score::{score_records, FlakinessScore, TestStability};
use super::{within_period, AnalysisConfig, ExecutionRecord, Period};

/// Ordered execution history keyed by test id.
pub type TestHistory = BTreeMap<String, Vec<ExecutionRecord>>;

/// Everything computed for one test, independent of every other test.
#[derive(Debug, Clone, PartialEq)]
pub struct TestAnalysis {
    pub test_id: String,
    pub stability: TestStability,
    pub error_patterns: Vec<ErrorCluster>,
    pub failure_hours: Vec<String>,
}

/// Score and pattern-mine a single test's history.
pub fn analyze_test(
    test_id: &str,
    records: &[ExecutionRecord],
    config: &AnalysisConfig,
    now: DateTime<Utc>,
) -> TestAnalysis {
    let window = within_period(records, config.period, now);
    let stability = score_records(test_id, &window);
    let patterns = extract_patterns(
        &window,
        PatternOptions::per_test().with_top_n(config.max_error_patterns),
    );

    debug!(
        test_id,
        runs = window.len(),
        score = stability.as_scored().map(|s| s.stats.score),
        "analyzed test"
    );

    TestAnalysis {
        test_id: test_id.to_string(),
        stability,
        error_patterns: patterns.clusters,
        failure_hours: patterns.failure_hours,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlakyTest {
    #[serde(flatten)]
    pub score: FlakinessScore,
    pub quarantined: bool,
    pub error_patterns: Vec<ErrorCluster>,
    pub failure_hours: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityReport {
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<Period>,
    pub min_flakiness_score: u32,
    pub total_tests: usize,
    /// Tests with enough history to be scored.
    pub analyzed_tests: usize,
    /// Tests left out for having fewer than three runs.
    pub insufficient_data: Vec<String>,
    /// Flaky tests found before `max_flaky_tests` was applied.
    pub flaky_count: usize,
    pub flaky_tests: Vec<FlakyTest>,
    pub recommendations: Vec<Recommendation>,
}

/// Combine per-test analyses into the project report. Flaky tests are sorted
/// by score descending, ties broken by test id.
pub fn assemble_report(
    analyses: Vec<TestAnalysis>,
    quarantined: &HashSet<String>,
    config: &AnalysisConfig,
    now: DateTime<Utc>,
) -> StabilityReport {
    let total_tests = analyses.len();
    let mut insufficient_data = Vec::new();
    let mut flaky_tests = Vec::new();
    let mut analyzed_tests = 0;

    for a in analyses {
        match a.stability {
            TestStability::InsufficientData { test_id, .. } => insufficient_data.push(test_id),
            TestStability::Scored(score) => {
                analyzed_tests += 1;
                if score.stats.score >= config.min_flakiness_score {
                    flaky_tests.push(FlakyTest {
                        quarantined: quarantined.contains(&score.test_id),
                        score,
                        error_patterns: a.error_patterns,
                        failure_hours: a.failure_hours,
                    });
                }
            }
        }
    }

    insufficient_data.sort();
    flaky_tests.sort_by(|a, b| {
        b.score
            .stats
            .score
            .cmp(&a.score.stats.score)
            .then_with(|| a.score.test_id.cmp(&b.score.test_id))
    });
    let flaky_count = flaky_tests.len();
    flaky_tests.truncate(config.max_flaky_tests);

    let signals: Vec<FlakySignal<'_>> = flaky_tests
        .iter()
        .map(|t| FlakySignal {
            test_id: &t.score.test_id,
            score: t.score.stats.score,
            longest_fail_streak: t.score.stats.longest_fail_streak,
            failure_hours: &t.failure_hours,
        })
        .collect();
    let recommendations = recommend(&signals);

    StabilityReport {
        generated_at: now,
        period: config.period,
        min_flakiness_score: config.min_flakiness_score,
        total_tests,
        analyzed_tests,
        insufficient_data,
        flaky_count,
        flaky_tests,
        recommendations,
    }
}

/// Build the report sequentially. Hosts with a runtime can use
/// [`super::runner::analyze_project`] to spread tests across workers.
pub fn build_report(
    history: &TestHistory,
    quarantined: &HashSet<String>,
    config: &AnalysisConfig,
    now: DateTime<Utc>,
) -> StabilityReport {
    let analyses = history
        .iter()
        .map(|(test_id, records)| analyze_test(test_id, records, config, now))
        .collect();
    assemble_report(analyses, quarantined, config, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::fixtures::{at, hourly};
    use crate::analysis::recommend::RecommendationKind;

    fn history(entries: &[(&str, &str)]) -> TestHistory {
        entries
            .iter()
            .map(|(id, pattern)| (id.to_string(), hourly(id, pattern)))
            .collect()
    }

    #[test]
    fn test_reference_scenario_end_to_end() {
        let h = history(&[("T1", "ppfpffpfpf")]);
        let report = build_report(&h, &HashSet::new(), &AnalysisConfig::default(), at(2, 0, 0));

        assert_eq!(report.total_tests, 1);
        assert_eq!(report.flaky_count, 1);
        let t1 = &report.flaky_tests[0];
        assert_eq!(t1.score.stats.score, 60);
        assert_eq!(t1.score.stats.transitions, 6);
        assert!(!t1.quarantined);
        assert_eq!(t1.error_patterns[0].count, 5);
        assert_eq!(report.recommendations.len(), 1);
        assert_eq!(report.recommendations[0].kind, RecommendationKind::HighFlakiness);
    }

    #[test]
    fn test_threshold_ordering_and_insufficient_data() {
        let h = history(&[
            ("stable", "pppppp"),
            ("alternating", "pfpfpf"),
            ("mild", "ppppfp"),
            ("new", "pf"),
        ]);
        let quarantined: HashSet<String> = ["alternating".to_string()].into();
        let report = build_report(&h, &quarantined, &AnalysisConfig::default(), at(2, 0, 0));

        assert_eq!(report.total_tests, 4);
        assert_eq!(report.analyzed_tests, 3);
        assert_eq!(report.insufficient_data, ["new"]);
        let ids: Vec<_> = report.flaky_tests.iter().map(|t| t.score.test_id.as_str()).collect();
        // mild: 2/5*60 + 1/6*40 = 30.7 -> 31; alternating: 60 + 20 = 80
        assert_eq!(ids, ["alternating", "mild"]);
        assert!(report.flaky_tests[0].quarantined);
        assert!(!report.flaky_tests[1].quarantined);
    }

    #[test]
    fn test_limit_applies_after_counting() {
        let h = history(&[("a", "pfpf"), ("b", "pfpf"), ("c", "pfpf")]);
        let config = AnalysisConfig {
            max_flaky_tests: 2,
            ..AnalysisConfig::default()
        };
        let report = build_report(&h, &HashSet::new(), &config, at(2, 0, 0));
        assert_eq!(report.flaky_count, 3);
        let ids: Vec<_> = report.flaky_tests.iter().map(|t| t.score.test_id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn test_all_stable_yields_positive_recommendation() {
        let h = history(&[("a", "pppp"), ("b", "ffff")]);
        let report = build_report(&h, &HashSet::new(), &AnalysisConfig::default(), at(2, 0, 0));
        assert_eq!(report.flaky_count, 0);
        assert_eq!(report.recommendations.len(), 1);
        assert_eq!(report.recommendations[0].kind, RecommendationKind::Stable);
    }

    #[test]
    fn test_period_narrows_history() {
        // Records run hourly 00:00..10:00; a 2h window ending at 10:00 keeps
        // 08:00, 09:00 and 10:00, which are "fpf".
        let h = history(&[("T1", "ppppppppfpf")]);
        let config = AnalysisConfig {
            period: Some("2h".parse().unwrap()),
            ..AnalysisConfig::default()
        };
        let analysis = analyze_test("T1", &h["T1"], &config, at(1, 10, 0));
        let score = analysis.stability.as_scored().expect("three runs in window");
        assert_eq!(score.stats.total_runs, 3);
        assert_eq!(score.stats.transitions, 2);
    }

    #[test]
    fn test_report_json_shape() {
        let h = history(&[("T1", "pfpf")]);
        let report = build_report(&h, &HashSet::new(), &AnalysisConfig::default(), at(2, 0, 0));
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["flaky_tests"][0]["test_id"], "T1");
        assert_eq!(value["flaky_tests"][0]["score"], 80);
        assert_eq!(value["flaky_tests"][0]["quarantined"], false);
        assert!(value.get("period").is_none());
    }
}
