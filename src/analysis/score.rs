//! Flakiness scoring over an ordered outcome sequence.
//!
//! The score blends two ratios:
//!
//! * `transition_ratio` = adjacent outcome flips / (n - 1), weighted 60
//! * `mixed_ratio` = min(passed, failed) / n, weighted 40
//!
//! and is clamped to `[0, 100]`. A test that flips on every run and is evenly
//! split scores 80; a test that simply fails a lot with few flips scores low,
//! because that is a reliability problem rather than flakiness.

use serde::{Deserialize, Serialize};

use super::{percent, round1, AnalysisError, ExecutionRecord, Outcome};

/// Minimum executions before a per-test score is reported.
pub const MIN_RUNS_FOR_SCORE: usize = 3;

const TRANSITION_WEIGHT: f64 = 60.0;
const MIXED_WEIGHT: f64 = 40.0;

/// A maximal run of identical consecutive outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Streak {
    #[serde(rename = "type")]
    pub kind: Outcome,
    pub length: usize,
}

/// Counts, transitions, streaks and score for one outcome sequence.
///
/// Shared by the per-test scorer and every trend bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceStats {
    pub total_runs: usize,
    pub passed_runs: usize,
    pub failed_runs: usize,
    pub transitions: usize,
    pub score: u32,
    pub longest_pass_streak: usize,
    pub longest_fail_streak: usize,
    pub current_streak: Streak,
}

impl SequenceStats {
    pub fn pass_rate(&self) -> f64 {
        percent(self.passed_runs, self.total_runs)
    }
}

/// Compute [`SequenceStats`] for any non-empty sequence. Returns `None` when
/// `outcomes` is empty. Applies no minimum-size policy; callers do.
pub fn sequence_stats(outcomes: &[Outcome]) -> Option<SequenceStats> {
    let (&first, rest) = outcomes.split_first()?;
    let n = outcomes.len();

    let mut passed_runs = usize::from(first == Outcome::Pass);
    let mut transitions = 0;
    let mut longest_pass_streak = 0;
    let mut longest_fail_streak = 0;
    let mut streak = Streak { kind: first, length: 1 };

    for &outcome in rest {
        if outcome == Outcome::Pass {
            passed_runs += 1;
        }
        if outcome == streak.kind {
            streak.length += 1;
        } else {
            transitions += 1;
            fold_streak(streak, &mut longest_pass_streak, &mut longest_fail_streak);
            streak = Streak { kind: outcome, length: 1 };
        }
    }
    fold_streak(streak, &mut longest_pass_streak, &mut longest_fail_streak);

    let failed_runs = n - passed_runs;

    Some(SequenceStats {
        total_runs: n,
        passed_runs,
        failed_runs,
        transitions,
        score: flakiness_score(n, passed_runs, failed_runs, transitions),
        longest_pass_streak,
        longest_fail_streak,
        current_streak: streak,
    })
}

fn fold_streak(streak: Streak, longest_pass: &mut usize, longest_fail: &mut usize) {
    let slot = match streak.kind {
        Outcome::Pass => longest_pass,
        Outcome::Fail => longest_fail,
    };
    *slot = (*slot).max(streak.length);
}

/// `round(transition_ratio * 60 + mixed_ratio * 40)` clamped to `[0, 100]`.
pub fn flakiness_score(total: usize, passed: usize, failed: usize, transitions: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    let transition_ratio = if total > 1 {
        transitions as f64 / (total - 1) as f64
    } else {
        0.0
    };
    let mixed_ratio = passed.min(failed) as f64 / total as f64;
    let raw = transition_ratio * TRANSITION_WEIGHT + mixed_ratio * MIXED_WEIGHT;
    raw.round().clamp(0.0, 100.0) as u32
}

// ---------------------------------------------------------------------------
// Per-test scoring
// ---------------------------------------------------------------------------

/// Score of a single test with enough history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlakinessScore {
    pub test_id: String,
    #[serde(flatten)]
    pub stats: SequenceStats,
    pub pass_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_duration_ms: Option<f64>,
}

/// Per-test scoring outcome. Short histories are a soft result, not an error,
/// so a host can render "not enough history" instead of a zero score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestStability {
    Scored(FlakinessScore),
    InsufficientData { test_id: String, total_runs: usize },
}

impl TestStability {
    pub fn test_id(&self) -> &str {
        match self {
            TestStability::Scored(s) => &s.test_id,
            TestStability::InsufficientData { test_id, .. } => test_id,
        }
    }

    pub fn as_scored(&self) -> Option<&FlakinessScore> {
        match self {
            TestStability::Scored(s) => Some(s),
            TestStability::InsufficientData { .. } => None,
        }
    }

    /// Hard-error view for callers that cannot proceed without a score.
    pub fn require_score(&self) -> Result<&FlakinessScore, AnalysisError> {
        match self {
            TestStability::Scored(s) => Ok(s),
            TestStability::InsufficientData { total_runs, .. } => {
                Err(AnalysisError::InsufficientData {
                    needed: MIN_RUNS_FOR_SCORE,
                    have: *total_runs,
                })
            }
        }
    }
}

/// Score a bare outcome sequence for `test_id`.
pub fn score_outcomes(test_id: &str, outcomes: &[Outcome]) -> TestStability {
    match sequence_stats(outcomes) {
        Some(stats) if outcomes.len() >= MIN_RUNS_FOR_SCORE => {
            let pass_rate = stats.pass_rate();
            TestStability::Scored(FlakinessScore {
                test_id: test_id.to_string(),
                stats,
                pass_rate,
                avg_duration_ms: None,
            })
        }
        _ => TestStability::InsufficientData {
            test_id: test_id.to_string(),
            total_runs: outcomes.len(),
        },
    }
}

/// Score a test from its ordered execution records, including the average
/// duration over records that carry one.
pub fn score_records(test_id: &str, records: &[ExecutionRecord]) -> TestStability {
    let outcomes: Vec<Outcome> = records.iter().map(|r| r.outcome).collect();
    let mut stability = score_outcomes(test_id, &outcomes);

    if let TestStability::Scored(score) = &mut stability {
        let durations: Vec<u64> = records.iter().filter_map(|r| r.duration_ms).collect();
        if !durations.is_empty() {
            let sum: u64 = durations.iter().sum();
            score.avg_duration_ms = Some(round1(sum as f64 / durations.len() as f64));
        }
    }
    stability
}
