//! Time-bucketed flakiness trends.
//!
//! Records are grouped by truncating `started_at` to an hour, day or ISO week,
//! each bucket with at least two records is scored with the shared scorer, and
//! the overall direction is read off the first and last emitted points.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::score::{sequence_stats, SequenceStats};
use super::{round1, AnalysisError, ExecutionRecord, Outcome};

/// A bucket needs this many records before it can show a transition.
pub const MIN_BUCKET_RUNS: usize = 2;

const SECS_PER_HOUR: i64 = 3_600;
const SECS_PER_DAY: i64 = 86_400;

// ---------------------------------------------------------------------------
// Granularity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    #[default]
    Day,
    Week,
}

impl Granularity {
    /// Start of the bucket containing `ts`. Weeks start on Monday (UTC).
    pub fn bucket_start(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Granularity::Hour => truncate_secs(ts, SECS_PER_HOUR),
            Granularity::Day => truncate_secs(ts, SECS_PER_DAY),
            Granularity::Week => {
                let day = truncate_secs(ts, SECS_PER_DAY);
                let back = i64::from(day.weekday().num_days_from_monday());
                day.checked_sub_signed(Duration::days(back)).unwrap_or(day)
            }
        }
    }

    pub fn label(self, bucket_start: DateTime<Utc>) -> String {
        match self {
            Granularity::Hour => bucket_start.format("%Y-%m-%dT%H:00").to_string(),
            Granularity::Day | Granularity::Week => bucket_start.format("%Y-%m-%d").to_string(),
        }
    }
}

fn truncate_secs(ts: DateTime<Utc>, unit: i64) -> DateTime<Utc> {
    let secs = ts.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(unit), 0).unwrap_or(ts)
}

impl FromStr for Granularity {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" | "hourly" => Ok(Granularity::Hour),
            "day" | "daily" => Ok(Granularity::Day),
            "week" | "weekly" => Ok(Granularity::Week),
            _ => Err(AnalysisError::UnknownGranularity(s.to_string())),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Hour => write!(f, "hour"),
            Granularity::Day => write!(f, "day"),
            Granularity::Week => write!(f, "week"),
        }
    }
}

// ---------------------------------------------------------------------------
// Trend points
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub label: String,
    pub bucket_start: DateTime<Utc>,
    #[serde(flatten)]
    pub stats: SequenceStats,
    pub pass_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Trend::Increasing => "increasing",
            Trend::Decreasing => "decreasing",
            Trend::Stable => "stable",
            Trend::InsufficientData => "insufficient data",
        };
        f.write_str(s)
    }
}

/// Compare the first and last point's score. Averages are deliberately not
/// used: the question is where the test started and where it is now.
pub fn classify(points: &[TrendPoint]) -> Trend {
    match (points.first(), points.last()) {
        (Some(first), Some(last)) if points.len() >= 2 => {
            match last.stats.score.cmp(&first.stats.score) {
                std::cmp::Ordering::Greater => Trend::Increasing,
                std::cmp::Ordering::Less => Trend::Decreasing,
                std::cmp::Ordering::Equal => Trend::Stable,
            }
        }
        _ => Trend::InsufficientData,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    pub granularity: Granularity,
    pub trend: Trend,
    pub points: Vec<TrendPoint>,
    /// Every record considered, including those in skipped buckets.
    pub total_records: usize,
    pub bucket_count: usize,
    /// Buckets holding a single record; counted but never emitted.
    pub skipped_buckets: usize,
}

/// Bucket `records` (already in chronological order) and score each bucket.
pub fn build_trend(records: &[ExecutionRecord], granularity: Granularity) -> TrendReport {
    let mut buckets: BTreeMap<DateTime<Utc>, Vec<Outcome>> = BTreeMap::new();
    for r in records {
        buckets
            .entry(granularity.bucket_start(r.started_at))
            .or_default()
            .push(r.outcome);
    }

    let bucket_count = buckets.len();
    let mut points = Vec::with_capacity(bucket_count);
    for (start, outcomes) in &buckets {
        if outcomes.len() < MIN_BUCKET_RUNS {
            continue;
        }
        if let Some(stats) = sequence_stats(outcomes) {
            points.push(TrendPoint {
                label: granularity.label(*start),
                bucket_start: *start,
                pass_rate: stats.pass_rate(),
                stats,
            });
        }
    }

    TrendReport {
        test_id: None,
        granularity,
        trend: classify(&points),
        skipped_buckets: bucket_count - points.len(),
        bucket_count,
        total_records: records.len(),
        points,
    }
}

/// Trend for one test. The test must be identified.
pub fn test_trend(
    test_id: &str,
    records: &[ExecutionRecord],
    granularity: Granularity,
) -> Result<TrendReport, AnalysisError> {
    if test_id.trim().is_empty() {
        return Err(AnalysisError::MissingIdentifier("test_id"));
    }
    let mut report = build_trend(records, granularity);
    report.test_id = Some(test_id.to_string());
    Ok(report)
}

// ---------------------------------------------------------------------------
// Project-level summary
// ---------------------------------------------------------------------------

/// Change from the first to the last emitted point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendDeltas {
    pub score: i64,
    pub failed_runs: i64,
    pub pass_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectTrendSummary {
    #[serde(flatten)]
    pub report: TrendReport,
    pub average_score: f64,
    pub average_failures: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deltas: Option<TrendDeltas>,
}

/// Trend over many tests' records merged into one timeline.
pub fn project_trend(records: &[ExecutionRecord], granularity: Granularity) -> ProjectTrendSummary {
    let mut merged = records.to_vec();
    merged.sort_by_key(|r| r.started_at);
    let report = build_trend(&merged, granularity);

    let (average_score, average_failures) = if report.points.is_empty() {
        (0.0, 0.0)
    } else {
        let n = report.points.len() as f64;
        let score_sum: u32 = report.points.iter().map(|p| p.stats.score).sum();
        let fail_sum: usize = report.points.iter().map(|p| p.stats.failed_runs).sum();
        (round1(f64::from(score_sum) / n), round1(fail_sum as f64 / n))
    };

    let deltas = match (report.points.first(), report.points.last()) {
        (Some(first), Some(last)) if report.points.len() >= 2 => Some(TrendDeltas {
            score: i64::from(last.stats.score) - i64::from(first.stats.score),
            failed_runs: last.stats.failed_runs as i64 - first.stats.failed_runs as i64,
            pass_rate: round1(last.pass_rate - first.pass_rate),
        }),
        _ => None,
    };

    ProjectTrendSummary {
        report,
        average_score,
        average_failures,
        deltas,
    }
}
