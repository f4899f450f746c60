//! Test stability analytics.
//!
//! Everything under this module is a pure function over an already ordered
//! slice of [`ExecutionRecord`]s. Nothing here touches storage or the clock;
//! the host supplies both.

pub mod commits;
pub mod patterns;
pub mod recommend;
pub mod report;
pub mod runner;
pub mod score;
pub mod trend;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::trend::Granularity;

pub const DEFAULT_MIN_FLAKINESS_SCORE: u32 = 20;
pub const DEFAULT_MAX_FLAKY_TESTS: usize = 20;
pub const DEFAULT_MAX_ERROR_PATTERNS: usize = 3;
pub const DEFAULT_MAX_COMMITS: usize = 20;

/// Longest accepted lookback window (roughly a century).
const MAX_PERIOD_DAYS: i64 = 36_500;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    /// A required identifier (test id, project id) was not supplied.
    #[error("missing required identifier: {0}")]
    MissingIdentifier(&'static str),

    #[error("malformed period '{0}': expected <n>h, <n>d or <n>w")]
    MalformedPeriod(String),

    #[error("unknown granularity '{0}': expected hour, day or week")]
    UnknownGranularity(String),

    /// Not enough history to compute a score. Most call sites surface this
    /// as [`score::TestStability::InsufficientData`] instead.
    #[error("insufficient data: need {needed} records, have {have}")]
    InsufficientData { needed: usize, have: usize },
}

// ---------------------------------------------------------------------------
// Execution records
// ---------------------------------------------------------------------------

/// Canonical binary outcome of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail,
}

impl Outcome {
    pub fn is_fail(self) -> bool {
        matches!(self, Outcome::Fail)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Pass => write!(f, "pass"),
            Outcome::Fail => write!(f, "fail"),
        }
    }
}

/// One observed execution of a test, after ingestion normalized it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub run_id: String,
    pub test_id: String,
    pub started_at: DateTime<Utc>,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Only ever set when `outcome` is `Fail`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_author: Option<String>,
}

// ---------------------------------------------------------------------------
// Lookback period
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodUnit {
    Hours,
    Days,
    Weeks,
}

/// A lookback window such as `24h`, `7d` or `4w`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    pub amount: u32,
    pub unit: PeriodUnit,
}

impl Period {
    pub fn duration(&self) -> Duration {
        let amount = i64::from(self.amount);
        match self.unit {
            PeriodUnit::Hours => Duration::hours(amount),
            PeriodUnit::Days => Duration::days(amount),
            PeriodUnit::Weeks => Duration::weeks(amount),
        }
    }

    /// Earliest `started_at` still inside the window ending at `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.duration()
    }
}

impl FromStr for Period {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let malformed = || AnalysisError::MalformedPeriod(s.to_string());

        let split = trimmed.len().checked_sub(1).ok_or_else(malformed)?;
        if !trimmed.is_char_boundary(split) {
            return Err(malformed());
        }
        let (digits, unit) = trimmed.split_at(split);
        let unit = match unit {
            "h" | "H" => PeriodUnit::Hours,
            "d" | "D" => PeriodUnit::Days,
            "w" | "W" => PeriodUnit::Weeks,
            _ => return Err(malformed()),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let amount: u32 = digits.parse().map_err(|_| malformed())?;
        let max_amount = match unit {
            PeriodUnit::Hours => MAX_PERIOD_DAYS * 24,
            PeriodUnit::Days => MAX_PERIOD_DAYS,
            PeriodUnit::Weeks => MAX_PERIOD_DAYS / 7,
        };
        if amount == 0 || i64::from(amount) > max_amount {
            return Err(malformed());
        }
        Ok(Period { amount, unit })
    }
}

impl TryFrom<String> for Period {
    type Error = AnalysisError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(p: Period) -> Self {
        p.to_string()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.unit {
            PeriodUnit::Hours => 'h',
            PeriodUnit::Days => 'd',
            PeriodUnit::Weeks => 'w',
        };
        write!(f, "{}{}", self.amount, unit)
    }
}

/// Keep only records inside `period` (relative to `now`). Order is preserved.
pub fn within_period(
    records: &[ExecutionRecord],
    period: Option<Period>,
    now: DateTime<Utc>,
) -> Vec<ExecutionRecord> {
    match period {
        Some(p) => {
            let cutoff = p.cutoff(now);
            records
                .iter()
                .filter(|r| r.started_at >= cutoff)
                .cloned()
                .collect()
        }
        None => records.to_vec(),
    }
}

// ---------------------------------------------------------------------------
// Per-call configuration
// ---------------------------------------------------------------------------

/// Knobs for one analysis call. Defaults are defined here and nowhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Tests scoring below this are left out of flaky listings.
    pub min_flakiness_score: u32,
    pub granularity: Granularity,
    pub max_flaky_tests: usize,
    pub max_error_patterns: usize,
    pub max_commits: usize,
    /// Optional lookback window; `None` analyzes the full history.
    pub period: Option<Period>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_flakiness_score: DEFAULT_MIN_FLAKINESS_SCORE,
            granularity: Granularity::Day,
            max_flaky_tests: DEFAULT_MAX_FLAKY_TESTS,
            max_error_patterns: DEFAULT_MAX_ERROR_PATTERNS,
            max_commits: DEFAULT_MAX_COMMITS,
            period: None,
        }
    }
}

/// Percentage of `part` in `total`, rounded to one decimal. Zero when empty.
pub(crate) fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round1(part as f64 / total as f64 * 100.0)
}

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
