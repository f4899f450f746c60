//! Advisory text derived from stability metrics.
//!
//! Every rule is evaluated on its own and all matching rules fire, except the
//! "stable" message, which is emitted alone when nothing was flagged at all.
//! Recommendations never feed back into the numbers.

use serde::{Deserialize, Serialize};

pub const CRITICAL_SCORE: u32 = 70;
pub const HIGH_SCORE: u32 = 50;
pub const ENVIRONMENTAL_FAIL_STREAK: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    CriticalFlakiness,
    HighFlakiness,
    TimeDependent,
    Environmental,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    pub message: String,
}

/// The metrics of one flagged test that the rules look at.
#[derive(Debug, Clone, Copy)]
pub struct FlakySignal<'a> {
    pub test_id: &'a str,
    pub score: u32,
    pub longest_fail_streak: usize,
    pub failure_hours: &'a [String],
}

/// Map flagged tests (in listing order) to recommendations.
pub fn recommend(signals: &[FlakySignal<'_>]) -> Vec<Recommendation> {
    if signals.is_empty() {
        return vec![Recommendation {
            kind: RecommendationKind::Stable,
            test_id: None,
            message: "Great stability! No flaky tests detected in the analyzed history."
                .to_string(),
        }];
    }

    let mut out = Vec::new();
    for s in signals {
        let advise = |kind, message: String| Recommendation {
            kind,
            test_id: Some(s.test_id.to_string()),
            message,
        };

        if s.score >= CRITICAL_SCORE {
            out.push(advise(
                RecommendationKind::CriticalFlakiness,
                format!(
                    "Test '{}' has critical flakiness (score {}). Prioritize stabilizing it \
                     or quarantine it until fixed.",
                    s.test_id, s.score
                ),
            ));
        } else if s.score >= HIGH_SCORE {
            out.push(advise(
                RecommendationKind::HighFlakiness,
                format!(
                    "Test '{}' shows high flakiness (score {}). Check for race conditions, \
                     missing waits and shared state between tests.",
                    s.test_id, s.score
                ),
            ));
        }

        if let [hour] = s.failure_hours {
            out.push(advise(
                RecommendationKind::TimeDependent,
                format!(
                    "Test '{}' only fails around {}. Look for time-dependent behavior such as \
                     scheduled jobs, time zones or date boundaries.",
                    s.test_id, hour
                ),
            ));
        }

        if s.longest_fail_streak >= ENVIRONMENTAL_FAIL_STREAK {
            out.push(advise(
                RecommendationKind::Environmental,
                format!(
                    "Test '{}' failed {} times in a row. This points to a possible \
                     environmental issue (infrastructure, test data or an external service).",
                    s.test_id, s.longest_fail_streak
                ),
            ));
        }
    }
    out
}
