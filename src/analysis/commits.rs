//! Commit correlation: which commits precede a test flipping.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ExecutionRecord, Outcome};

/// A distinct commit and the outcome of the first execution that ran it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitCorrelation {
    pub sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub run_id: String,
    pub status_after: Outcome,
}

/// Walk `records` in order and keep the first execution seen for each commit.
/// Later executions of the same commit are ignored.
pub fn correlate_commits(records: &[ExecutionRecord]) -> Vec<CommitCorrelation> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut commits: Vec<CommitCorrelation> = records
        .iter()
        .filter_map(|r| {
            let sha = r.commit_sha.as_deref().filter(|s| !s.is_empty())?;
            if !seen.insert(sha) {
                return None;
            }
            Some(CommitCorrelation {
                sha: sha.to_string(),
                message: r.commit_message.clone(),
                author: r.commit_author.clone(),
                first_seen_at: r.started_at,
                run_id: r.run_id.clone(),
                status_after: r.outcome,
            })
        })
        .collect();

    commits.sort_by_key(|c| c.first_seen_at);
    commits
}

/// The `limit` most recent entries of a chronological commit list.
pub fn most_recent(mut commits: Vec<CommitCorrelation>, limit: usize) -> Vec<CommitCorrelation> {
    let skip = commits.len().saturating_sub(limit);
    commits.drain(..skip);
    commits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::fixtures::{at, record};
    use crate::analysis::Outcome::{Fail, Pass};

    fn on_commit(hour: u32, outcome: Outcome, sha: Option<&str>) -> ExecutionRecord {
        let mut r = record("T1", at(1, hour, 0), outcome);
        r.commit_sha = sha.map(str::to_string);
        r.commit_message = sha.map(|s| format!("change {s}"));
        r.commit_author = sha.map(|_| "dev@example.com".to_string());
        r
    }

    #[test]
    fn test_first_execution_per_commit_wins() {
        let records = vec![
            on_commit(1, Pass, Some("aaa")),
            on_commit(2, Fail, Some("aaa")),
            on_commit(3, Fail, Some("bbb")),
            on_commit(4, Pass, None),
            on_commit(5, Pass, Some("bbb")),
            on_commit(6, Pass, Some("ccc")),
        ];
        let commits = correlate_commits(&records);
        let shas: Vec<_> = commits.iter().map(|c| c.sha.as_str()).collect();
        assert_eq!(shas, ["aaa", "bbb", "ccc"]);
        assert_eq!(commits[0].status_after, Pass);
        assert_eq!(commits[1].status_after, Fail);
        assert_eq!(commits[1].first_seen_at, at(1, 3, 0));
        assert_eq!(commits[1].message.as_deref(), Some("change bbb"));
    }

    #[test]
    fn test_no_commits() {
        let records = vec![on_commit(1, Pass, None), on_commit(2, Fail, Some(""))];
        assert!(correlate_commits(&records).is_empty());
    }

    #[test]
    fn test_most_recent_keeps_the_tail() {
        let records: Vec<_> = (0..5)
            .map(|h| on_commit(h, Pass, Some(&format!("c{h}"))))
            .collect();
        let recent = most_recent(correlate_commits(&records), 2);
        let shas: Vec<_> = recent.iter().map(|c| c.sha.as_str()).collect();
        assert_eq!(shas, ["c3", "c4"]);

        assert_eq!(most_recent(correlate_commits(&records), 20).len(), 5);
    }
}
