//! Quarantine lifecycle: `active` <-> `quarantined` per test.
//!
//! Transitions are always caller-triggered. A quarantined test keeps running
//! and keeps being scored; only CI gating (owned by the host) changes.
//! Persistence lives behind [`QuarantineStore`].

pub mod memory;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub use self::memory::MemoryQuarantineStore;

/// Recorded when the caller quarantines without giving a reason.
pub const DEFAULT_REASON: &str = "Quarantined due to flaky behavior";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("a test id is required")]
    MissingTestId,

    #[error("unknown test '{0}'")]
    UnknownTest(String),

    #[error("test '{0}' is not quarantined")]
    NotQuarantined(String),

    #[error("no quarantine reason available for test '{0}'")]
    MissingReason(String),

    #[error("quarantine store failure: {0}")]
    Store(#[source] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineState {
    Active,
    Quarantined,
}

impl QuarantineState {
    pub fn as_str(self) -> &'static str {
        match self {
            QuarantineState::Active => "active",
            QuarantineState::Quarantined => "quarantined",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(QuarantineState::Active),
            "quarantined" => Some(QuarantineState::Quarantined),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub test_id: String,
    pub state: QuarantineState,
    pub reason: Option<String>,
    pub actor: Option<String>,
    pub quarantined_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
}

impl QuarantineRecord {
    /// The implicit state of every test that was never quarantined.
    pub fn active(test_id: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            state: QuarantineState::Active,
            reason: None,
            actor: None,
            quarantined_at: None,
            released_at: None,
        }
    }

    pub fn is_quarantined(&self) -> bool {
        self.state == QuarantineState::Quarantined
    }

    /// Enter (or refresh) quarantine. Re-applying overwrites reason, actor
    /// and timestamp.
    pub fn quarantine(mut self, reason: String, actor: Option<String>, at: DateTime<Utc>) -> Self {
        self.state = QuarantineState::Quarantined;
        self.reason = Some(reason);
        self.actor = actor;
        self.quarantined_at = Some(at);
        self.released_at = None;
        self
    }

    /// Leave quarantine. Reason and `quarantined_at` are kept as history.
    pub fn release(mut self, actor: Option<String>, at: DateTime<Utc>) -> Result<Self, LifecycleError> {
        if !self.is_quarantined() {
            return Err(LifecycleError::NotQuarantined(self.test_id));
        }
        self.state = QuarantineState::Active;
        if actor.is_some() {
            self.actor = actor;
        }
        self.released_at = Some(at);
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Store seam
// ---------------------------------------------------------------------------

/// Storage for quarantine records and the registry of known tests.
///
/// Implementations serialize writes for the same test; the last write wins.
pub trait QuarantineStore: Send + Sync {
    fn is_known_test(&self, test_id: &str) -> Result<bool, LifecycleError>;
    fn get(&self, test_id: &str) -> Result<Option<QuarantineRecord>, LifecycleError>;
    fn put(&self, record: &QuarantineRecord) -> Result<(), LifecycleError>;
    fn list(&self) -> Result<Vec<QuarantineRecord>, LifecycleError>;
}

// ---------------------------------------------------------------------------
// QuarantineManager
// ---------------------------------------------------------------------------

/// Validates and applies quarantine transitions against a store.
pub struct QuarantineManager<S> {
    store: S,
    default_reason: String,
}

impl<S: QuarantineStore> QuarantineManager<S> {
    pub fn new(store: S) -> Self {
        Self::with_default_reason(store, DEFAULT_REASON)
    }

    /// Use `default_reason` when a caller quarantines without one. An empty
    /// default makes a reason mandatory.
    pub fn with_default_reason(store: S, default_reason: impl Into<String>) -> Self {
        Self {
            store,
            default_reason: default_reason.into().trim().to_string(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// `active -> quarantined`, or refresh an existing quarantine.
    pub fn quarantine(
        &self,
        test_id: &str,
        reason: Option<&str>,
        actor: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<QuarantineRecord, LifecycleError> {
        let current = self.current(test_id)?;
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(self.default_reason.as_str());
        if reason.is_empty() {
            return Err(LifecycleError::MissingReason(current.test_id));
        }

        let refreshed = current.is_quarantined();
        let record = current.quarantine(reason.to_string(), actor.map(str::to_string), at);
        self.store.put(&record)?;

        info!(
            test_id = %record.test_id,
            actor = actor.unwrap_or("-"),
            reason,
            refreshed,
            "test quarantined"
        );
        Ok(record)
    }

    /// `quarantined -> active`.
    pub fn unquarantine(
        &self,
        test_id: &str,
        actor: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<QuarantineRecord, LifecycleError> {
        let record = self.current(test_id)?.release(actor.map(str::to_string), at)?;
        self.store.put(&record)?;

        info!(test_id = %record.test_id, actor = actor.unwrap_or("-"), "test released from quarantine");
        Ok(record)
    }

    /// Current record for a known test, `active` if it was never quarantined.
    pub fn status(&self, test_id: &str) -> Result<QuarantineRecord, LifecycleError> {
        self.current(test_id)
    }

    /// Tests currently quarantined, oldest quarantine first.
    pub fn list_quarantined(&self) -> Result<Vec<QuarantineRecord>, LifecycleError> {
        let mut records: Vec<_> = self
            .store
            .list()?
            .into_iter()
            .filter(QuarantineRecord::is_quarantined)
            .collect();
        records.sort_by(|a, b| {
            a.quarantined_at
                .cmp(&b.quarantined_at)
                .then_with(|| a.test_id.cmp(&b.test_id))
        });
        Ok(records)
    }

    pub fn quarantined_ids(&self) -> Result<HashSet<String>, LifecycleError> {
        Ok(self
            .list_quarantined()?
            .into_iter()
            .map(|r| r.test_id)
            .collect())
    }

    fn current(&self, test_id: &str) -> Result<QuarantineRecord, LifecycleError> {
        let test_id = test_id.trim();
        if test_id.is_empty() {
            return Err(LifecycleError::MissingTestId);
        }
        if !self.store.is_known_test(test_id)? {
            return Err(LifecycleError::UnknownTest(test_id.to_string()));
        }
        Ok(self
            .store
            .get(test_id)?
            .unwrap_or_else(|| QuarantineRecord::active(test_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).single().unwrap()
    }

    fn manager() -> QuarantineManager<MemoryQuarantineStore> {
        let store = MemoryQuarantineStore::new();
        store.register_test("T1");
        store.register_test("T2");
        QuarantineManager::new(store)
    }

    #[test]
    fn test_quarantine_then_release() {
        let m = manager();
        let q = m.quarantine("T1", Some("flaky login"), Some("alice"), t(1)).unwrap();
        assert_eq!(q.state, QuarantineState::Quarantined);
        assert_eq!(q.reason.as_deref(), Some("flaky login"));
        assert_eq!(q.actor.as_deref(), Some("alice"));
        assert_eq!(q.quarantined_at, Some(t(1)));

        let r = m.unquarantine("T1", Some("bob"), t(2)).unwrap();
        assert_eq!(r.state, QuarantineState::Active);
        assert_eq!(r.released_at, Some(t(2)));
        assert_eq!(r.actor.as_deref(), Some("bob"));
        assert_eq!(r.quarantined_at, Some(t(1)));
        assert_eq!(m.status("T1").unwrap().state, QuarantineState::Active);
    }

    #[test]
    fn test_requarantine_is_idempotent_and_refreshes() {
        let m = manager();
        m.quarantine("T1", Some("first"), Some("alice"), t(1)).unwrap();
        let again = m.quarantine("T1", Some("second"), Some("bob"), t(3)).unwrap();
        assert!(again.is_quarantined());
        assert_eq!(again.reason.as_deref(), Some("second"));
        assert_eq!(again.actor.as_deref(), Some("bob"));
        assert_eq!(again.quarantined_at, Some(t(3)));
        assert_eq!(m.list_quarantined().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_reason_defaults() {
        let m = manager();
        let q = m.quarantine("T1", None, None, t(1)).unwrap();
        assert_eq!(q.reason.as_deref(), Some(DEFAULT_REASON));
        let blank = m.quarantine("T2", Some("   "), None, t(1)).unwrap();
        assert_eq!(blank.reason.as_deref(), Some(DEFAULT_REASON));
    }

    #[test]
    fn test_reason_required_when_no_default() {
        let store = MemoryQuarantineStore::new();
        store.register_test("T1");
        let m = QuarantineManager::with_default_reason(store, "");
        assert!(matches!(
            m.quarantine("T1", None, None, t(1)).unwrap_err(),
            LifecycleError::MissingReason(id) if id == "T1"
        ));
        assert!(m.quarantine("T1", Some("known race"), None, t(1)).is_ok());
    }

    #[test]
    fn test_unquarantine_never_quarantined_is_an_error() {
        let m = manager();
        let err = m.unquarantine("T1", None, t(1)).unwrap_err();
        assert!(matches!(err, LifecycleError::NotQuarantined(id) if id == "T1"));
    }

    #[test]
    fn test_unknown_and_missing_test_ids() {
        let m = manager();
        assert!(matches!(
            m.quarantine("nope", Some("x"), None, t(1)).unwrap_err(),
            LifecycleError::UnknownTest(id) if id == "nope"
        ));
        assert!(matches!(
            m.unquarantine("nope", None, t(1)).unwrap_err(),
            LifecycleError::UnknownTest(_)
        ));
        assert!(matches!(
            m.quarantine("  ", Some("x"), None, t(1)).unwrap_err(),
            LifecycleError::MissingTestId
        ));
    }

    #[test]
    fn test_list_orders_by_quarantine_time() {
        let m = manager();
        m.quarantine("T2", None, None, t(1)).unwrap();
        m.quarantine("T1", None, None, t(2)).unwrap();
        let ids: Vec<_> = m.list_quarantined().unwrap().into_iter().map(|r| r.test_id).collect();
        assert_eq!(ids, ["T2", "T1"]);

        m.unquarantine("T2", None, t(3)).unwrap();
        let ids = m.quarantined_ids().unwrap();
        assert!(ids.contains("T1"));
        assert!(!ids.contains("T2"));
    }

    #[test]
    fn test_record_serializes_snake_case_state() {
        let record = QuarantineRecord::active("T1").quarantine("r".into(), None, t(1));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["state"], "quarantined");
        assert_eq!(value["released_at"], serde_json::Value::Null);
        assert_eq!(QuarantineState::parse("active"), Some(QuarantineState::Active));
        assert_eq!(QuarantineState::parse("bogus"), None);
    }
}
