//! In-process quarantine store.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::{LifecycleError, QuarantineRecord, QuarantineStore};

/// Keeps records and known test ids in memory. Suitable for hosts that
/// persist elsewhere, and for tests.
#[derive(Default)]
pub struct MemoryQuarantineStore {
    known: RwLock<HashSet<String>>,
    records: RwLock<HashMap<String, QuarantineRecord>>,
}

impl MemoryQuarantineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `test_id` eligible for transitions.
    pub fn register_test(&self, test_id: &str) {
        let mut known = self.known.write().unwrap_or_else(|e| e.into_inner());
        known.insert(test_id.to_string());
    }
}

fn poisoned() -> LifecycleError {
    LifecycleError::Store(anyhow::anyhow!("quarantine store lock poisoned"))
}

impl QuarantineStore for MemoryQuarantineStore {
    fn is_known_test(&self, test_id: &str) -> Result<bool, LifecycleError> {
        let known = self.known.read().map_err(|_| poisoned())?;
        Ok(known.contains(test_id))
    }

    fn get(&self, test_id: &str) -> Result<Option<QuarantineRecord>, LifecycleError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(test_id).cloned())
    }

    fn put(&self, record: &QuarantineRecord) -> Result<(), LifecycleError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(record.test_id.clone(), record.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<QuarantineRecord>, LifecycleError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.values().cloned().collect())
    }
}
