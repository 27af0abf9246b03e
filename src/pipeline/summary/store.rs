use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::types::{ChunkStore, StoreError, SummaryStore};
use crate::models::{Fragment, Summary};

/// In-memory chunk store and summary history. Used by tests and by callers
/// that already hold decrypted fragments.
#[derive(Default)]
pub struct InMemoryStore {
    fragments: Mutex<HashMap<i64, Vec<Fragment>>>,
    summaries: Mutex<HashMap<i64, Vec<Summary>>>,
    fail_prior_reads: AtomicBool,
    fail_writes: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add fragments for a patient, keeping report/fragment order.
    pub fn add_fragments(
        &self,
        patient_id: i64,
        fragments: impl IntoIterator<Item = Fragment>,
    ) -> Result<(), StoreError> {
        let mut map = lock(&self.fragments)?;
        let list = map.entry(patient_id).or_default();
        list.extend(fragments);
        list.sort_by_key(Fragment::position);
        Ok(())
    }

    /// Every persisted summary for a patient, oldest first.
    pub fn history(&self, patient_id: i64) -> Vec<Summary> {
        lock(&self.summaries)
            .map(|map| map.get(&patient_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Make `get_prior_summary` fail, as an unreadable history row would.
    pub fn set_fail_prior_reads(&self, fail: bool) {
        self.fail_prior_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl ChunkStore for InMemoryStore {
    fn get_fragments(&self, patient_id: i64) -> Result<Vec<Fragment>, StoreError> {
        let map = lock(&self.fragments)?;
        match map.get(&patient_id) {
            Some(list) if !list.is_empty() => Ok(list.clone()),
            _ => Err(StoreError::NotFound(patient_id)),
        }
    }
}

impl SummaryStore for InMemoryStore {
    fn get_prior_summary(&self, patient_id: i64) -> Result<Option<Summary>, StoreError> {
        if self.fail_prior_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt(format!(
                "summary history for patient {patient_id}"
            )));
        }
        let map = lock(&self.summaries)?;
        Ok(map.get(&patient_id).and_then(|h| h.last().cloned()))
    }

    fn persist_summary(&self, patient_id: i64, summary: &Summary) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        lock(&self.summaries)?
            .entry(patient_id)
            .or_default()
            .push(summary.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::*;

    fn fragment(id: i64, report_id: i64, index: u32) -> Fragment {
        Fragment {
            id,
            report_id,
            report_type: ReportType::ClinicalNote,
            fragment_index: index,
            page: None,
            offset: None,
            text: format!("fragment {id}"),
            embedding: vec![],
        }
    }

    fn summary(evolution: &str) -> Summary {
        Summary::new(
            UniversalSummary {
                evolution: evolution.into(),
                current_status: vec!["s".into()],
                plan: vec!["p".into()],
            },
            Specialty::General,
            None,
        )
    }

    #[test]
    fn fragments_are_ordered_by_position() {
        let store = InMemoryStore::new();
        store
            .add_fragments(7, vec![fragment(1, 2, 0), fragment(2, 1, 1), fragment(3, 1, 0)])
            .unwrap();
        let ids: Vec<i64> = store.get_fragments(7).unwrap().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn unknown_patient_is_not_found() {
        let store = InMemoryStore::new();
        assert!(matches!(store.get_fragments(1), Err(StoreError::NotFound(1))));
    }

    #[test]
    fn newest_summary_is_prior() {
        let store = InMemoryStore::new();
        assert!(store.get_prior_summary(1).unwrap().is_none());
        store.persist_summary(1, &summary("first")).unwrap();
        store.persist_summary(1, &summary("second")).unwrap();
        assert_eq!(
            store.get_prior_summary(1).unwrap().unwrap().universal.evolution,
            "second"
        );
        assert_eq!(store.history(1).len(), 2);
    }

    #[test]
    fn failure_switches() {
        let store = InMemoryStore::new();
        store.set_fail_prior_reads(true);
        assert!(matches!(store.get_prior_summary(1), Err(StoreError::Corrupt(_))));
        store.set_fail_writes(true);
        assert!(store.persist_summary(1, &summary("x")).is_err());
        assert!(store.history(1).is_empty());
    }
}
