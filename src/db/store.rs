use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use super::{repository, sqlite, DatabaseError};
use crate::models::{Fragment, Summary};
use crate::pipeline::summary::types::{ChunkStore, StoreError, SummaryStore};

/// SQLite-backed chunk store and summary history.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self::from_connection(sqlite::open_database(path)?))
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::from_connection(sqlite::open_memory_database()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Run `f` with the underlying connection (seeding, inspection).
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DatabaseError>,
    ) -> Result<T, StoreError> {
        let conn = self.lock()?;
        f(&conn).map_err(StoreError::from)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".into()))
    }
}

impl ChunkStore for SqliteStore {
    fn get_fragments(&self, patient_id: i64) -> Result<Vec<Fragment>, StoreError> {
        let fragments = self.with_connection(|conn| {
            repository::get_fragments_for_patient(conn, patient_id)
        })?;
        if fragments.is_empty() {
            return Err(StoreError::NotFound(patient_id));
        }
        Ok(fragments)
    }
}

impl SummaryStore for SqliteStore {
    fn get_prior_summary(&self, patient_id: i64) -> Result<Option<Summary>, StoreError> {
        self.with_connection(|conn| repository::get_latest_summary(conn, patient_id))
    }

    fn persist_summary(&self, patient_id: i64, summary: &Summary) -> Result<(), StoreError> {
        let summary_id =
            self.with_connection(|conn| repository::insert_summary(conn, patient_id, summary))?;
        tracing::info!(
            patient_id,
            summary_id,
            citations = summary.citations.len(),
            "Summary persisted"
        );
        Ok(())
    }
}
